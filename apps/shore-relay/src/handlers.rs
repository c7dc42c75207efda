use axum::{extract::State, response::Json};
use serde::Serialize;
use shore_proto::Identity;

use crate::RelayState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    online: usize,
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    users: Vec<Identity>,
}

pub async fn health_check(State(state): State<RelayState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        online: state.router.presence().len(),
    })
}

pub async fn online_users(State(state): State<RelayState>) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        users: state.router.presence().snapshot(),
    })
}
