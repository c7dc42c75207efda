use std::sync::Arc;

use shore_proto::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Negotiator;
use crate::error::CallError;
use crate::session::{Completion, ControllerInput};

#[derive(Debug)]
pub enum NegotiationOp {
    /// Create and apply a local offer; reports `OfferReady`.
    CreateOffer,
    /// Apply a remote offer then create and apply the answer; reports `AnswerReady`.
    AnswerOffer(SessionDescription),
    /// Apply the remote answer; reports `AnswerApplied`.
    ApplyAnswer(SessionDescription),
    AddCandidate(IceCandidate),
}

/// Runs negotiator operations for one session strictly in submission order.
pub struct NegotiationWorker {
    generation: u64,
    ops: mpsc::UnboundedSender<NegotiationOp>,
    negotiator: Arc<dyn Negotiator>,
    task: JoinHandle<()>,
}

impl NegotiationWorker {
    pub fn spawn(
        negotiator: Arc<dyn Negotiator>,
        generation: u64,
        results: mpsc::Sender<ControllerInput>,
    ) -> Self {
        let (ops, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(Arc::clone(&negotiator), generation, rx, results));
        Self {
            generation,
            ops,
            negotiator,
            task,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn submit(&self, op: NegotiationOp) {
        if self.ops.send(op).is_err() {
            debug!(target = "shore::negotiation", generation = self.generation, "worker gone; op dropped");
        }
    }

    /// Detaches callbacks, abandons queued work and closes the negotiator in
    /// the background. Safe to call without a runtime.
    pub fn shutdown(self) {
        self.negotiator.detach();
        self.task.abort();
        let negotiator = self.negotiator;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { negotiator.close().await });
            }
            Err(_) => debug!(target = "shore::negotiation", "no runtime; negotiator dropped without close"),
        }
    }
}

async fn run(
    negotiator: Arc<dyn Negotiator>,
    generation: u64,
    mut ops: mpsc::UnboundedReceiver<NegotiationOp>,
    results: mpsc::Sender<ControllerInput>,
) {
    let negotiator = negotiator.as_ref();
    while let Some(op) = ops.recv().await {
        let completion = match op {
            NegotiationOp::CreateOffer => Completion::OfferReady {
                generation,
                result: make_offer(negotiator).await,
            },
            NegotiationOp::AnswerOffer(offer) => Completion::AnswerReady {
                generation,
                result: make_answer(negotiator, offer).await,
            },
            NegotiationOp::ApplyAnswer(answer) => Completion::AnswerApplied {
                generation,
                result: negotiator.set_remote_description(answer).await,
            },
            NegotiationOp::AddCandidate(candidate) => {
                if let Err(err) = negotiator.add_ice_candidate(candidate).await {
                    warn!(target = "shore::negotiation", generation, error = %err, "remote candidate rejected");
                }
                continue;
            }
        };
        if results.send(ControllerInput::Completion(completion)).await.is_err() {
            break;
        }
    }
}

async fn make_offer(negotiator: &dyn Negotiator) -> Result<SessionDescription, CallError> {
    let offer = negotiator.create_offer().await?;
    negotiator.set_local_description(offer.clone()).await?;
    Ok(offer)
}

async fn make_answer(
    negotiator: &dyn Negotiator,
    offer: SessionDescription,
) -> Result<SessionDescription, CallError> {
    negotiator.set_remote_description(offer).await?;
    let answer = negotiator.create_answer().await?;
    negotiator.set_local_description(answer.clone()).await?;
    Ok(answer)
}
