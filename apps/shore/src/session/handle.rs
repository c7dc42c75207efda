use shore_proto::{CallKind, PeerProfile, ServerMessage};
use tokio::sync::{mpsc, watch};

use super::{CallSnapshot, Command, ControllerInput};
use crate::error::CallError;

/// Cloneable front door to a running [`super::SessionController`].
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    inputs: mpsc::Sender<ControllerInput>,
    snapshots: watch::Receiver<CallSnapshot>,
}

impl ControllerHandle {
    pub(super) fn new(
        inputs: mpsc::Sender<ControllerInput>,
        snapshots: watch::Receiver<CallSnapshot>,
    ) -> Self {
        Self { inputs, snapshots }
    }

    async fn command(&self, command: Command) -> Result<(), CallError> {
        self.send(ControllerInput::Command(command)).await
    }

    async fn send(&self, input: ControllerInput) -> Result<(), CallError> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| CallError::ControllerStopped)
    }

    pub async fn start_call(&self, peer: PeerProfile, kind: CallKind) -> Result<(), CallError> {
        self.command(Command::StartCall { peer, kind }).await
    }

    pub async fn accept(&self) -> Result<(), CallError> {
        self.command(Command::Accept).await
    }

    pub async fn reject(&self, reason: Option<String>) -> Result<(), CallError> {
        self.command(Command::Reject { reason }).await
    }

    pub async fn end(&self) -> Result<(), CallError> {
        self.command(Command::End).await
    }

    pub async fn toggle_mute(&self) -> Result<(), CallError> {
        self.command(Command::ToggleMute).await
    }

    pub async fn toggle_camera(&self) -> Result<(), CallError> {
        self.command(Command::ToggleCamera).await
    }

    pub async fn deliver(&self, message: ServerMessage) -> Result<(), CallError> {
        self.send(ControllerInput::Signal(message)).await
    }

    /// Ends any active call and stops the controller loop.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.send(ControllerInput::Shutdown).await
    }

    pub fn input_sender(&self) -> mpsc::Sender<ControllerInput> {
        self.inputs.clone()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    /// Waits for the first snapshot matching `predicate`, including the current one.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&CallSnapshot) -> bool,
    ) -> Result<CallSnapshot, CallError> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| CallError::ControllerStopped)?;
        Ok((*snapshot).clone())
    }
}
