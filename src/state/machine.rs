/// Finite-state core of an edit session
///
/// The machine tracks whether a session is idle, loading, ready to edit, or
/// saving, and enforces legal transitions. The Ready and Saving variants own
/// the asset handle and editing input, so whenever a save is possible both
/// are guaranteed present; there is no nullable field to check.
use crate::error::EditorError;
use crate::state::data::{AssetHandle, EditingInput};

/// Coarse session phase, published to observers after every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Loading,
    Ready,
    Saving,
}

/// Everything the save path needs, cloned out of the Ready state
#[derive(Debug, Clone)]
pub struct SaveContext {
    pub asset: AssetHandle,
    pub input: EditingInput,
}

enum State {
    Idle,
    Loading,
    Ready {
        asset: AssetHandle,
        input: EditingInput,
    },
    Saving {
        asset: AssetHandle,
        input: EditingInput,
    },
}

pub struct SessionStateMachine {
    state: State,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            State::Idle => SessionPhase::Idle,
            State::Loading => SessionPhase::Loading,
            State::Ready { .. } => SessionPhase::Ready,
            State::Saving { .. } => SessionPhase::Saving,
        }
    }

    /// Asset held by the session, if any
    pub fn asset(&self) -> Option<AssetHandle> {
        match &self.state {
            State::Ready { asset, .. } | State::Saving { asset, .. } => Some(*asset),
            _ => None,
        }
    }

    /// Editing input held by the session, if any
    pub fn input(&self) -> Option<&EditingInput> {
        match &self.state {
            State::Ready { input, .. } | State::Saving { input, .. } => Some(input),
            _ => None,
        }
    }

    /// Start an open attempt; legal only from Idle
    ///
    /// A second open while one is already loading (or a save is in flight)
    /// is rejected, which is what keeps at most one asynchronous operation
    /// in flight per session.
    pub fn begin_open(&mut self) -> Result<(), EditorError> {
        match self.state {
            State::Idle => {
                self.state = State::Loading;
                Ok(())
            }
            _ => Err(self.invalid("open")),
        }
    }

    /// Resolve the open attempt
    ///
    /// On success the session becomes Ready and owns the handle and input.
    /// On failure it returns to Idle with nothing retained.
    pub fn complete_open(
        &mut self,
        outcome: Result<(AssetHandle, EditingInput), EditorError>,
    ) -> Result<(), EditorError> {
        match self.state {
            State::Loading => match outcome {
                Ok((asset, input)) => {
                    self.state = State::Ready { asset, input };
                    Ok(())
                }
                Err(err) => {
                    self.state = State::Idle;
                    Err(err)
                }
            },
            _ => Err(self.invalid("complete open")),
        }
    }

    /// Start a save attempt; legal only from Ready
    ///
    /// Returns clones of the handle and input for the save path. Outside
    /// Ready there is structurally nothing to save, so this guard is all the
    /// commit protocol needs.
    pub fn begin_save(&mut self) -> Result<SaveContext, EditorError> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        match state {
            State::Ready { asset, input } => {
                let ctx = SaveContext {
                    asset,
                    input: input.clone(),
                };
                self.state = State::Saving { asset, input };
                Ok(ctx)
            }
            other => {
                self.state = other;
                Err(self.invalid("save"))
            }
        }
    }

    /// Resolve the save attempt
    ///
    /// The session returns to Ready either way, keeping the handle and
    /// input, so a failed save can be retried.
    pub fn complete_save(&mut self, outcome: Result<(), EditorError>) -> Result<(), EditorError> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        match state {
            State::Saving { asset, input } => {
                self.state = State::Ready { asset, input };
                outcome
            }
            other => {
                self.state = other;
                Err(self.invalid("complete save"))
            }
        }
    }

    /// Abort an in-flight open; legal only from Loading
    pub fn cancel(&mut self) -> Result<(), EditorError> {
        match self.state {
            State::Loading => {
                self.state = State::Idle;
                Ok(())
            }
            _ => Err(self.invalid("cancel")),
        }
    }

    /// Drop everything and return to Idle (session teardown)
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    fn invalid(&self, operation: &'static str) -> EditorError {
        EditorError::InvalidState {
            operation,
            phase: self.phase(),
        }
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
