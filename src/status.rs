//! Stage transition events.
//!
//! Every component reports `running`/`success`/... transitions through a
//! [`Reporter`]. Events always go to `tracing`; a caller that wants to render
//! progress can additionally subscribe to a channel of [`StageEvent`]s.

use crate::message::Stage;
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Running,
    Success,
    Warning,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub state: StageState,
    pub detail: String,
}

/// Cloneable sink for [`StageEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<UnboundedSender<StageEvent>>,
}

impl Reporter {
    /// Reporter that only logs.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Reporter paired with a receiver of every emitted event.
    pub fn channel() -> (Self, UnboundedReceiver<StageEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, stage: Stage, state: StageState, detail: impl Into<String>) {
        let detail = detail.into();
        match state {
            StageState::Warning | StageState::Failed => {
                warn!(%stage, ?state, %detail, "stage update")
            }
            _ => info!(%stage, ?state, %detail, "stage update"),
        }
        if let Some(tx) = &self.tx {
            // receiver dropped means nobody is listening any more
            let _ = tx.send(StageEvent {
                stage,
                state,
                detail,
            });
        }
    }

    pub fn running(&self, stage: Stage, detail: impl Into<String>) {
        self.emit(stage, StageState::Running, detail)
    }

    pub fn success(&self, stage: Stage, detail: impl Into<String>) {
        self.emit(stage, StageState::Success, detail)
    }

    pub fn warning(&self, stage: Stage, detail: impl Into<String>) {
        self.emit(stage, StageState::Warning, detail)
    }

    pub fn failed(&self, stage: Stage, detail: impl Into<String>) {
        self.emit(stage, StageState::Failed, detail)
    }
}
