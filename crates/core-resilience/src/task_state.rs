//! Task lifecycle states and their legal transitions
//!
//! ```text
//! Pending ──► Downloading ──► Assembling ──► Uploading ──► Succeeded
//!    │             │              │              │
//!    └─────────────┴──────────────┴──────────────┴──► Failed | Cancelled
//! ```
//!
//! `Downloading ──► Uploading` is also legal (direct streaming of an item whose
//! assembly step is trivial) and `Pending ──► Uploading` covers server-side copies
//! that never touch local disk.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a transfer task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Pending,
    Downloading,
    Assembling,
    Uploading,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Failed) | (_, Cancelled) => true,
            (Pending, Downloading) | (Pending, Uploading) => true,
            (Downloading, Assembling) | (Downloading, Uploading) => true,
            (Assembling, Uploading) => true,
            (Uploading, Succeeded) => true,
            // A download-only task ends once its file is assembled
            (Assembling, Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Downloading => "downloading",
            TaskState::Assembling => "assembling",
            TaskState::Uploading => "uploading",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}
