//! Order lifecycle state machine.
//!
//! A placed order starts in `Preparing` and moves strictly forward:
//!
//! ```text
//!    place()
//!    ──────► Preparing ───► Ready ───► Completed (terminal)
//!                │            │
//!                └────────────┴──────► Cancelled (terminal)
//! ```
//!
//! Every status change goes through [`validate_transition`]; illegal
//! transitions fail with [`Error::InvalidTransition`] and must leave the
//! stored status untouched. There is no way out of a terminal state.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// All states a campus order can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Vendor accepted the order and is working on it. Initial state.
    Preparing,
    /// Ready for pickup at the vendor counter.
    Ready,
    /// Picked up / fulfilled. **Terminal.**
    Completed,
    /// Cancelled by the user or the vendor. **Terminal.**
    Cancelled,
}

impl OrderStatus {
    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Active orders feed the tracking and vendor board views; terminal
    /// orders feed the history view.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> to` is a legal edge of the lifecycle.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (Self::Preparing, Self::Ready)
                | (Self::Preparing, Self::Cancelled)
                | (Self::Ready, Self::Completed)
                | (Self::Ready, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Validate a requested status change against the current status.
///
/// Callers must check against the status they *currently hold*, not a
/// snapshot taken before an await point, so reordered responses cannot
/// smuggle an illegal edge through.
pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}
