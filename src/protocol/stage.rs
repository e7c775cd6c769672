//! Connection stages.
//!
//! A connection's position in the authentication/loading/gameplay
//! progression gates which messages are legal for it. Stages only ever
//! advance, and only as a direct effect of successfully handling a
//! stage-appropriate message.

use crate::error::{ProtocolError, Result};

/// Strictly forward-progressing connection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Initial connection and version challenge. Nothing but the
    /// Handshake (and Disconnect) is legal here.
    Authentication,
    /// Static definitions and initial scene state are streamed.
    Loading,
    /// Steady state: per-tick scope/delta traffic, RPCs, commit markers.
    Gameplay,
}

impl Stage {
    /// Advance to `next`. Regression is a logic error and is rejected;
    /// re-entering the current stage is also rejected so that a replayed
    /// transition message cannot re-trigger transition side effects.
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if next <= *self {
            return Err(ProtocolError::ProtocolViolation(format!(
                "illegal stage transition {self:?} -> {next:?}"
            )));
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Authentication => write!(f, "authentication"),
            Stage::Loading => write!(f, "loading"),
            Stage::Gameplay => write!(f, "gameplay"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        let mut stage = Stage::Authentication;
        stage.advance(Stage::Loading).unwrap();
        stage.advance(Stage::Gameplay).unwrap();
        assert!(stage.advance(Stage::Loading).is_err());
        assert!(stage.advance(Stage::Gameplay).is_err());
        assert_eq!(stage, Stage::Gameplay);
    }

    #[test]
    fn test_skip_ahead_allowed() {
        // Loading -> Gameplay without passing through is legal for the
        // enum itself; the registry decides whether a message may cause it.
        let mut stage = Stage::Authentication;
        stage.advance(Stage::Gameplay).unwrap();
        assert_eq!(stage, Stage::Gameplay);
    }
}
