//! Capture trigger state

use serde::{Deserialize, Serialize};

/// Whether the capture loop should be taking photos.
///
/// Never persisted; every process start begins `Idle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum TriggerState {
    #[default]
    Idle,
    Capturing,
}

impl TriggerState {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Idle => Self::Capturing,
            Self::Capturing => Self::Idle,
        }
    }

    pub const fn is_capturing(self) -> bool {
        matches!(self, Self::Capturing)
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Capturing => write!(f, "Capturing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_parity() {
        let mut state = TriggerState::default();
        for n in 1..=7 {
            state = state.toggled();
            assert_eq!(state.is_capturing(), n % 2 == 1);
        }
    }
}
