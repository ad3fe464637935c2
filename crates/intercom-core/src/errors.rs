use serde::{Deserialize, Serialize};

/// Coarse classification shared by every control-plane error.
///
/// All kinds are local and recoverable; callers use the kind to decide
/// whether a retry makes sense.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected synchronously, state unchanged.
    Validation,
    /// Connection failed, send failed or unexpected close. Forces the
    /// session toward `Closed`.
    Transport,
    /// A playback command failed. Never closes the session.
    Sequencer,
    /// Persistence or other local failure.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Transport => "transport",
            Self::Sequencer => "sequencer",
            Self::Internal => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport | Self::Internal)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ErrorKind::Transport.is_retryable());
        assert!(ErrorKind::Internal.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Sequencer.is_retryable());
    }

    #[test]
    fn kind_strings() {
        assert_eq!(ErrorKind::Validation.to_string(), "validation");
        assert_eq!(ErrorKind::Sequencer.as_str(), "sequencer");
    }
}
