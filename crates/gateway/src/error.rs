use thiserror::Error;

/// Everything that can stop or fail one command.
///
/// All kinds except `Feature` and `RecursiveStoreAndForwardRejected` are
/// raised by the processing pipeline itself before any feature runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("command is longer than {max} characters")]
    CommandTooLong { max: usize },
    #[error("too many commands, try again later")]
    RateLimitExceeded,
    #[error("emergency lockdown is in effect")]
    EmergencyLockedDown,
    #[error("failed to match PIN/shortcut")]
    AuthenticationFailed,
    #[error("the one-time code was already used for a different command")]
    TotpReplayRejected,
    #[error("bad PLT: {0}")]
    BadPltSyntax(&'static str),
    #[error("bad prefix or feature is not configured")]
    UnknownOrUnconfiguredTrigger,
    #[error("refusing to run recursive store-and-forward command")]
    RecursiveStoreAndForwardRejected,
    #[error("{0}")]
    Feature(String),
}

impl ProcessError {
    pub fn is_framework(&self) -> bool {
        !matches!(
            self,
            ProcessError::Feature(_) | ProcessError::RecursiveStoreAndForwardRejected
        )
    }

    /// Rejections a transport may choose to answer with silence.
    pub fn is_silent_rejection(&self) -> bool {
        matches!(
            self,
            ProcessError::RateLimitExceeded | ProcessError::EmergencyLockedDown
        )
    }
}
