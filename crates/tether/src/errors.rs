use thiserror::Error;

/// Failures of the conversation engine.
///
/// Only `InvalidArgument` and `Startup` are ever returned to callers of the
/// agent; everything else is recovered inside the chunk stream and turned into
/// user-safe text.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tool '{name}' failed: {reason}")]
    ToolInvocation { name: String, reason: String },

    #[error("Model call failed: {0}")]
    ModelCall(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Startup failed: {0}")]
    Startup(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A working history could not be merged back into the committed one
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("committed history moved from position {forked_at} to {current} since the fork")]
    Diverged { forked_at: usize, current: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::ToolInvocation {
            name: "search".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(err.to_string().contains("search"));
        assert!(err.to_string().contains("timeout"));

        let err: EngineError = HistoryError::Diverged {
            forked_at: 2,
            current: 4,
        }
        .into();
        assert!(err.to_string().contains("from position 2 to 4"));
    }
}
