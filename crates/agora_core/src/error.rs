use std::time::Duration;
use thiserror::Error;

/// Failure classes seen by the decision core. None of them is fatal.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Network or timeout failure after the retry budget was spent.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The world answered with a 4xx/5xx status.
    #[error("protocol failure ({status}): {message}")]
    Protocol { status: u16, message: String },

    /// A generator or scorer failed inside one cycle.
    #[error("decision stage '{stage}' failed: {message}")]
    Decision { stage: &'static str, message: String },

    /// A guarded section could not be entered in time.
    #[error("guard '{section}' not acquired within {timeout:?}")]
    LockTimeout {
        section: &'static str,
        timeout: Duration,
    },

    /// Generated action text was malformed or incoherent.
    #[error("generated action rejected: {0}")]
    GenerationFormat(#[from] Rejection),
}

impl AgentError {
    /// Classify a failed `Reply` status into transport or protocol.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status == 0 {
            AgentError::Transport(message.into())
        } else {
            AgentError::Protocol {
                status,
                message: message.into(),
            }
        }
    }
}

/// Why a generated action was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no JSON object found in generated text")]
    NotJson,
    #[error("missing or non-string action type")]
    MissingType,
    #[error("unrecognized action type '{0}'")]
    UnknownType(String),
    #[error("action '{kind}' lacks a usable '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("message contains out-of-world content")]
    MetaContent,
    #[error("action '{kind}' contradicts current step '{step}'")]
    StepConflict { kind: &'static str, step: String },
    #[error("only conversation replies are allowed here, got '{0}'")]
    NotAConversationReply(&'static str),
}
