//! Error types for scaffold sessions
//!
//! Transport failures never appear here; the provider absorbs them. What
//! remains is local misuse (acting while gated), configuration problems and
//! failures reported by the analysis collaborator.

use crate::admission::Stage;

/// Session error
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Operation needs an admitted peer
    #[error("peer is not admitted (stage {stage})")]
    NotAdmitted {
        /// Current stage
        stage: Stage,
    },

    /// Stage change outside the admission state machine
    #[error("illegal stage transition {from} -> {to}")]
    IllegalTransition {
        /// Current stage
        from: Stage,
        /// Requested stage
        to: Stage,
    },

    /// Operation needs a graph and the document has none
    #[error("no graph in the shared document")]
    NoGraph,

    /// Analysis collaborator failed; nothing was written
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    /// Configuration could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether trying again later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Analysis(err) => err.is_retryable(),
            Self::NotAdmitted { .. } => true,
            _ => false,
        }
    }
}

/// Analysis collaborator error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// Nothing to analyse
    #[error("empty input")]
    EmptyInput,

    /// Input contained no recognisable causal statement
    #[error("no causal relationships found")]
    NothingExtracted,

    /// Node id not present in the graph
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Graph has no nodes
    #[error("graph is empty")]
    EmptyGraph,

    /// Remote analysis service failed
    #[error("upstream analysis failed: {0}")]
    Upstream(String),
}

impl AnalysisError {
    /// Whether the same request may succeed later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SessionError::from(AnalysisError::Upstream("503".into())).is_retryable());
        assert!(!SessionError::from(AnalysisError::EmptyInput).is_retryable());
        assert!(SessionError::NotAdmitted { stage: Stage::Gated }.is_retryable());
        assert!(!SessionError::NoGraph.is_retryable());
    }

    #[test]
    fn messages_name_the_stage() {
        let err = SessionError::NotAdmitted { stage: Stage::Gated };
        assert_eq!(err.to_string(), "peer is not admitted (stage gated)");
    }
}
