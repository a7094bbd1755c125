//! Engine error taxonomy.
//!
//! Three recoverable domains cross the core: engine/configuration errors
//! (host side), guest errors (guest side), and safepoint signals. Exceptions
//! crossing a guest↔host boundary are re-wrapped into the correct domain at
//! that exact boundary — see `boundary`. Internal invariant violations
//! (sharing-layer mismatch, recursive synchronous safepoints, wrapper leaks)
//! are panics, not variants here: they signal a core bug and are not meant
//! to be caught.

use strata_sdk::InteropError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Host-side errors surfaced by the engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Invalid engine or context configuration, reported at the point of misuse
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown option name, with near-miss suggestions
    #[error("Could not find option '{name}'.{}", format_suggestions(suggestions))]
    UnknownOption {
        /// The name that failed to resolve
        name: String,
        /// Fuzzy-matched near-miss option names
        suggestions: Vec<String>,
    },

    /// Invalid value supplied for a known option
    #[error("Invalid value for option '{name}': {reason}")]
    InvalidOptionValue {
        /// Option name
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The context can no longer be entered
    #[error("Context is {0} and can no longer be entered")]
    ContextClosed(crate::context::ContextState),

    /// A guest error translated to the host domain at a call boundary
    #[error("Guest error: {0}")]
    Guest(#[from] GuestError),

    /// A safepoint wait failed
    #[error(transparent)]
    Safepoint(#[from] SafepointError),

    /// Platform service initialization failed
    #[error("Platform initialization failed: {0}")]
    Platform(String),
}

/// Errors in the guest exception domain.
///
/// These are the typed, catchable errors guest code observes. Host-side
/// failures entering guest code arrive as `Host`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GuestError {
    /// Guest runtime failure
    #[error("{0}")]
    Runtime(String),

    /// Guest execution was cancelled (context cancelling/exiting)
    #[error("Execution cancelled: {0}")]
    Cancelled(String),

    /// Guest execution was interrupted at a safepoint
    #[error("Execution interrupted")]
    Interrupted,

    /// Source could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A host interop failure translated to the guest domain at a boundary
    #[error("Host error: {0}")]
    Host(#[from] InteropError),
}

impl GuestError {
    /// True for cancellation-class errors.
    ///
    /// These take priority as the primary error when failures from multiple
    /// safepoint threads are combined.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, GuestError::Cancelled(_))
    }
}

/// Errors reported by safepoint and pause waits.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SafepointError {
    /// The wait deadline elapsed; the action may still complete later
    #[error("Timed out waiting for safepoint action")]
    Timeout,

    /// The action was cancelled before completing
    #[error("Safepoint action cancelled")]
    Cancelled,

    /// One or more threads failed while executing the action.
    ///
    /// Every per-thread failure is retained: one primary (cancellation-class
    /// errors win that slot) plus the rest as suppressed.
    #[error("Safepoint action failed: {primary} ({} suppressed)", suppressed.len())]
    ActionFailed {
        /// The primary failure
        primary: GuestError,
        /// Remaining failures from other threads, never dropped
        suppressed: Vec<GuestError>,
    },
}

impl SafepointError {
    /// Combine per-thread failures into one error, cancellation first.
    pub fn combine(mut errors: Vec<GuestError>) -> Self {
        debug_assert!(!errors.is_empty());
        let primary_idx = errors
            .iter()
            .position(|e| e.is_cancellation())
            .unwrap_or(0);
        let primary = errors.remove(primary_idx);
        SafepointError::ActionFailed {
            primary,
            suppressed: errors,
        }
    }
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" Did you mean '{}'?", suggestions.join("', '"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_prefers_cancellation() {
        let combined = SafepointError::combine(vec![
            GuestError::Runtime("boom".into()),
            GuestError::Cancelled("closing".into()),
        ]);
        match combined {
            SafepointError::ActionFailed { primary, suppressed } => {
                assert!(primary.is_cancellation());
                assert_eq!(suppressed.len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_combine_keeps_all_errors() {
        let combined = SafepointError::combine(vec![
            GuestError::Runtime("a".into()),
            GuestError::Runtime("b".into()),
            GuestError::Runtime("c".into()),
        ]);
        match combined {
            SafepointError::ActionFailed { suppressed, .. } => {
                assert_eq!(suppressed.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_option_display() {
        let err = EngineError::UnknownOption {
            name: "engine.SafepointPolInterval".into(),
            suggestions: vec!["engine.SafepointPollInterval".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Did you mean"));
        assert!(msg.contains("engine.SafepointPollInterval"));
    }
}
