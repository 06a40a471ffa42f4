//! Error types for pipeline execution.

use std::fmt;

/// Boxed error produced by a failing transform.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced when a pipeline is collected.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A transform returned an error for one element.
    #[error("stage {stage}: element {index} failed: {source}")]
    ElementFailed {
        stage: usize,
        index: usize,
        #[source]
        source: BoxError,
    },

    /// A transform panicked while processing one element.
    #[error("stage {stage}: element {index} panicked: {message}")]
    ElementPanicked {
        stage: usize,
        index: usize,
        message: String,
    },

    /// The task running an element was cancelled before it produced a value.
    #[error("stage {stage}: element {index} was cancelled")]
    ElementCancelled { stage: usize, index: usize },

    /// A barrier observed a failed element and stopped the chain.
    #[error("pipeline aborted at stage {stage}: {cause}")]
    ChainAborted {
        stage: usize,
        #[source]
        cause: Box<PipelineError>,
    },

    /// The pipeline options are unusable.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Build an element failure from a transform error.
    pub(crate) fn element_failed(stage: usize, index: usize, error: anyhow::Error) -> Self {
        PipelineError::ElementFailed {
            stage,
            index,
            source: error.into(),
        }
    }

    /// Map a Tokio join failure onto the element that was running.
    pub(crate) fn from_join(stage: usize, index: usize, error: tokio::task::JoinError) -> Self {
        if error.is_panic() {
            let payload = error.into_panic();
            PipelineError::ElementPanicked {
                stage,
                index,
                message: panic_message(&*payload),
            }
        } else {
            PipelineError::ElementCancelled { stage, index }
        }
    }

    /// The element-level error underneath any chain abort.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::ChainAborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Position of the failing element in the original input, if any.
    pub fn index(&self) -> Option<usize> {
        match self.root_cause() {
            PipelineError::ElementFailed { index, .. }
            | PipelineError::ElementPanicked { index, .. }
            | PipelineError::ElementCancelled { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Stage in which the failing element ran, if any.
    pub fn stage(&self) -> Option<usize> {
        match self.root_cause() {
            PipelineError::ElementFailed { stage, .. }
            | PipelineError::ElementPanicked { stage, .. }
            | PipelineError::ElementCancelled { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether this error aborted the chain at a barrier.
    pub fn is_abort(&self) -> bool {
        matches!(self, PipelineError::ChainAborted { .. })
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Which failure handling a chain applies at each barrier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// The first failed element seen at a barrier aborts the whole chain.
    #[default]
    FailFast,

    /// Failed elements are carried through later stages untouched and the
    /// lowest-index failure is reported when the pipeline is collected.
    CarryForward,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::FailFast => write!(f, "fail_fast"),
            ErrorPolicy::CarryForward => write!(f, "carry_forward"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_abort() {
        let inner = PipelineError::ElementPanicked {
            stage: 2,
            index: 7,
            message: "boom".to_string(),
        };
        let err = PipelineError::ChainAborted {
            stage: 2,
            cause: Box::new(inner),
        };

        assert!(err.is_abort());
        assert_eq!(err.index(), Some(7));
        assert_eq!(err.stage(), Some(2));
        assert!(matches!(err.root_cause(), PipelineError::ElementPanicked { .. }));
    }

    #[test]
    fn test_element_failed_display() {
        let err = PipelineError::element_failed(0, 3, anyhow::anyhow!("bad input"));
        let display = format!("{}", err);
        assert!(display.contains("stage 0"));
        assert!(display.contains("element 3"));
        assert!(display.contains("bad input"));
        assert!(!err.is_abort());
    }

    #[test]
    fn test_invalid_config_has_no_position() {
        let err = PipelineError::InvalidConfig("zero".to_string());
        assert_eq!(err.index(), None);
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_panic_message_payloads() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*s), "static");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*owned), "owned");
        let other: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }

    #[test]
    fn test_error_policy_serde() {
        let policy: ErrorPolicy = serde_json::from_str("\"carry_forward\"").unwrap();
        assert_eq!(policy, ErrorPolicy::CarryForward);
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::FailFast);
        assert_eq!(ErrorPolicy::FailFast.to_string(), "fail_fast");
    }
}
