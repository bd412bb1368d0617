//! Error taxonomy for the photo-to-seed pipeline
//!
//! Every variant is caught at the narrowest scope that can substitute a
//! degraded result. Display strings double as diagnostic lines, so they stay
//! on a single line and never carry backtraces.

use thiserror::Error;

/// Errors raised inside the pipeline
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Input was not declared as an image
    #[error("unsupported media type '{0}'")]
    UnsupportedMedia(String),

    /// Image bytes could not be decoded
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// A recognition engine is missing or unsupported in this runtime
    #[error("{engine} unavailable: {reason}")]
    EngineUnavailable { engine: &'static str, reason: String },

    /// A single variant/region call exceeded its timeout slice
    #[error("{engine} timed out after {timeout_ms}ms ({label})")]
    EngineTimeout {
        engine: &'static str,
        label: String,
        timeout_ms: u64,
    },

    /// An engine failed while processing an image
    #[error("{engine} error: {reason}")]
    Recognition { engine: &'static str, reason: String },

    /// Palette-derived seed violated the digit-string invariant
    #[error("palette mapping did not produce a valid seed (got '{0}')")]
    Mapping(String),
}

impl PipelineError {
    /// Shorthand for a recognition failure
    pub fn recognition(engine: &'static str, reason: impl ToString) -> Self {
        Self::Recognition {
            engine,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an unavailable engine
    pub fn unavailable(engine: &'static str, reason: impl ToString) -> Self {
        Self::EngineUnavailable {
            engine,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = PipelineError::recognition("trained recognizer", "bad tensor shape");
        assert!(err.to_string().starts_with("trained recognizer error:"));

        let err = PipelineError::EngineTimeout {
            engine: "structural detector",
            label: "center-crop".to_string(),
            timeout_ms: 220,
        };
        assert_eq!(
            err.to_string(),
            "structural detector timed out after 220ms (center-crop)"
        );
    }
}
