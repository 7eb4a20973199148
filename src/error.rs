use std::path::PathBuf;

/// Errors raised by the synthesis engines and the playback sink.
///
/// Engines return these typed errors; only [`crate::dispatcher::Dispatcher`]
/// turns them into caller-visible status strings.
#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("text-to-speech not supported on {0}")]
    UnsupportedPlatform(String),
    #[error("command '{0}' not found in PATH")]
    CommandNotFound(String),
    #[error("{program} failed with code {}", format_code(.exit_code))]
    ProcessFailure {
        program: String,
        exit_code: Option<i32>,
        /// Captured error stream, kept for logs only.
        stderr: String,
    },
    #[error("{resource} not found (searched: {})", format_searched(.searched))]
    ResourceNotFound {
        resource: String,
        searched: Vec<PathBuf>,
    },
    #[error("playback failed: {0}")]
    Playback(String),
    /// The output device cannot render the requested format; another sink may.
    #[error("unsupported output: {0}")]
    UnsupportedOutput(String),
    #[error("synthesis failed: {0}")]
    EngineFailure(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl TtsError {
    /// True for the recoverable missing-asset case that may trigger a fallback.
    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, TtsError::ResourceNotFound { .. })
    }

    /// Failures that another engine can route around: missing model files
    /// and missing helper programs.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            TtsError::ResourceNotFound { .. } | TtsError::CommandNotFound(_)
        )
    }
}

fn format_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".to_string())
}

fn format_searched(searched: &[PathBuf]) -> String {
    if searched.is_empty() {
        return "nothing".to_string();
    }
    searched
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, TtsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_failure_message_omits_stderr() {
        let err = TtsError::ProcessFailure {
            program: "espeak".into(),
            exit_code: Some(2),
            stderr: "secret diagnostics".into(),
        };
        let msg = err.to_string();
        assert_eq!(msg, "espeak failed with code 2");
        assert!(!msg.contains("secret"));
    }

    #[test]
    fn resource_not_found_lists_searched_paths() {
        let err = TtsError::ResourceNotFound {
            resource: "kokoro-v1.0.onnx".into(),
            searched: vec![PathBuf::from("/a/x"), PathBuf::from("/b/x")],
        };
        assert!(err.is_resource_not_found());
        assert!(err.triggers_fallback());
        assert_eq!(
            err.to_string(),
            "kokoro-v1.0.onnx not found (searched: /a/x, /b/x)"
        );
    }

    #[test]
    fn only_missing_assets_and_programs_trigger_fallback() {
        assert!(TtsError::CommandNotFound("espeak-ng".into()).triggers_fallback());
        assert!(!TtsError::CommandNotFound("espeak-ng".into()).is_resource_not_found());
        assert!(!TtsError::EngineFailure("bad model".into()).triggers_fallback());
        assert!(!TtsError::Playback("device gone".into()).triggers_fallback());
        let failure = TtsError::ProcessFailure {
            program: "espeak".into(),
            exit_code: Some(1),
            stderr: String::new(),
        };
        assert!(!failure.triggers_fallback());
    }
}
