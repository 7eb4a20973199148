use crate::{
    ChunkStream, ModelFiles, Result, SynthesisEngine, SynthesisParams, SynthesisResult, TtsError,
};

use super::model::{KokoroError, KokoroModel, SAMPLE_RATE};
use super::phonemizer::voice_lang;
use super::stream::{append_with_crossfade, KokoroStream, CROSSFADE_SAMPLES};

/// Parameters for configuring Kokoro model loading.
#[derive(Debug, Clone, Default)]
pub struct KokoroModelParams {
    /// Number of CPU threads to use for inference.
    /// `None` uses the ORT default (typically all available cores).
    pub num_threads: Option<usize>,
}

/// Kokoro text-to-speech engine.
///
/// Uses the Kokoro-82M ONNX model. Requires espeak-ng for phonemization.
///
/// ```rust,no_run
/// use chatty_tts::engines::kokoro::KokoroEngine;
/// use chatty_tts::{ModelFiles, SynthesisEngine, SynthesisParams};
///
/// let mut engine = KokoroEngine::new();
/// engine.load_model(&ModelFiles {
///     model: "kokoro-v1.0.onnx".into(),
///     voices: "voices-v1.0.bin".into(),
/// })?;
/// for chunk in engine.synthesize_stream("One. Two.", &SynthesisParams::default())? {
///     println!("{} samples", chunk?.samples.len());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct KokoroEngine {
    model: Option<KokoroModel>,
    params: KokoroModelParams,
}

impl Default for KokoroEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KokoroEngine {
    pub fn new() -> Self {
        Self::with_params(KokoroModelParams::default())
    }

    pub fn with_params(params: KokoroModelParams) -> Self {
        Self { model: None, params }
    }

    /// Phonemize and set up a stream without running any inference yet.
    fn open_stream(
        &mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> std::result::Result<KokoroStream<'_>, KokoroError> {
        let model = self.model.as_mut().ok_or(KokoroError::ModelNotLoaded)?;
        if !model.has_voice(&params.voice) {
            return Err(KokoroError::VoiceNotFound(params.voice.clone()));
        }

        let lang = params
            .lang
            .as_deref()
            .unwrap_or_else(|| voice_lang(&params.voice));
        let segments = model.segments(text, lang)?;
        let token_count: usize = segments.iter().map(Vec::len).sum();
        if segments.is_empty() {
            log::warn!("No phoneme tokens produced for text: {text:?}");
        }

        // one style for the whole utterance keeps prosody stable across segments
        let style = model.style(&params.voice, token_count)?;
        log::debug!(
            "Kokoro: {} segments, {token_count} tokens, voice={}, lang={lang}",
            segments.len(),
            params.voice
        );
        Ok(KokoroStream::new(model, segments, style, params.speed))
    }
}

impl Drop for KokoroEngine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl SynthesisEngine for KokoroEngine {
    fn load_model(&mut self, files: &ModelFiles) -> Result<()> {
        let model = KokoroModel::load(files, self.params.num_threads)?;
        self.model = Some(model);
        Ok(())
    }

    fn unload_model(&mut self) {
        self.model = None;
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn synthesize(&mut self, text: &str, params: &SynthesisParams) -> Result<SynthesisResult> {
        let mut samples = Vec::new();
        for chunk in self.open_stream(text, params)? {
            append_with_crossfade(&mut samples, &chunk?.samples, CROSSFADE_SAMPLES);
        }
        Ok(SynthesisResult {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }

    fn synthesize_stream<'a>(
        &'a mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<ChunkStream<'a>> {
        let stream = self.open_stream(text, params)?;
        Ok(Box::new(stream.map(|chunk| chunk.map_err(TtsError::from))))
    }

    fn list_voices(&self) -> Vec<String> {
        self.model
            .as_ref()
            .map(|m| m.list_voices().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_without_model_fails() {
        let mut engine = KokoroEngine::new();
        assert!(!engine.is_loaded());
        let err = engine
            .synthesize("hello", &SynthesisParams::default())
            .unwrap_err();
        assert!(matches!(err, TtsError::EngineFailure(ref m) if m.contains("not loaded")));
    }

    #[test]
    fn loading_missing_files_reports_resource_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = KokoroEngine::new();
        let err = engine
            .load_model(&ModelFiles {
                model: dir.path().join("kokoro-v1.0.onnx"),
                voices: dir.path().join("voices-v1.0.bin"),
            })
            .unwrap_err();
        assert!(err.is_resource_not_found());
        assert!(!engine.is_loaded());
    }
}
