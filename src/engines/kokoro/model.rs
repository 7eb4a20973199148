use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2};
use ort::execution_providers::CPUExecutionProvider;
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use super::phonemizer::phonemize_sentences;
use super::voices::{StyleVector, VoiceStore};
use crate::{ModelFiles, TtsError};

/// Maximum number of phoneme tokens per inference (before padding).
pub const MAX_PHONEME_LEN: usize = 510;

/// Style vector dimension for Kokoro.
pub const STYLE_DIM: usize = 256;

/// Output sample rate from the Kokoro model.
pub const SAMPLE_RATE: u32 = 24000;

/// ONNX file names tried when the model path is a directory.
const PREFERRED_ONNX: &[&str] = &["kokoro-v1.0.onnx", "kokoro-quant-convinteger.onnx"];

#[derive(thiserror::Error, Debug)]
pub enum KokoroError {
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("{} not found", .0.display())]
    MissingFile(PathBuf),
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`"
    )]
    EspeakNotFound,
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[error("Voice '{0}' not found")]
    VoiceNotFound(String),
    #[error("Model not loaded")]
    ModelNotLoaded,
    #[error("Invalid config.json: {0}")]
    Config(String),
    #[error("Failed to parse voice file: {0}")]
    VoiceParse(String),
}

impl From<KokoroError> for TtsError {
    fn from(err: KokoroError) -> Self {
        match err {
            KokoroError::MissingFile(path) => TtsError::ResourceNotFound {
                resource: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
                searched: vec![path],
            },
            KokoroError::EspeakNotFound => TtsError::CommandNotFound("espeak-ng".to_string()),
            other => TtsError::EngineFailure(other.to_string()),
        }
    }
}

/// Loaded Kokoro ONNX session plus voices and vocabulary.
pub struct KokoroModel {
    session: Session,
    voice_store: VoiceStore,
    vocab: HashMap<char, i64>,
    /// Detected input name: "input_ids" or "tokens"
    tokens_input_name: String,
    /// True if the speed input expects int32, false for float32
    speed_is_int32: bool,
}

impl KokoroModel {
    /// Load the model and voice archive.
    ///
    /// `files.model` may name an `.onnx` file or a directory containing one.
    /// A `config.json` next to the model overrides the built-in vocabulary.
    pub fn load(files: &ModelFiles, num_threads: Option<usize>) -> Result<Self, KokoroError> {
        let onnx_path = find_onnx_file(&files.model)?;
        if !files.voices.is_file() {
            return Err(KokoroError::MissingFile(files.voices.clone()));
        }

        log::info!("Loading Kokoro model from {}", onnx_path.display());
        let session = init_session(&onnx_path, num_threads)?;
        let tokens_input_name = detect_tokens_input(&session);
        let speed_is_int32 = detect_speed_type(&session);
        log::debug!(
            "Detected: tokens_input='{}', speed_is_int32={}",
            tokens_input_name,
            speed_is_int32
        );

        let voice_store = VoiceStore::load(&files.voices)?;

        let config_path = onnx_path.with_file_name("config.json");
        let vocab = if config_path.is_file() {
            log::info!("Loading vocab from {}", config_path.display());
            super::vocab::load_vocab(&config_path)?
        } else {
            log::debug!("config.json not found, using hardcoded vocab");
            super::vocab::hardcoded_vocab()
        };

        Ok(Self {
            session,
            voice_store,
            vocab,
            tokens_input_name,
            speed_is_int32,
        })
    }

    /// Phonemize `text` into per-sentence token sequences, each at most
    /// [`MAX_PHONEME_LEN`] long.
    pub fn segments(&self, text: &str, lang: &str) -> Result<Vec<Vec<i64>>, KokoroError> {
        let sentences = phonemize_sentences(text, lang, &self.vocab)?;
        Ok(sentences
            .iter()
            .flat_map(|ids| split_long(ids))
            .collect())
    }

    /// Style vector for a voice, indexed by the utterance's token count.
    pub fn style(&self, voice: &str, token_count: usize) -> Result<StyleVector, KokoroError> {
        self.voice_store.get_style(voice, token_count)
    }

    pub fn has_voice(&self, voice: &str) -> bool {
        self.voice_store.contains(voice)
    }

    /// Run ONNX inference on a single sequence of phoneme token IDs.
    pub fn infer(
        &mut self,
        tokens: &[i64],
        style: &StyleVector,
        speed: f32,
    ) -> Result<Vec<f32>, KokoroError> {
        // [[0, t1..tN, 0]]
        let mut padded = Vec::with_capacity(tokens.len() + 2);
        padded.push(0);
        padded.extend_from_slice(tokens);
        padded.push(0);
        let tokens_arr = Array2::from_shape_vec((1, padded.len()), padded)?;
        let style_view = ArrayView2::from_shape((1, STYLE_DIM), style.as_slice())?;

        let output = if self.speed_is_int32 {
            let speed_arr = ndarray::arr1(&[(speed as i32).max(1)]);
            self.session.run(inputs![
                self.tokens_input_name.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ])?
        } else {
            let speed_arr = ndarray::arr1(&[speed]);
            self.session.run(inputs![
                self.tokens_input_name.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ])?
        };

        let (_, waveform) = output
            .iter()
            .next()
            .ok_or_else(|| KokoroError::Ort(ort::Error::new("No output from model")))?;
        let waveform = waveform.try_extract_array::<f32>()?;
        Ok(waveform.iter().copied().collect())
    }

    /// List all available voice names.
    pub fn list_voices(&self) -> Vec<&str> {
        self.voice_store.list_voices()
    }
}

fn find_onnx_file(model_path: &Path) -> Result<PathBuf, KokoroError> {
    if model_path.is_file() {
        return Ok(model_path.to_path_buf());
    }
    if !model_path.is_dir() {
        return Err(KokoroError::MissingFile(model_path.to_path_buf()));
    }

    if let Some(found) = PREFERRED_ONNX
        .iter()
        .map(|name| model_path.join(name))
        .find(|p| p.is_file())
    {
        return Ok(found);
    }

    for entry in std::fs::read_dir(model_path)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("onnx") {
            return Ok(path);
        }
    }
    Err(KokoroError::MissingFile(model_path.join(PREFERRED_ONNX[0])))
}

fn init_session(onnx_path: &Path, num_threads: Option<usize>) -> Result<Session, KokoroError> {
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_execution_providers([CPUExecutionProvider::default().build()])?;

    if let Some(threads) = num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    Ok(builder.commit_from_file(onnx_path)?)
}

/// Detect the token input name ("input_ids" or "tokens") from session inputs.
fn detect_tokens_input(session: &Session) -> String {
    session
        .inputs()
        .iter()
        .map(|input| input.name())
        .find(|name| *name == "input_ids" || *name == "tokens")
        .unwrap_or("input_ids")
        .to_string()
}

/// Detect whether the speed input expects int32 (true) or float32 (false).
fn detect_speed_type(session: &Session) -> bool {
    session
        .inputs()
        .iter()
        .find(|input| input.name() == "speed")
        .map(|input| format!("{:?}", input.dtype()).to_lowercase().contains("int32"))
        // modern Kokoro exports use int32
        .unwrap_or(true)
}

/// Split a token sequence longer than [`MAX_PHONEME_LEN`], preferring to cut
/// after punctuation.
pub(crate) fn split_long(ids: &[i64]) -> Vec<Vec<i64>> {
    // Punctuation IDs (hardcoded vocab): ';':1 ':':2 ',':3 '.':4 '!':5 '?':6
    const PUNCT_IDS: &[i64] = &[1, 2, 3, 4, 5, 6];

    let mut chunks = Vec::new();
    let mut rest = ids;
    while rest.len() > MAX_PHONEME_LEN {
        let window = &rest[..MAX_PHONEME_LEN];
        let cut = window
            .iter()
            .rposition(|id| PUNCT_IDS.contains(id))
            .map(|i| i + 1)
            .unwrap_or(MAX_PHONEME_LEN);
        chunks.push(rest[..cut].to_vec());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_vec());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sequences_are_not_split() {
        assert_eq!(split_long(&[1, 2, 3]), vec![vec![1, 2, 3]]);
        assert!(split_long(&[]).is_empty());
    }

    #[test]
    fn long_sequences_split_after_last_punctuation() {
        let mut ids = vec![50i64; 600];
        ids[300] = 3;
        let chunks = split_long(&ids);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 301);
        assert_eq!(chunks[1].len(), 299);
    }

    #[test]
    fn long_sequences_without_punctuation_split_at_limit() {
        let chunks = split_long(&vec![50i64; 1100]);
        let lens: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![510, 510, 80]);
    }

    #[test]
    fn missing_model_path_is_resource_not_found() {
        let err = find_onnx_file(Path::new("/nope/kokoro-v1.0.onnx")).unwrap_err();
        let tts: TtsError = err.into();
        assert!(tts.is_resource_not_found());
        assert!(tts.to_string().contains("kokoro-v1.0.onnx"));
    }

    #[test]
    fn prefers_named_onnx_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.onnx"), b"x").unwrap();
        std::fs::write(dir.path().join("kokoro-v1.0.onnx"), b"x").unwrap();
        assert_eq!(
            find_onnx_file(dir.path()).unwrap(),
            dir.path().join("kokoro-v1.0.onnx")
        );
    }
}
