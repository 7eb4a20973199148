//! # chatty-tts
//!
//! Speak text on behalf of a calling tool, through either the operating
//! system's speech command or an embedded Kokoro model.
//!
//! ## Features
//!
//! - **System engine**: `say` on macOS, `espeak-ng`/`espeak` on Linux
//! - **Streaming engine**: Kokoro-82M ONNX, one-shot or chunk-by-chunk playback
//! - **Fallback**: a missing model degrades to the system engine instead of failing
//!
//! Cargo features: `kokoro` enables the neural backend, `playback` plays
//! through the default output device instead of a temporary WAV file.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chatty_tts::dispatcher::Dispatcher;
//! use chatty_tts::settings::{EngineKind, SettingsBuilder};
//!
//! let settings = SettingsBuilder::default()
//!     .engine(EngineKind::Streaming)
//!     .streaming(true)
//!     .build()?;
//! let dispatcher = Dispatcher::new(settings);
//!
//! // "done", "WARNING: ..." or "Error: ..."
//! println!("{}", dispatcher.speak("Hello, world!"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod dispatcher;
pub mod engines;
pub mod error;
pub mod locator;
pub mod playback;
pub mod selftest;
pub mod settings;
pub mod streaming;
pub mod system;

pub use error::{Result, TtsError};

use std::path::{Path, PathBuf};

/// The result of a one-shot synthesis.
///
/// Contains raw f32 audio samples and the sample rate of the output audio.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio (24000 for Kokoro)
    pub sample_rate: u32,
}

impl SynthesisResult {
    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration and rate formatted for logs, e.g. `"2.35s @ 24000Hz"`.
    pub fn describe(&self) -> String {
        format!("{:.2}s @ {}Hz", self.duration_secs(), self.sample_rate)
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// One incrementally produced piece of an utterance.
///
/// The sample rate is the same for every chunk of one synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl From<SynthesisResult> for AudioChunk {
    fn from(result: SynthesisResult) -> Self {
        Self {
            samples: result.samples,
            sample_rate: result.sample_rate,
        }
    }
}

/// Lazy, finite, single-pass sequence of chunks.
///
/// Each `next()` may block on model inference.
pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<AudioChunk>> + 'a>;

/// Model and voice-data files for a neural backend.
///
/// The two paths are resolved independently and may live in different places.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub voices: PathBuf,
}

/// Per-request synthesis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    /// Voice name (e.g. `"af_sarah"`, `"bf_emma"`).
    pub voice: String,
    /// Rate multiplier applied by the model itself.
    pub speed: f32,
    /// Phonemizer language; derived from the voice when `None`.
    pub lang: Option<String>,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            voice: settings::DEFAULT_VOICE.to_string(),
            speed: 1.0,
            lang: None,
        }
    }
}

/// Common interface for neural text-to-speech backends.
///
/// Output is never volume-scaled here; that is the playback sink's job.
pub trait SynthesisEngine: Send {
    /// Load model weights and voice data.
    fn load_model(&mut self, files: &ModelFiles) -> Result<()>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    fn is_loaded(&self) -> bool;

    /// Synthesize the whole utterance and return it in one buffer.
    fn synthesize(&mut self, text: &str, params: &SynthesisParams) -> Result<SynthesisResult>;

    /// Synthesize incrementally, one chunk per `next()`.
    fn synthesize_stream<'a>(
        &'a mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<ChunkStream<'a>>;

    /// Names of the voices the loaded model offers.
    fn list_voices(&self) -> Vec<String> {
        Vec::new()
    }

    /// Synthesize speech from the given text and write to a WAV file.
    ///
    /// Default implementation calls `synthesize()` then `SynthesisResult::write_wav()`.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        wav_path: &Path,
        params: &SynthesisParams,
    ) -> Result<()> {
        self.synthesize(text, params)?.write_wav(wav_path)
    }
}
