//! Kokoro-82M text-to-speech backend.
//!
//! Runs the Kokoro-82M ONNX model through `ort`, with espeak-ng producing
//! the phonemes.
//!
//! # System Requirements
//!
//! **espeak-ng** must be installed:
//! - **Linux**: `sudo apt-get install espeak-ng`
//! - **macOS**: `brew install espeak-ng`
//!
//! # Files
//!
//! ```text
//! kokoro-v1.0.onnx    # model weights
//! voices-v1.0.bin     # voice style vectors (.npz archive)
//! config.json         # optional, next to the model: vocabulary
//! ```
//!
//! The two required files are found by [`crate::locator::ResourceLocator`]
//! and may live in different directories.
//!
//! # Streaming
//!
//! Text is phonemized once, cut into sentences (and again at the model's
//! 510-token limit), and each segment is synthesized only when the consumer
//! asks for it. One-shot synthesis runs the same segments and joins them with
//! a 10 ms crossfade.
//!
//! # Voice Naming Convention
//!
//! Voices follow the pattern `{language_prefix}_{name}`; the prefix picks the
//! espeak-ng language (`af_`/`am_` American English, `bf_`/`bm_` British
//! English, `ef_` Spanish, `ff_` French, `hf_` Hindi, `if_` Italian, `jf_`
//! Japanese, `pf_` Brazilian Portuguese, `zf_` Mandarin).

pub mod engine;
pub mod model;
pub mod phonemizer;
pub mod stream;
pub mod vocab;
pub mod voices;

pub use engine::{KokoroEngine, KokoroModelParams};
pub use model::{KokoroError, SAMPLE_RATE};
pub use stream::KokoroStream;
