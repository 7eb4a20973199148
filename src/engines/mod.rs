//! Neural synthesis backends.
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `kokoro` - Kokoro TTS (ONNX format, espeak-ng required)

#[cfg(feature = "kokoro")]
pub mod kokoro;

use crate::SynthesisEngine;

/// The backend compiled into this build, if any.
pub fn default_engine() -> Option<Box<dyn SynthesisEngine>> {
    #[cfg(feature = "kokoro")]
    {
        Some(Box::new(kokoro::KokoroEngine::new()))
    }
    #[cfg(not(feature = "kokoro"))]
    {
        None
    }
}
