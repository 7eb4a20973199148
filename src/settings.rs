//! Per-process synthesis configuration.
//!
//! [`Settings`] is created once at startup (usually by the CLI collaborator)
//! and read by every request. Build it through [`SettingsBuilder`], which
//! validates the speed and clamps the volume:
//!
//! ```
//! use chatty_tts::settings::{EngineKind, SettingsBuilder};
//!
//! let settings = SettingsBuilder::default()
//!     .engine(EngineKind::Streaming)
//!     .streaming(true)
//!     .volume(1.7)
//!     .build()?;
//! assert_eq!(settings.volume, 1.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SPEED: f32 = 1.5;
pub const DEFAULT_VOLUME: f32 = 1.0;
pub const DEFAULT_VOICE: &str = "af_sarah";

/// Which synthesis strategy a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// External OS speech command (`say`, `espeak-ng`, `espeak`).
    #[default]
    System,
    /// Embedded neural model, one-shot or chunk streamed.
    Streaming,
}

/// What the streaming engine does when its model files cannot be located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourcePolicy {
    /// Warn and load from the backend's built-in default location.
    EngineDefaults,
    /// Raise `ResourceNotFound`; the dispatcher degrades to the system engine.
    #[default]
    FallbackToSystem,
    /// Raise `ResourceNotFound`; the request fails.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate", name = "build_unclamped", private))]
#[serde(default)]
pub struct Settings {
    pub engine: EngineKind,
    /// Play chunks as they are generated. Only read for [`EngineKind::Streaming`].
    pub streaming: bool,
    /// Rate multiplier, 1.0 is the engine's normal speed.
    pub speed: f32,
    /// Linear gain in `[0.0, 1.0]`.
    pub volume: f32,
    #[builder(setter(into))]
    pub voice: String,
    #[builder(setter(into, strip_option))]
    pub model_path: Option<PathBuf>,
    #[builder(setter(into, strip_option))]
    pub voices_path: Option<PathBuf>,
    pub resource_policy: ResourcePolicy,
    /// espeak-ng language code; derived from the voice prefix when unset.
    #[builder(setter(into, strip_option))]
    pub lang: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            streaming: false,
            speed: DEFAULT_SPEED,
            volume: DEFAULT_VOLUME,
            voice: DEFAULT_VOICE.to_string(),
            model_path: None,
            voices_path: None,
            resource_policy: ResourcePolicy::default(),
            lang: None,
        }
    }
}

impl Settings {
    /// Return a copy with the volume clamped into `[0.0, 1.0]`.
    pub fn normalized(mut self) -> Self {
        self.volume = clamp_volume(self.volume);
        self
    }
}

impl SettingsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(speed) = self.speed {
            if !speed.is_finite() || speed <= 0.0 {
                return Err(format!("speed must be a positive number, got {speed}"));
            }
        }
        if let Some(volume) = self.volume {
            if volume.is_nan() {
                return Err("volume must be a number".to_string());
            }
        }
        if let Some(voice) = &self.voice {
            if voice.trim().is_empty() {
                return Err("voice must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Build validated [`Settings`] with the volume clamped into range.
    pub fn build(&self) -> Result<Settings, SettingsBuilderError> {
        self.build_unclamped().map(Settings::normalized)
    }
}

/// Clamp a gain into `[0.0, 1.0]`; NaN is treated as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 1.0)
}

/// Example tool-host configuration, pretty-printed as JSON.
///
/// `program_dir` is the directory the host should run the server from.
pub fn example_config_json(program_dir: &std::path::Path) -> serde_json::Result<String> {
    let config = serde_json::json!({
        "mcpServers": {
            "chatty": {
                "command": "chatty-tts",
                "cwd": program_dir.display().to_string(),
                "args": [
                    "--engine", "streaming",
                    "--stream",
                    "--speed", "1.5",
                    "--volume", "0.8",
                ],
            }
        }
    });
    serde_json::to_string_pretty(&config)
}
