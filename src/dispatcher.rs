//! Request dispatcher.
//!
//! [`Dispatcher::speak`] routes one utterance to the configured engine, wires
//! the audio into the playback sink and folds every failure into one of three
//! outcomes: `done`, `WARNING: ...` (spoken, but by the system engine instead
//! of the requested one) or `Error: ...`.
//!
//! Streaming-engine availability is tracked by [`EngineState`]:
//!
//! ```text
//! NotStarted      --init ok-------------------------------> StreamingActive
//! NotStarted      --missing file/program + fallback-------> FallenBackToSystem
//! NotStarted      --any other failure---------------------> Failed
//! StreamingActive --missing program before audio+fallback-> FallenBackToSystem
//! any             --reset()-------------------------------> NotStarted
//! ```
//!
//! Initialization is attempted once; the resulting state sticks until
//! [`Dispatcher::reset`]. A missing helper program (espeak-ng for the
//! phonemizer) may only surface on the first synthesis, so that case can
//! still move an active engine to the fallback.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::engines;
use crate::error::{Result, TtsError};
use crate::playback::{Playback, StopHandle};
use crate::settings::{EngineKind, ResourcePolicy, Settings};
use crate::streaming::{params_from, StreamingEngine};
use crate::system::SystemEngine;

/// Availability of the streaming engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    StreamingActive,
    FallenBackToSystem { reason: String },
    Failed { reason: String },
}

/// Input to [`transition`].
#[derive(Debug)]
pub enum InitEvent<'a> {
    Initialized,
    InitFailed(&'a TtsError),
    /// A request failed before any audio reached the output.
    SynthesisFailed(&'a TtsError),
    Reset,
}

/// The single transition function of the streaming-engine state machine.
pub fn transition(state: &EngineState, event: InitEvent<'_>, policy: ResourcePolicy) -> EngineState {
    match (state, event) {
        (_, InitEvent::Reset) => EngineState::NotStarted,
        (EngineState::NotStarted, InitEvent::Initialized) => EngineState::StreamingActive,
        (EngineState::NotStarted, InitEvent::InitFailed(err))
        | (EngineState::StreamingActive, InitEvent::SynthesisFailed(err))
            if err.triggers_fallback() && policy == ResourcePolicy::FallbackToSystem =>
        {
            EngineState::FallenBackToSystem {
                reason: err.to_string(),
            }
        }
        (EngineState::NotStarted, InitEvent::InitFailed(err)) => EngineState::Failed {
            reason: err.to_string(),
        },
        // initialization only runs from NotStarted; other request failures
        // leave an active engine active
        (other, _) => other.clone(),
    }
}

/// Caller-visible result of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    Done,
    /// Spoken, but only after substituting the system engine.
    Degraded(String),
    Error(String),
}

impl SpeakOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SpeakOutcome::Error(_))
    }
}

impl fmt::Display for SpeakOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakOutcome::Done => f.write_str("done"),
            SpeakOutcome::Degraded(msg) => write!(f, "WARNING: {msg}"),
            SpeakOutcome::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

/// Where a streaming request failed relative to the audio output.
enum PlayError {
    BeforeAudio(TtsError),
    AfterAudio(TtsError),
}

struct StreamingSlot {
    engine: Option<StreamingEngine>,
    state: EngineState,
}

/// Owns the engines, the playback sink and the per-process settings.
///
/// `Dispatcher` is `Sync`; concurrent requests serialize on the streaming
/// engine and on the audio output, in that order.
pub struct Dispatcher {
    settings: Settings,
    system: SystemEngine,
    streaming: Mutex<StreamingSlot>,
    playback: Mutex<Playback>,
    stop: StopHandle,
}

impl Dispatcher {
    /// Dispatcher with the host's system engine, the compiled-in neural
    /// backend (if any) and the default audio output.
    pub fn new(settings: Settings) -> Self {
        let streaming = engines::default_engine()
            .map(|backend| StreamingEngine::new(backend, &settings));
        Self::with_parts(settings, SystemEngine::new(), streaming, Playback::default_output())
    }

    pub fn with_parts(
        settings: Settings,
        system: SystemEngine,
        streaming: Option<StreamingEngine>,
        playback: Playback,
    ) -> Self {
        let settings = settings.normalized();
        log::info!(
            "Dispatcher ready: engine={:?} streaming={} speed={} volume={} voice={}",
            settings.engine,
            settings.streaming,
            settings.speed,
            settings.volume,
            settings.voice
        );
        let stop = playback.stop_handle();
        Self {
            settings,
            system,
            streaming: Mutex::new(StreamingSlot {
                engine: streaming,
                state: EngineState::NotStarted,
            }),
            playback: Mutex::new(playback),
            stop,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current streaming-engine state.
    pub fn state(&self) -> EngineState {
        match self.streaming.lock() {
            Ok(slot) => slot.state.clone(),
            Err(poisoned) => poisoned.into_inner().state.clone(),
        }
    }

    /// Handle that interrupts chunked playback after the current chunk.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Forget a failed or fallen-back initialization; the next streaming
    /// request tries again.
    pub fn reset(&self) {
        let mut slot = match self.streaming.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(engine) = slot.engine.as_mut() {
            engine.unload();
        }
        slot.state = transition(&slot.state, InitEvent::Reset, self.settings.resource_policy);
        log::info!("Streaming engine reset");
    }

    /// Speak `text`, returning `"done"`, `"WARNING: ..."` or `"Error: ..."`.
    pub fn speak(&self, text: &str) -> String {
        self.speak_outcome(text).to_string()
    }

    pub fn speak_outcome(&self, text: &str) -> SpeakOutcome {
        log::info!(
            "TTS request: {} chars via {:?} engine",
            text.chars().count(),
            self.settings.engine
        );
        if text.trim().is_empty() {
            log::debug!("Empty text, nothing to speak");
            return SpeakOutcome::Done;
        }

        let outcome = match self.settings.engine {
            EngineKind::System => self.speak_system(text).map(|()| SpeakOutcome::Done),
            EngineKind::Streaming => self.speak_streaming(text),
        };

        match outcome {
            Ok(outcome) => {
                match &outcome {
                    SpeakOutcome::Degraded(msg) => log::warn!("TTS degraded: {msg}"),
                    _ => log::info!("TTS completed successfully"),
                }
                outcome
            }
            Err(e) => {
                log::error!("TTS failed: {e}");
                SpeakOutcome::Error(e.to_string())
            }
        }
    }

    fn speak_system(&self, text: &str) -> Result<()> {
        // the child process owns the output device while it runs
        let _device = self.lock_playback()?;
        self.system
            .speak_system(text, self.settings.speed, self.settings.volume)
    }

    fn speak_streaming(&self, text: &str) -> Result<SpeakOutcome> {
        let mut slot = self
            .streaming
            .lock()
            .map_err(|e| TtsError::EngineFailure(format!("streaming engine lock poisoned: {e}")))?;

        if slot.state == EngineState::NotStarted {
            let init = match slot.engine.as_mut() {
                Some(engine) => engine.initialize(),
                None => Err(TtsError::EngineFailure(
                    "no streaming backend in this build (enable the `kokoro` feature)".into(),
                )),
            };
            let event = match &init {
                Ok(()) => InitEvent::Initialized,
                Err(e) => {
                    log::warn!("Streaming engine initialization failed: {e}");
                    InitEvent::InitFailed(e)
                }
            };
            slot.state = transition(&slot.state, event, self.settings.resource_policy);
            log::debug!("Streaming engine state: {:?}", slot.state);
        }

        match slot.state.clone() {
            EngineState::StreamingActive => {
                let engine = slot
                    .engine
                    .as_mut()
                    .ok_or_else(|| TtsError::EngineFailure("streaming engine missing".into()))?;
                let failure = match self.play_streaming(engine, text) {
                    Ok(()) => return Ok(SpeakOutcome::Done),
                    Err(PlayError::AfterAudio(e)) => return Err(e),
                    Err(PlayError::BeforeAudio(e)) => e,
                };
                slot.state = transition(
                    &slot.state,
                    InitEvent::SynthesisFailed(&failure),
                    self.settings.resource_policy,
                );
                match slot.state.clone() {
                    EngineState::FallenBackToSystem { reason } => {
                        drop(slot);
                        self.fall_back(text, &reason)
                    }
                    _ => Err(failure),
                }
            }
            EngineState::FallenBackToSystem { reason } => {
                drop(slot);
                self.fall_back(text, &reason)
            }
            EngineState::Failed { reason } => Err(TtsError::EngineFailure(format!(
                "streaming engine unavailable: {reason}"
            ))),
            EngineState::NotStarted => Err(TtsError::EngineFailure(
                "streaming engine was not initialized".into(),
            )),
        }
    }

    fn fall_back(&self, text: &str, reason: &str) -> Result<SpeakOutcome> {
        log::warn!("Falling back to system TTS: {reason}");
        match self.speak_system(text) {
            Ok(()) => Ok(SpeakOutcome::Degraded(format!(
                "streaming engine unavailable ({reason}); spoke with system TTS instead"
            ))),
            Err(e) => Err(TtsError::EngineFailure(format!(
                "streaming engine unavailable ({reason}) and system fallback failed: {e}"
            ))),
        }
    }

    fn play_streaming(
        &self,
        engine: &mut StreamingEngine,
        text: &str,
    ) -> std::result::Result<(), PlayError> {
        let params = params_from(&self.settings);
        let volume = self.settings.volume;

        if self.settings.streaming {
            let mut chunks = engine
                .synthesize_stream(text, &params)
                .map_err(PlayError::BeforeAudio)?
                .peekable();
            // the first chunk carries any phonemizer failure
            if matches!(chunks.peek(), Some(Err(_))) {
                if let Some(Err(e)) = chunks.next() {
                    return Err(PlayError::BeforeAudio(e));
                }
            }
            let mut playback = self.lock_playback().map_err(PlayError::BeforeAudio)?;
            playback
                .play_stream(chunks, volume)
                .map_err(PlayError::AfterAudio)?;
        } else {
            let audio = engine
                .synthesize(text, &params)
                .map_err(PlayError::BeforeAudio)?;
            log::info!("Synthesized {}", audio.describe());
            let mut playback = self.lock_playback().map_err(PlayError::BeforeAudio)?;
            playback
                .play_buffer(&audio.samples, audio.sample_rate, volume)
                .map_err(PlayError::AfterAudio)?;
        }
        Ok(())
    }

    fn lock_playback(&self) -> Result<MutexGuard<'_, Playback>> {
        self.playback
            .lock()
            .map_err(|e| TtsError::Playback(format!("audio output lock poisoned: {e}")))
    }
}
