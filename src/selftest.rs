//! Engine self-tests for the `--test-voice` utility mode.
//!
//! Each test speaks a fixed message and reports plain success or failure;
//! the binary turns the combined result into exit status 0 or 1.

use crate::engines;
use crate::error::{Result, TtsError};
use crate::playback::Playback;
use crate::settings::Settings;
use crate::streaming::{params_from, StreamingEngine};
use crate::system::SystemEngine;

pub const TEST_MESSAGE: &str = "Hello, this is a test of the Chatty text-to-speech system. \
     If you hear this message, the voice engine is working correctly.";

/// Speak [`TEST_MESSAGE`] with the system command.
pub fn test_system_voice(engine: &SystemEngine, settings: &Settings) -> bool {
    log::info!("Testing system TTS engine...");
    report(
        "System",
        engine.speak_system(TEST_MESSAGE, settings.speed, settings.volume),
    )
}

/// Speak [`TEST_MESSAGE`] with the streaming engine, honoring
/// `settings.streaming`. There is no fallback here: a missing model fails.
pub fn test_streaming_voice(
    engine: Option<&mut StreamingEngine>,
    playback: &mut Playback,
    settings: &Settings,
) -> bool {
    log::info!("Testing streaming TTS engine...");
    let result = match engine {
        Some(engine) => run_streaming(engine, playback, settings),
        None => Err(TtsError::EngineFailure(
            "no streaming backend in this build".into(),
        )),
    };
    report("Streaming", result)
}

fn run_streaming(
    engine: &mut StreamingEngine,
    playback: &mut Playback,
    settings: &Settings,
) -> Result<()> {
    engine.initialize()?;
    log::info!("{} voices available", engine.list_voices().len());
    let params = params_from(settings);
    if settings.streaming {
        let chunks = engine.synthesize_stream(TEST_MESSAGE, &params)?;
        playback.play_stream(chunks, settings.volume)?;
    } else {
        let audio = engine.synthesize(TEST_MESSAGE, &params)?;
        playback.play_buffer(&audio.samples, audio.sample_rate, settings.volume)?;
    }
    Ok(())
}

/// Run the requested self-tests against the host's engines.
///
/// Returns `true` only if every requested test succeeded.
pub fn run_self_tests(settings: &Settings, system: bool, streaming: bool) -> bool {
    let mut ok = true;
    if streaming {
        let mut engine = engines::default_engine()
            .map(|backend| StreamingEngine::new(backend, settings));
        let mut playback = Playback::default_output();
        ok &= test_streaming_voice(engine.as_mut(), &mut playback, settings);
    }
    if system {
        ok &= test_system_voice(&SystemEngine::new(), settings);
    }
    ok
}

fn report(name: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => {
            log::info!("{name} TTS test completed successfully.");
            true
        }
        Err(e) => {
            log::error!("Error testing {name} TTS: {e}");
            false
        }
    }
}
