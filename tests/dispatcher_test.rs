use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chatty_tts::dispatcher::{Dispatcher, EngineState, SpeakOutcome};
use chatty_tts::locator::{EnvSource, ResourceLocator};
use chatty_tts::playback::{AudioSink, Playback};
use chatty_tts::settings::{EngineKind, ResourcePolicy, Settings, SettingsBuilder};
use chatty_tts::streaming::StreamingEngine;
use chatty_tts::system::{CommandOutput, CommandRunner, Platform, SystemEngine};
use chatty_tts::{
    AudioChunk, ChunkStream, ModelFiles, Result, SynthesisEngine, SynthesisParams,
    SynthesisResult, TtsError,
};

type Events = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl CommandRunner for RecordingRunner {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        (program == "espeak").then(|| PathBuf::from("/usr/bin/espeak"))
    }

    fn run(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_path_buf(), args.to_vec()));
        Ok(CommandOutput {
            success: true,
            exit_code: Some(0),
            stderr: String::new(),
        })
    }
}

/// Records every buffer and flags overlapping calls.
#[derive(Clone, Default)]
struct RecordingSink {
    played: Arc<Mutex<Vec<(Vec<f32>, u32)>>>,
    events: Events,
    busy: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
    delay: Duration,
    unplugged: bool,
}

impl AudioSink for RecordingSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if self.unplugged {
            return Err(TtsError::Playback("device unplugged".into()));
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        thread::sleep(self.delay);
        let index = {
            let mut played = self.played.lock().unwrap();
            played.push((samples.to_vec(), sample_rate));
            played.len() - 1
        };
        self.events.lock().unwrap().push(format!("play {index}"));
        self.busy.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Neural backend stand-in producing fixed chunks.
struct FakeEngine {
    loads: Arc<AtomicUsize>,
    loaded: bool,
    chunks: Vec<Vec<f32>>,
    sample_rate: u32,
    events: Events,
    /// Helper program reported missing on every synthesis.
    missing_program: Option<&'static str>,
}

impl FakeEngine {
    fn new(chunks: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            loads: Arc::default(),
            loaded: false,
            chunks,
            sample_rate,
            events: Arc::default(),
            missing_program: None,
        }
    }

    fn missing(program: &'static str) -> Self {
        Self {
            missing_program: Some(program),
            ..Self::new(vec![vec![0.1]], 24000)
        }
    }

    fn check_programs(&self) -> Result<()> {
        match self.missing_program {
            Some(program) => Err(TtsError::CommandNotFound(program.to_string())),
            None => Ok(()),
        }
    }
}

impl SynthesisEngine for FakeEngine {
    fn load_model(&mut self, files: &ModelFiles) -> Result<()> {
        assert!(files.model.is_file() && files.voices.is_file());
        self.loads.fetch_add(1, Ordering::SeqCst);
        // widen the window for concurrent first use
        thread::sleep(Duration::from_millis(20));
        self.loaded = true;
        Ok(())
    }

    fn unload_model(&mut self) {
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn synthesize(&mut self, _text: &str, _params: &SynthesisParams) -> Result<SynthesisResult> {
        self.check_programs()?;
        Ok(SynthesisResult {
            samples: self.chunks.concat(),
            sample_rate: self.sample_rate,
        })
    }

    fn synthesize_stream<'a>(
        &'a mut self,
        _text: &str,
        _params: &SynthesisParams,
    ) -> Result<ChunkStream<'a>> {
        self.check_programs()?;
        let events = Arc::clone(&self.events);
        let rate = self.sample_rate;
        Ok(Box::new(self.chunks.clone().into_iter().enumerate().map(
            move |(i, samples)| {
                events.lock().unwrap().push(format!("produce {i}"));
                Ok(AudioChunk {
                    samples,
                    sample_rate: rate,
                })
            },
        )))
    }
}

struct Harness {
    _root: tempfile::TempDir,
    runner: Arc<RecordingRunner>,
    sink: RecordingSink,
    loads: Arc<AtomicUsize>,
    events: Events,
    dispatcher: Dispatcher,
}

fn harness(settings: Settings, with_model_files: bool, engine: FakeEngine) -> Harness {
    harness_with_sink(settings, with_model_files, engine, RecordingSink::default())
}

fn harness_with_sink(
    mut settings: Settings,
    with_model_files: bool,
    engine: FakeEngine,
    sink: RecordingSink,
) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let cwd = root.path().join("cwd");
    let home = root.path().join("home");
    std::fs::create_dir_all(&cwd).unwrap();
    std::fs::create_dir_all(&home).unwrap();
    if with_model_files {
        let model = root.path().join("model.onnx");
        let voices = root.path().join("voices.bin");
        std::fs::write(&model, b"m").unwrap();
        std::fs::write(&voices, b"v").unwrap();
        settings.model_path = Some(model);
        settings.voices_path = Some(voices);
    }

    let runner = Arc::new(RecordingRunner::default());
    let system = SystemEngine::with_runner(Platform::Linux, runner.clone());
    let loads = Arc::clone(&engine.loads);
    let events = Arc::clone(&engine.events);
    let sink = RecordingSink {
        events: Arc::clone(&events),
        ..sink
    };
    let locator = ResourceLocator::new(Some(cwd), Some(home), EnvSource::Fixed(HashMap::new()));
    let streaming = StreamingEngine::with_locator(Box::new(engine), &settings, locator);
    let dispatcher = Dispatcher::with_parts(
        settings,
        system,
        Some(streaming),
        Playback::new(Box::new(sink.clone())),
    );

    Harness {
        _root: root,
        runner,
        sink,
        loads,
        events,
        dispatcher,
    }
}

fn streaming_settings(streaming: bool, policy: ResourcePolicy) -> Settings {
    SettingsBuilder::default()
        .engine(EngineKind::Streaming)
        .streaming(streaming)
        .resource_policy(policy)
        .build()
        .unwrap()
}

#[test]
fn system_engine_on_linux_speaks_at_baseline_rate() {
    let settings = SettingsBuilder::default()
        .engine(EngineKind::System)
        .speed(1.0)
        .volume(1.0)
        .build()
        .unwrap();
    let h = harness(settings, false, FakeEngine::new(vec![], 24000));

    assert_eq!(h.dispatcher.speak("hi"), "done");

    let calls = h.runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, PathBuf::from("/usr/bin/espeak"));
    assert_eq!(calls[0].1, vec!["-s", "175", "hi"]);
    assert_eq!(h.loads.load(Ordering::SeqCst), 0);
}

#[test]
fn strict_mode_with_missing_files_reports_error() {
    let h = harness(
        streaming_settings(true, ResourcePolicy::Strict),
        false,
        FakeEngine::new(vec![vec![0.1]], 24000),
    );

    let status = h.dispatcher.speak("hello");
    assert!(status.starts_with("Error: "), "{status}");
    assert!(status.contains("not found"), "{status}");
    assert!(h.runner.calls.lock().unwrap().is_empty());
    assert!(matches!(h.dispatcher.state(), EngineState::Failed { .. }));
}

#[test]
fn missing_files_fall_back_to_system_engine() {
    let h = harness(
        streaming_settings(true, ResourcePolicy::FallbackToSystem),
        false,
        FakeEngine::new(vec![vec![0.1]], 24000),
    );

    let first = h.dispatcher.speak("fallback please");
    assert!(first.starts_with("WARNING: "), "{first}");
    assert!(!first.starts_with("Error: "));
    {
        let calls = h.runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.last().unwrap(), "fallback please");
    }

    // the fallback sticks; nothing is re-attempted or played through the sink
    let second = h.dispatcher.speak("again");
    assert!(second.starts_with("WARNING: "));
    assert_eq!(h.runner.calls.lock().unwrap().len(), 2);
    assert_eq!(h.loads.load(Ordering::SeqCst), 0);
    assert!(h.sink.played.lock().unwrap().is_empty());
}

#[test]
fn one_shot_synthesis_is_scaled_before_the_device() {
    let chunks = vec![vec![0.5, -0.5], vec![1.0, -1.0], vec![0.25, 0.0]];
    let h = harness(
        Settings {
            volume: 0.5,
            ..streaming_settings(false, ResourcePolicy::Strict)
        },
        true,
        FakeEngine::new(chunks, 22050),
    );

    assert_eq!(h.dispatcher.speak("three sentences"), "done");

    let played = h.sink.played.lock().unwrap();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].1, 22050);
    assert_eq!(played[0].0, vec![0.25, -0.25, 0.5, -0.5, 0.125, 0.0]);
}

#[test]
fn streaming_plays_each_chunk_before_producing_the_next() {
    let chunks = vec![vec![0.1], vec![0.2], vec![0.3]];
    let h = harness(
        streaming_settings(true, ResourcePolicy::Strict),
        true,
        FakeEngine::new(chunks, 24000),
    );

    assert_eq!(h.dispatcher.speak("one. two. three."), "done");

    let events = h.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["produce 0", "play 0", "produce 1", "play 1", "produce 2", "play 2"]
    );
    let played: Vec<Vec<f32>> = h
        .sink
        .played
        .lock()
        .unwrap()
        .iter()
        .map(|(s, _)| s.clone())
        .collect();
    assert_eq!(played, vec![vec![0.1], vec![0.2], vec![0.3]]);
    assert_eq!(h.dispatcher.state(), EngineState::StreamingActive);
}

#[test]
fn model_is_loaded_once_and_reused() {
    let h = harness(
        streaming_settings(false, ResourcePolicy::Strict),
        true,
        FakeEngine::new(vec![vec![0.1]], 24000),
    );
    for _ in 0..3 {
        assert_eq!(h.dispatcher.speak("again"), "done");
    }
    assert_eq!(h.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_requests_never_overlap_on_the_device() {
    let sink = RecordingSink {
        delay: Duration::from_millis(15),
        ..RecordingSink::default()
    };
    let h = harness_with_sink(
        streaming_settings(true, ResourcePolicy::Strict),
        true,
        FakeEngine::new(vec![vec![0.1], vec![0.2]], 24000),
        sink,
    );
    let dispatcher = &h.dispatcher;

    thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|i| s.spawn(move || dispatcher.speak(&format!("request {i}"))))
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap(), "done");
        }
    });

    assert!(!h.sink.overlapped.load(Ordering::SeqCst));
    assert_eq!(h.sink.played.lock().unwrap().len(), 8);
    assert_eq!(h.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn reset_re_attempts_initialization() {
    let h = harness(
        streaming_settings(false, ResourcePolicy::FallbackToSystem),
        false,
        FakeEngine::new(vec![vec![0.1]], 24000),
    );
    assert!(h.dispatcher.speak("x").starts_with("WARNING: "));
    assert!(matches!(
        h.dispatcher.state(),
        EngineState::FallenBackToSystem { .. }
    ));

    h.dispatcher.reset();
    assert_eq!(h.dispatcher.state(), EngineState::NotStarted);
    // files are still missing, so the same fallback happens again
    assert!(h.dispatcher.speak("y").starts_with("WARNING: "));
    assert_eq!(h.runner.calls.lock().unwrap().len(), 2);
}

#[test]
fn empty_text_is_a_no_op() {
    let h = harness(
        streaming_settings(true, ResourcePolicy::Strict),
        false,
        FakeEngine::new(vec![], 24000),
    );
    assert_eq!(h.dispatcher.speak_outcome("   "), SpeakOutcome::Done);
    assert_eq!(h.dispatcher.state(), EngineState::NotStarted);
}

#[test]
fn streaming_request_without_backend_is_an_error() {
    let runner = Arc::new(RecordingRunner::default());
    let dispatcher = Dispatcher::with_parts(
        streaming_settings(true, ResourcePolicy::FallbackToSystem),
        SystemEngine::with_runner(Platform::Linux, runner.clone()),
        None,
        Playback::new(Box::new(RecordingSink::default())),
    );
    let status = dispatcher.speak("hello");
    assert!(status.starts_with("Error: "), "{status}");
    assert!(runner.calls.lock().unwrap().is_empty());
}

#[test]
fn missing_phonemizer_program_falls_back_to_system_engine() {
    for streaming in [true, false] {
        let h = harness(
            streaming_settings(streaming, ResourcePolicy::FallbackToSystem),
            true,
            FakeEngine::missing("espeak-ng"),
        );

        let status = h.dispatcher.speak("no phonemizer");
        assert!(status.starts_with("WARNING: "), "{status}");
        assert!(status.contains("espeak-ng"), "{status}");
        assert_eq!(h.loads.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.runner.calls.lock().unwrap()[0].1.last().unwrap(),
            "no phonemizer"
        );
        assert!(h.sink.played.lock().unwrap().is_empty());
        assert!(matches!(
            h.dispatcher.state(),
            EngineState::FallenBackToSystem { .. }
        ));

        // later requests go straight to the system engine
        assert!(h.dispatcher.speak("again").starts_with("WARNING: "));
        assert_eq!(h.runner.calls.lock().unwrap().len(), 2);
    }
}

#[test]
fn missing_phonemizer_program_is_an_error_when_strict() {
    let h = harness(
        streaming_settings(true, ResourcePolicy::Strict),
        true,
        FakeEngine::missing("espeak-ng"),
    );
    let status = h.dispatcher.speak("no phonemizer");
    assert_eq!(status, "Error: command 'espeak-ng' not found in PATH");
    assert!(h.runner.calls.lock().unwrap().is_empty());
    assert_eq!(h.dispatcher.state(), EngineState::StreamingActive);
}

#[test]
fn sink_failure_is_reported_without_fallback() {
    for streaming in [true, false] {
        let sink = RecordingSink {
            unplugged: true,
            ..RecordingSink::default()
        };
        let h = harness_with_sink(
            streaming_settings(streaming, ResourcePolicy::FallbackToSystem),
            true,
            FakeEngine::new(vec![vec![0.1], vec![0.2]], 24000),
            sink,
        );

        let status = h.dispatcher.speak("hello");
        assert_eq!(status, "Error: playback failed: device unplugged");
        assert!(h.runner.calls.lock().unwrap().is_empty());
        assert_eq!(h.dispatcher.state(), EngineState::StreamingActive);
    }
}
