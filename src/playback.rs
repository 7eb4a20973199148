//! Audio playback sink.
//!
//! [`Playback`] applies the volume and hands samples to an [`AudioSink`]:
//! either the default output device (`playback` feature, via cpal) or a
//! temporary WAV file played by `afplay`/`aplay`.

use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, TtsError};
use crate::settings::clamp_volume;
use crate::system::{resolve_program, run_checked, CommandRunner, Platform, ProcessRunner};
use crate::AudioChunk;

/// Something that can render mono f32 samples.
pub trait AudioSink: Send {
    /// Play `samples` and block until they have finished.
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;
}

/// Scale samples by `volume`, clamped to `[0.0, 1.0]`.
///
/// Full volume borrows the input unchanged.
pub fn apply_volume(samples: &[f32], volume: f32) -> Cow<'_, [f32]> {
    let volume = clamp_volume(volume);
    if volume == 1.0 {
        return Cow::Borrowed(samples);
    }
    Cow::Owned(samples.iter().map(|s| s * volume).collect())
}

/// Shared flag that ends [`Playback::play_stream`] after the current chunk.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Playback {
    sink: Box<dyn AudioSink>,
    stop: StopHandle,
}

impl Playback {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            stop: StopHandle::default(),
        }
    }

    /// Default output device when available, else the temp-file player.
    pub fn default_output() -> Self {
        Self::new(default_sink())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Scale and play one complete buffer.
    pub fn play_buffer(&mut self, samples: &[f32], sample_rate: u32, volume: f32) -> Result<()> {
        if samples.is_empty() {
            log::debug!("Nothing to play");
            return Ok(());
        }
        let scaled = apply_volume(samples, volume);
        self.sink.play(&scaled, sample_rate)
    }

    /// Pull, scale and play chunks one at a time, returning how many played.
    ///
    /// The next chunk is requested only after the previous one has finished
    /// playing, so at most one chunk is held in memory. The first error from
    /// the producer or the sink ends the stream.
    pub fn play_stream<I>(&mut self, chunks: I, volume: f32) -> Result<usize>
    where
        I: IntoIterator<Item = Result<AudioChunk>>,
    {
        self.stop.clear();
        let mut played = 0;
        for chunk in chunks {
            let chunk = chunk?;
            played += 1;
            log::info!("Playing audio stream chunk {played}...");
            self.play_buffer(&chunk.samples, chunk.sample_rate, volume)?;
            if self.stop.is_stopped() {
                log::info!("Playback stopped after {played} chunks");
                return Ok(played);
            }
        }
        log::info!("Finished playing {played} audio stream chunks");
        Ok(played)
    }
}

#[cfg(feature = "playback")]
fn default_sink() -> Box<dyn AudioSink> {
    match CpalSink::open() {
        Ok(sink) => Box::new(FallbackSink::new(Box::new(sink), Box::new(FileSink::new()))),
        Err(e) => {
            log::warn!("{e}; falling back to file playback");
            Box::new(FileSink::new())
        }
    }
}

#[cfg(not(feature = "playback"))]
fn default_sink() -> Box<dyn AudioSink> {
    Box::new(FileSink::new())
}

/// Plays through a temporary WAV file and the platform's audio-file player.
pub struct FileSink {
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
}

impl Default for FileSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSink {
    pub fn new() -> Self {
        Self::with_runner(Platform::current(), Arc::new(ProcessRunner))
    }

    pub fn with_runner(platform: Platform, runner: Arc<dyn CommandRunner>) -> Self {
        Self { platform, runner }
    }
}

impl AudioSink for FileSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        play_via_file(&self.platform, self.runner.as_ref(), samples, sample_rate)
    }
}

/// Write a temporary 16-bit WAV, play it with `afplay`/`aplay`, then delete
/// it whatever the player's outcome.
///
/// A failed deletion is logged, never returned.
pub fn play_via_file(
    platform: &Platform,
    runner: &dyn CommandRunner,
    samples: &[f32],
    sample_rate: u32,
) -> Result<()> {
    let profile = platform.profile()?;
    let (name, player) = resolve_program(runner, profile.players)?;

    let file = tempfile::Builder::new()
        .prefix("chatty-tts-")
        .suffix(".wav")
        .tempfile()?;
    // on early return the NamedTempFile guard removes the file
    write_pcm16_wav(file.path(), samples, sample_rate)?;

    let args = vec![file.path().display().to_string()];
    let outcome = run_checked(runner, &name, &player, &args).map_err(|e| match e {
        TtsError::ProcessFailure { .. } => TtsError::Playback(e.to_string()),
        other => other,
    });

    let path = file.path().to_path_buf();
    if let Err(e) = file.close() {
        log::warn!("Could not remove temporary audio file {}: {e}", path.display());
    }
    outcome
}

fn write_pcm16_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Tries `primary` and replays the buffer through `fallback` when the
/// primary output cannot handle the requested format.
///
/// Only [`TtsError::UnsupportedOutput`] switches sinks; any other error is
/// returned unchanged.
pub struct FallbackSink {
    primary: Box<dyn AudioSink>,
    fallback: Box<dyn AudioSink>,
}

impl FallbackSink {
    pub fn new(primary: Box<dyn AudioSink>, fallback: Box<dyn AudioSink>) -> Self {
        Self { primary, fallback }
    }
}

impl AudioSink for FallbackSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        match self.primary.play(samples, sample_rate) {
            Err(TtsError::UnsupportedOutput(reason)) => {
                log::warn!("{reason}; playing through the audio-file player instead");
                self.fallback.play(samples, sample_rate)
            }
            other => other,
        }
    }
}

/// Callbacks that must start with nothing left to play before the last
/// samples are known to have left the device buffer.
const DRAIN_CALLBACKS: u32 = 2;

/// Mono samples shared between the caller and a device callback.
#[cfg_attr(not(feature = "playback"), allow(dead_code))]
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    idle_callbacks: u32,
    error: Option<String>,
}

#[cfg_attr(not(feature = "playback"), allow(dead_code))]
impl PlaybackBuffer {
    fn new(samples: &[f32]) -> Self {
        Self {
            samples: samples.to_vec(),
            position: 0,
            idle_callbacks: 0,
            error: None,
        }
    }

    /// Fill one interleaved device buffer, copying each sample to every channel
    /// and padding with silence once the samples run out.
    fn fill(&mut self, data: &mut [f32], channels: usize) {
        if self.position >= self.samples.len() {
            self.idle_callbacks += 1;
        }
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = match self.samples.get(self.position) {
                Some(&s) => {
                    self.position += 1;
                    s
                }
                None => 0.0,
            };
            frame.fill(sample);
        }
    }

    fn drained(&self) -> bool {
        self.idle_callbacks >= DRAIN_CALLBACKS
    }
}

#[cfg(feature = "playback")]
pub use device::CpalSink;

#[cfg(feature = "playback")]
mod device {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::{AudioSink, PlaybackBuffer};
    use crate::error::{Result, TtsError};

    /// Slack on top of the audio duration before a silent device is declared stuck.
    const DRAIN_GRACE: Duration = Duration::from_secs(2);

    /// Plays through the host's default output device via cpal.
    ///
    /// The device is opened per buffer; nothing platform specific is held
    /// between calls. Formats the device does not offer come back as
    /// [`TtsError::UnsupportedOutput`].
    pub struct CpalSink {
        device_name: String,
    }

    impl CpalSink {
        /// Fails when the host has no default output device.
        pub fn open() -> Result<Self> {
            let device = default_device()?;
            let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());
            log::info!("using output device: {device_name}");
            Ok(Self { device_name })
        }
    }

    fn default_device() -> Result<cpal::Device> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| TtsError::Playback("no default output device".into()))
    }

    /// Whether the device advertises f32 output at `sample_rate` with
    /// `channels`. An unanswerable query counts as supported and leaves the
    /// decision to stream creation.
    fn supports(device: &cpal::Device, channels: u16, sample_rate: u32) -> bool {
        match device.supported_output_configs() {
            Ok(mut configs) => configs.any(|c| {
                c.channels() == channels
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate().0 <= sample_rate
                    && sample_rate <= c.max_sample_rate().0
            }),
            Err(e) => {
                log::debug!("could not query output configs: {e}");
                true
            }
        }
    }

    impl AudioSink for CpalSink {
        fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
            let device = default_device()?;
            let channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(1)
                .max(1);
            if !supports(&device, channels, sample_rate) {
                return Err(TtsError::UnsupportedOutput(format!(
                    "{} has no f32 output at {sample_rate} Hz",
                    self.device_name
                )));
            }
            let config = cpal::StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let buffer = Arc::new(Mutex::new(PlaybackBuffer::new(samples)));
            let data_buffer = Arc::clone(&buffer);
            let error_buffer = Arc::clone(&buffer);
            let frame = channels as usize;

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if let Ok(mut buf) = data_buffer.lock() {
                            buf.fill(data, frame);
                        }
                    },
                    move |err| {
                        log::error!("audio output stream error: {err}");
                        if let Ok(mut buf) = error_buffer.lock() {
                            buf.error = Some(err.to_string());
                        }
                    },
                    None,
                )
                .map_err(|e| match e {
                    cpal::BuildStreamError::StreamConfigNotSupported => {
                        TtsError::UnsupportedOutput(format!(
                            "{} rejected {sample_rate} Hz f32 output",
                            self.device_name
                        ))
                    }
                    other => TtsError::Playback(format!(
                        "failed to build output stream on {}: {other}",
                        self.device_name
                    )),
                })?;

            stream
                .play()
                .map_err(|e| TtsError::Playback(format!("failed to start output stream: {e}")))?;

            let expected = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
            let deadline = Instant::now() + expected + DRAIN_GRACE;
            loop {
                std::thread::sleep(Duration::from_millis(10));
                let buf = buffer
                    .lock()
                    .map_err(|e| TtsError::Playback(format!("playback buffer lock poisoned: {e}")))?;
                if let Some(err) = &buf.error {
                    return Err(TtsError::Playback(err.clone()));
                }
                if buf.drained() {
                    break;
                }
                if Instant::now() > deadline {
                    return Err(TtsError::Playback("output device stopped consuming audio".into()));
                }
            }

            drop(stream);
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::system::tests::FakeRunner;
    use std::sync::Mutex;

    /// Sink that records what it was asked to play.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub played: Arc<Mutex<Vec<(Vec<f32>, u32)>>>,
    }

    impl AudioSink for RecordingSink {
        fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
            self.played
                .lock()
                .unwrap()
                .push((samples.to_vec(), sample_rate));
            Ok(())
        }
    }

    struct FailingSink;

    impl AudioSink for FailingSink {
        fn play(&mut self, _: &[f32], _: u32) -> Result<()> {
            Err(TtsError::Playback("device unplugged".into()))
        }
    }

    #[test]
    fn full_volume_is_an_unmodified_borrow() {
        let samples = [0.1, -0.7, 0.33];
        let out = apply_volume(&samples, 1.0);
        assert!(matches!(out, Cow::Borrowed(_)));
        let bits: Vec<u32> = out.iter().map(|s| s.to_bits()).collect();
        let expected: Vec<u32> = samples.iter().map(|s| s.to_bits()).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn volume_scales_linearly_and_clamps() {
        let samples = [1.0, -0.5];
        for v in [0.0f32, 0.25, 0.5, 0.75] {
            let out = apply_volume(&samples, v);
            assert_eq!(out[0], v);
            assert_eq!(out[1], -0.5 * v);
        }
        assert_eq!(apply_volume(&samples, 2.0).as_ref(), &samples);
        assert_eq!(apply_volume(&samples, -1.0).as_ref(), &[0.0, -0.0]);
    }

    #[test]
    fn play_buffer_scales_before_the_sink() {
        let sink = RecordingSink::default();
        let mut playback = Playback::new(Box::new(sink.clone()));
        playback.play_buffer(&[0.8, -0.4], 22050, 0.5).unwrap();
        let played = sink.played.lock().unwrap();
        assert_eq!(played[0], (vec![0.4, -0.2], 22050));
    }

    #[test]
    fn stream_stops_at_first_error() {
        let sink = RecordingSink::default();
        let mut playback = Playback::new(Box::new(sink.clone()));
        let chunks = vec![
            Ok(AudioChunk {
                samples: vec![0.1],
                sample_rate: 24000,
            }),
            Err(TtsError::EngineFailure("inference failed".into())),
            Ok(AudioChunk {
                samples: vec![0.2],
                sample_rate: 24000,
            }),
        ];
        let err = playback.play_stream(chunks, 1.0).unwrap_err();
        assert!(matches!(err, TtsError::EngineFailure(_)));
        assert_eq!(sink.played.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_handle_ends_stream_after_current_chunk() {
        let sink = RecordingSink::default();
        let mut playback = Playback::new(Box::new(sink.clone()));
        let stop = playback.stop_handle();
        let chunks = (0..5).map(move |i| {
            if i == 1 {
                stop.stop();
            }
            Ok(AudioChunk {
                samples: vec![i as f32],
                sample_rate: 24000,
            })
        });
        assert_eq!(playback.play_stream(chunks, 1.0).unwrap(), 2);
        assert_eq!(sink.played.lock().unwrap().len(), 2);
    }

    struct RejectingSink;

    impl AudioSink for RejectingSink {
        fn play(&mut self, _: &[f32], sample_rate: u32) -> Result<()> {
            Err(TtsError::UnsupportedOutput(format!("no output at {sample_rate} Hz")))
        }
    }

    #[test]
    fn rejected_format_replays_through_fallback_sink() {
        let fallback = RecordingSink::default();
        let mut playback = Playback::new(Box::new(FallbackSink::new(
            Box::new(RejectingSink),
            Box::new(fallback.clone()),
        )));
        playback.play_buffer(&[0.5, -0.5], 24000, 0.5).unwrap();
        assert_eq!(fallback.played.lock().unwrap()[0], (vec![0.25, -0.25], 24000));
    }

    #[test]
    fn other_device_errors_do_not_switch_sinks() {
        let fallback = RecordingSink::default();
        let mut sink = FallbackSink::new(Box::new(FailingSink), Box::new(fallback.clone()));
        let err = sink.play(&[0.1], 24000).unwrap_err();
        assert!(matches!(err, TtsError::Playback(_)));
        assert!(fallback.played.lock().unwrap().is_empty());
    }

    #[test]
    fn buffer_copies_samples_to_every_channel() {
        let mut buf = PlaybackBuffer::new(&[0.1, 0.2, 0.3]);
        let mut data = [9.0f32; 8];
        buf.fill(&mut data, 2);
        assert_eq!(data, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn buffer_waits_for_the_tail_to_leave_the_device() {
        let mut buf = PlaybackBuffer::new(&[0.1, 0.2, 0.3]);
        let mut data = [0.0f32; 2];

        buf.fill(&mut data, 1);
        buf.fill(&mut data, 1);
        // the tail was just handed over; it has not played yet
        assert!(!buf.drained());
        buf.fill(&mut data, 1);
        assert!(!buf.drained());
        buf.fill(&mut data, 1);
        assert!(buf.drained());
    }

    #[test]
    fn sink_errors_propagate_as_playback_errors() {
        let mut playback = Playback::new(Box::new(FailingSink));
        let err = playback.play_buffer(&[0.1], 24000, 1.0).unwrap_err();
        assert!(matches!(err, TtsError::Playback(ref m) if m == "device unplugged"));
    }

    #[test]
    fn file_playback_invokes_player_and_cleans_up_on_failure() {
        let runner = FakeRunner {
            exit_code: 1,
            ..FakeRunner::with_programs(&["aplay"])
        };
        let err = play_via_file(&Platform::Linux, &runner, &[0.0, 0.5], 22050).unwrap_err();
        assert!(matches!(err, TtsError::Playback(_)));

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Path::new("/usr/bin/aplay"));
        let wav = Path::new(&calls[0].1[0]);
        assert!(wav.extension().is_some_and(|e| e == "wav"));
        assert!(!wav.exists());
    }

    #[test]
    fn file_playback_removes_file_on_success() {
        let runner = FakeRunner::with_programs(&["afplay"]);
        play_via_file(&Platform::MacOs, &runner, &[0.25; 64], 24000).unwrap();
        let calls = runner.calls.lock().unwrap();
        assert!(!Path::new(&calls[0].1[0]).exists());
    }

    #[test]
    fn file_playback_without_player_is_command_not_found() {
        let runner = FakeRunner::default();
        let err = play_via_file(&Platform::Linux, &runner, &[0.0], 22050).unwrap_err();
        assert!(matches!(err, TtsError::CommandNotFound(ref p) if p == "aplay or paplay"));
    }
}
