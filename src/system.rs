//! System-command speech engine.
//!
//! Speaks through the platform's own TTS program. Audio goes straight to the
//! output device from the child process, so there is no playback step.
//!
//! | Platform | Program                 | Rate flag | Volume flag      |
//! |----------|-------------------------|-----------|------------------|
//! | macOS    | `say`                   | `-r` wpm  | `-v` 0–100       |
//! | Linux    | `espeak-ng` / `espeak`  | `-s` wpm  | `-a` 0–200       |

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::error::{Result, TtsError};
use crate::settings::clamp_volume;

/// Words per minute at `speed = 1.0`.
pub const BASE_WPM: f32 = 175.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Other(String),
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOs,
            "linux" => Platform::Linux,
            other => Platform::Other(other.to_string()),
        }
    }

    /// Command profile for this platform, or `UnsupportedPlatform`.
    pub fn profile(&self) -> Result<&'static PlatformProfile> {
        match self {
            Platform::MacOs => Ok(&MACOS_PROFILE),
            Platform::Linux => Ok(&LINUX_PROFILE),
            Platform::Other(name) => Err(TtsError::UnsupportedPlatform(name.clone())),
        }
    }
}

/// How one platform's speech and audio-file programs are invoked.
#[derive(Debug)]
pub struct PlatformProfile {
    /// Speech programs in order of preference.
    pub programs: &'static [&'static str],
    pub rate_flag: &'static str,
    /// Accepted words-per-minute range, if the program enforces one.
    pub rate_range: Option<(u32, u32)>,
    pub volume_flag: &'static str,
    /// Program value that corresponds to a gain of 1.0.
    pub volume_max: u32,
    /// WAV players used by the temp-file playback path, in order of preference.
    pub players: &'static [&'static str],
}

pub static MACOS_PROFILE: PlatformProfile = PlatformProfile {
    programs: &["say"],
    rate_flag: "-r",
    rate_range: None,
    volume_flag: "-v",
    volume_max: 100,
    players: &["afplay"],
};

pub static LINUX_PROFILE: PlatformProfile = PlatformProfile {
    programs: &["espeak-ng", "espeak"],
    rate_flag: "-s",
    rate_range: Some((80, 450)),
    volume_flag: "-a",
    volume_max: 200,
    players: &["aplay", "paplay"],
};

impl PlatformProfile {
    /// Words per minute for a speed multiplier.
    pub fn rate(&self, speed: f32) -> u32 {
        let wpm = (BASE_WPM * speed).round().max(1.0) as u32;
        match self.rate_range {
            Some((lo, hi)) => wpm.clamp(lo, hi),
            None => wpm,
        }
    }

    /// Program volume value, `None` when the default (full) volume applies.
    pub fn volume(&self, volume: f32) -> Option<u32> {
        let volume = clamp_volume(volume);
        if volume == 1.0 {
            return None;
        }
        Some((volume * self.volume_max as f32).round() as u32)
    }

    /// Full argument list for speaking `text`.
    pub fn args(&self, text: &str, speed: f32, volume: f32) -> Vec<String> {
        let mut args = vec![self.rate_flag.to_string(), self.rate(speed).to_string()];
        if let Some(v) = self.volume(volume) {
            args.push(self.volume_flag.to_string());
            args.push(v.to_string());
        }
        args.push(text.to_string());
        args
    }
}

/// Exit status and captured error stream of a finished child process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Seam between the engines and `std::process`.
pub trait CommandRunner: Send + Sync {
    /// Resolve a program name to an executable path.
    fn resolve(&self, program: &str) -> Option<PathBuf>;

    /// Run to completion. Stdout is discarded and stderr captured.
    fn run(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput>;
}

/// Runs real child processes, looking programs up on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn run(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput> {
        // stdout must stay clean: the caller may be speaking a protocol on it
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Resolve the first available program from `candidates`.
pub fn resolve_program(
    runner: &dyn CommandRunner,
    candidates: &[&str],
) -> Result<(String, PathBuf)> {
    candidates
        .iter()
        .find_map(|name| runner.resolve(name).map(|path| (name.to_string(), path)))
        .ok_or_else(|| TtsError::CommandNotFound(candidates.join(" or ")))
}

/// Run `program` and map a non-zero exit into `ProcessFailure`.
pub fn run_checked(
    runner: &dyn CommandRunner,
    name: &str,
    path: &Path,
    args: &[String],
) -> Result<()> {
    let output = runner.run(path, args).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            TtsError::CommandNotFound(name.to_string())
        } else {
            TtsError::Io(e)
        }
    })?;

    if output.success {
        return Ok(());
    }

    let stderr = output.stderr.trim().to_string();
    log::error!(
        "{name} exited with code {:?}: {}",
        output.exit_code,
        if stderr.is_empty() { "<no stderr>" } else { &stderr }
    );
    Err(TtsError::ProcessFailure {
        program: name.to_string(),
        exit_code: output.exit_code,
        stderr,
    })
}

/// Speech through the operating system's TTS command.
#[derive(Clone)]
pub struct SystemEngine {
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
}

impl Default for SystemEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemEngine {
    /// Engine for the host platform running real processes.
    pub fn new() -> Self {
        Self::with_runner(Platform::current(), Arc::new(ProcessRunner))
    }

    pub fn with_runner(platform: Platform, runner: Arc<dyn CommandRunner>) -> Self {
        Self { platform, runner }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    /// Speak `text` and block until the program exits.
    ///
    /// The program is resolved on every call so a newly installed `espeak-ng`
    /// is picked up without a restart.
    pub fn speak_system(&self, text: &str, speed: f32, volume: f32) -> Result<()> {
        let profile = self.platform.profile().inspect_err(|e| log::warn!("{e}"))?;
        let (name, path) = resolve_program(self.runner.as_ref(), profile.programs)?;
        let args = profile.args(text, speed, volume);

        log::info!("Using system '{name}' command");
        log::debug!("{} {:?}", path.display(), &args[..args.len() - 1]);

        run_checked(self.runner.as_ref(), &name, &path, &args)
    }
}
