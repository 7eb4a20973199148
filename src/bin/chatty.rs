//! `chatty-tts`: speak text from arguments or stdin.
//!
//! Each stdin line is one request; the status (`done`, `WARNING: ...`,
//! `Error: ...`) is written back on stdout. Logs go to stderr.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use chatty_tts::dispatcher::Dispatcher;
use chatty_tts::selftest::run_self_tests;
use chatty_tts::settings::{
    example_config_json, EngineKind, ResourcePolicy, Settings, SettingsBuilder, DEFAULT_SPEED,
    DEFAULT_VOICE, DEFAULT_VOLUME,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Text to speak; reads one request per stdin line when omitted
    text: Vec<String>,

    /// Synthesis engine
    #[arg(long, value_enum, default_value_t = EngineArg::System)]
    engine: EngineArg,

    /// Play streaming-engine audio chunk by chunk as it is generated
    #[arg(long)]
    stream: bool,

    /// Speech rate multiplier
    #[arg(long, default_value_t = DEFAULT_SPEED)]
    speed: f32,

    /// Volume from 0.0 (silent) to 1.0 (full)
    #[arg(long, default_value_t = DEFAULT_VOLUME)]
    volume: f32,

    /// Streaming-engine voice
    #[arg(long, default_value = DEFAULT_VOICE)]
    voice: String,

    /// Explicit model file
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Explicit voice-data file
    #[arg(long)]
    voices_path: Option<PathBuf>,

    /// What to do when the model files cannot be found
    #[arg(long, value_enum, default_value_t = PolicyArg::Fallback)]
    on_missing_model: PolicyArg,

    /// Print an example tool-host configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Speak a test message with the given engine(s) and exit
    #[arg(long, value_enum)]
    test_voice: Option<TestVoice>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    System,
    Streaming,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Defaults,
    Fallback,
    Strict,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum TestVoice {
    System,
    Streaming,
    Both,
}

impl Cli {
    fn settings(&self) -> Result<Settings, Box<dyn std::error::Error>> {
        let mut builder = SettingsBuilder::default();
        builder
            .engine(match self.engine {
                EngineArg::System => EngineKind::System,
                EngineArg::Streaming => EngineKind::Streaming,
            })
            .streaming(self.stream)
            .speed(self.speed)
            .volume(self.volume)
            .voice(self.voice.clone())
            .resource_policy(match self.on_missing_model {
                PolicyArg::Defaults => ResourcePolicy::EngineDefaults,
                PolicyArg::Fallback => ResourcePolicy::FallbackToSystem,
                PolicyArg::Strict => ResourcePolicy::Strict,
            });
        if let Some(path) = &self.model_path {
            builder.model_path(path.clone());
        }
        if let Some(path) = &self.voices_path {
            builder.voices_path(path.clone());
        }
        Ok(builder.build()?)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if cli.print_config {
        let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        return match example_config_json(&dir) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("Failed to render configuration: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(which) = cli.test_voice {
        let system = matches!(which, TestVoice::System | TestVoice::Both);
        let streaming = matches!(which, TestVoice::Streaming | TestVoice::Both);
        return if run_self_tests(&settings, system, streaming) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    log::info!(
        "Starting speech service with {:?} engine at speed {} and volume {}",
        settings.engine,
        settings.speed,
        settings.volume
    );
    let dispatcher = Dispatcher::new(settings);

    if !cli.text.is_empty() {
        let outcome = dispatcher.speak_outcome(&cli.text.join(" "));
        println!("{outcome}");
        return if outcome.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to read stdin: {e}");
                return ExitCode::FAILURE;
            }
        };
        let status = dispatcher.speak(&line);
        if writeln!(stdout, "{status}").and_then(|()| stdout.flush()).is_err() {
            break;
        }
    }
    log::info!("Speech service stopped");
    ExitCode::SUCCESS
}
