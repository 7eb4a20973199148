//! Model-file discovery.
//!
//! Files are searched in this order, first hit wins:
//!
//! 1. an explicit override path
//! 2. the current working directory
//! 3. `~/.kokoro_models/`
//! 4. `~/.chatty/`
//! 5. the path named by an environment variable (or its legacy alias)
//!
//! Lookups only stat the filesystem; nothing is created or modified.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const MODEL_FILENAME: &str = "kokoro-v1.0.onnx";
pub const VOICES_FILENAME: &str = "voices-v1.0.bin";
pub const MODEL_PATH_ENV: &str = "CHATTY_KOKORO_MODEL_PATH";
pub const VOICES_PATH_ENV: &str = "CHATTY_KOKORO_VOICES_PATH";
/// Older names for the two variables, still honored when the new ones are unset.
pub const LEGACY_MODEL_PATH_ENV: &str = "CHATTY_MCP_KOKORO_MODEL_PATH";
pub const LEGACY_VOICES_PATH_ENV: &str = "CHATTY_MCP_KOKORO_VOICE_PATH";
pub const HOME_MODELS_DIR: &str = ".kokoro_models";
pub const HOME_APP_DIR: &str = ".chatty";

/// Where a resource was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTier {
    Override,
    WorkingDir,
    HomeModels,
    HomeApp,
    EnvVar,
    /// Not searched; the backend's own default location was substituted.
    EngineDefault,
}

impl fmt::Display for SearchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchTier::Override => "explicit override",
            SearchTier::WorkingDir => "working directory",
            SearchTier::HomeModels => "home models directory",
            SearchTier::HomeApp => "home app directory",
            SearchTier::EnvVar => "environment variable",
            SearchTier::EngineDefault => "engine default",
        };
        f.write_str(name)
    }
}

/// Outcome of a single [`ResourceLocator::locate`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSearchResult {
    Found { path: PathBuf, tier: SearchTier },
    NotFound { searched: Vec<PathBuf> },
}

impl ResourceSearchResult {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ResourceSearchResult::Found { path, .. } => Some(path),
            ResourceSearchResult::NotFound { .. } => None,
        }
    }

    pub fn tier(&self) -> Option<SearchTier> {
        match self {
            ResourceSearchResult::Found { tier, .. } => Some(*tier),
            ResourceSearchResult::NotFound { .. } => None,
        }
    }
}

/// Source of environment variable values.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    #[default]
    Process,
    Fixed(HashMap<String, PathBuf>),
}

impl EnvSource {
    fn get(&self, name: &str) -> Option<PathBuf> {
        match self {
            EnvSource::Process => std::env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            EnvSource::Fixed(vars) => vars.get(name).cloned(),
        }
    }
}

/// Prioritized file search over the override, cwd, home and env tiers.
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    cwd: Option<PathBuf>,
    home: Option<PathBuf>,
    env: EnvSource,
}

impl ResourceLocator {
    /// Locator rooted at the process working directory and the user's home.
    pub fn from_env() -> Self {
        Self {
            cwd: std::env::current_dir().ok(),
            home: dirs::home_dir(),
            env: EnvSource::Process,
        }
    }

    /// Locator with explicit roots, used for tests and embedding.
    pub fn new(cwd: Option<PathBuf>, home: Option<PathBuf>, env: EnvSource) -> Self {
        Self { cwd, home, env }
    }

    /// Find `filename`, honoring `override_path` and the `env_var` tier.
    pub fn locate(
        &self,
        filename: &str,
        override_path: Option<&Path>,
        env_var: &str,
    ) -> ResourceSearchResult {
        let mut searched = Vec::new();

        let env_path = self.env.get(env_var).or_else(|| {
            legacy_env_name(env_var).and_then(|legacy| {
                let path = self.env.get(legacy)?;
                log::debug!("{env_var} unset, using legacy {legacy}");
                Some(path)
            })
        });
        let candidates = [
            (SearchTier::Override, override_path.map(Path::to_path_buf)),
            (SearchTier::WorkingDir, self.cwd.as_ref().map(|d| d.join(filename))),
            (
                SearchTier::HomeModels,
                self.home.as_ref().map(|h| h.join(HOME_MODELS_DIR).join(filename)),
            ),
            (
                SearchTier::HomeApp,
                self.home.as_ref().map(|h| h.join(HOME_APP_DIR).join(filename)),
            ),
            (SearchTier::EnvVar, env_path),
        ];

        for (tier, candidate) in candidates {
            let Some(path) = candidate else { continue };
            if path.is_file() {
                let path = absolutize(&path, self.cwd.as_deref());
                log::debug!("Resolved {filename} from {tier}: {}", path.display());
                return ResourceSearchResult::Found { path, tier };
            }
            searched.push(path);
        }

        ResourceSearchResult::NotFound { searched }
    }
}

fn legacy_env_name(env_var: &str) -> Option<&'static str> {
    match env_var {
        MODEL_PATH_ENV => Some(LEGACY_MODEL_PATH_ENV),
        VOICES_PATH_ENV => Some(LEGACY_VOICES_PATH_ENV),
        _ => None,
    }
}

fn absolutize(path: &Path, cwd: Option<&Path>) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match cwd {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}
