//! Streaming synthesis engine: a neural backend plus lazy, located model files.

use std::path::PathBuf;

use crate::error::{Result, TtsError};
use crate::locator::{
    ResourceLocator, ResourceSearchResult, SearchTier, MODEL_FILENAME, MODEL_PATH_ENV,
    VOICES_FILENAME, VOICES_PATH_ENV,
};
use crate::settings::{ResourcePolicy, Settings};
use crate::{ChunkStream, ModelFiles, SynthesisEngine, SynthesisParams, SynthesisResult};

/// Where the backend looks when nothing was located and the policy allows it.
pub const ENGINE_DEFAULT_DIR: &str = "models/kokoro";

/// Located model files and the tier each came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResources {
    pub files: ModelFiles,
    pub model_tier: SearchTier,
    pub voices_tier: SearchTier,
}

/// Resolve the model and voice files independently, then apply `policy` if
/// either is missing.
pub fn resolve_resources(
    locator: &ResourceLocator,
    model_override: Option<&std::path::Path>,
    voices_override: Option<&std::path::Path>,
    policy: ResourcePolicy,
) -> Result<ResolvedResources> {
    let model = locator.locate(MODEL_FILENAME, model_override, MODEL_PATH_ENV);
    let voices = locator.locate(VOICES_FILENAME, voices_override, VOICES_PATH_ENV);

    match (model, voices) {
        (
            ResourceSearchResult::Found {
                path: model,
                tier: model_tier,
            },
            ResourceSearchResult::Found {
                path: voices,
                tier: voices_tier,
            },
        ) => {
            log::info!("Using model from {} ({model_tier})", model.display());
            log::info!("Using voices from {} ({voices_tier})", voices.display());
            Ok(ResolvedResources {
                files: ModelFiles { model, voices },
                model_tier,
                voices_tier,
            })
        }
        (model, voices) if policy == ResourcePolicy::EngineDefaults => {
            log::warn!(
                "Model files not found in configured locations, using default paths under {ENGINE_DEFAULT_DIR}"
            );
            let default_dir = PathBuf::from(ENGINE_DEFAULT_DIR);
            // keep whichever file was found; only the missing one falls back
            let (model, model_tier) = match model {
                ResourceSearchResult::Found { path, tier } => (path, tier),
                ResourceSearchResult::NotFound { .. } => {
                    (default_dir.join(MODEL_FILENAME), SearchTier::EngineDefault)
                }
            };
            let (voices, voices_tier) = match voices {
                ResourceSearchResult::Found { path, tier } => (path, tier),
                ResourceSearchResult::NotFound { .. } => {
                    (default_dir.join(VOICES_FILENAME), SearchTier::EngineDefault)
                }
            };
            Ok(ResolvedResources {
                files: ModelFiles { model, voices },
                model_tier,
                voices_tier,
            })
        }
        (ResourceSearchResult::NotFound { searched }, _) => Err(TtsError::ResourceNotFound {
            resource: MODEL_FILENAME.to_string(),
            searched,
        }),
        (_, ResourceSearchResult::NotFound { searched }) => Err(TtsError::ResourceNotFound {
            resource: VOICES_FILENAME.to_string(),
            searched,
        }),
    }
}

/// Neural engine with lazily loaded model files.
///
/// The backend is loaded on the first [`StreamingEngine::initialize`] and
/// kept for the rest of the process. Chunks leave unscaled.
pub struct StreamingEngine {
    backend: Box<dyn SynthesisEngine>,
    locator: ResourceLocator,
    model_override: Option<PathBuf>,
    voices_override: Option<PathBuf>,
    policy: ResourcePolicy,
}

impl StreamingEngine {
    pub fn new(backend: Box<dyn SynthesisEngine>, settings: &Settings) -> Self {
        Self::with_locator(backend, settings, ResourceLocator::from_env())
    }

    pub fn with_locator(
        backend: Box<dyn SynthesisEngine>,
        settings: &Settings,
        locator: ResourceLocator,
    ) -> Self {
        Self {
            backend,
            locator,
            model_override: settings.model_path.clone(),
            voices_override: settings.voices_path.clone(),
            policy: settings.resource_policy,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_loaded()
    }

    /// Locate the files and load the backend, unless it is already loaded.
    pub fn initialize(&mut self) -> Result<()> {
        if self.backend.is_loaded() {
            return Ok(());
        }
        log::info!("Initializing streaming engine");
        let resolved = resolve_resources(
            &self.locator,
            self.model_override.as_deref(),
            self.voices_override.as_deref(),
            self.policy,
        )?;
        log::info!(
            "Loading model={} voices={}",
            resolved.files.model.display(),
            resolved.files.voices.display()
        );
        self.backend.load_model(&resolved.files)
    }

    /// Drop the loaded model so the next `initialize` starts over.
    pub fn unload(&mut self) {
        self.backend.unload_model();
    }

    /// One-shot synthesis; blocks until the whole utterance is generated.
    pub fn synthesize(&mut self, text: &str, params: &SynthesisParams) -> Result<SynthesisResult> {
        self.initialize()?;
        log::info!("Synthesizing with voice: {}", params.voice);
        self.backend.synthesize(text, params)
    }

    /// Incremental synthesis; each chunk is generated when pulled.
    pub fn synthesize_stream(
        &mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<ChunkStream<'_>> {
        self.initialize()?;
        log::info!("Streaming synthesis with voice: {}", params.voice);
        self.backend.synthesize_stream(text, params)
    }

    pub fn list_voices(&self) -> Vec<String> {
        self.backend.list_voices()
    }
}

/// Synthesis parameters carried by `settings`.
pub fn params_from(settings: &Settings) -> SynthesisParams {
    SynthesisParams {
        voice: settings.voice.clone(),
        speed: settings.speed,
        lang: settings.lang.clone(),
    }
}
