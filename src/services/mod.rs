//! Remote collaborators, each behind its own trait.
//!
//! [`Services`] bundles one implementation of every capability the pipeline
//! needs. Each field is an independent `Arc<dyn …>`, so a test can swap the
//! translator without touching the task store, and the CLI can build the
//! whole set from [`ServiceEndpoints`].

pub mod artifacts;
pub mod summarizer;
pub mod task_store;
pub mod translator;
pub mod vision;

use crate::config::{PipelineConfig, ServiceEndpoints};
use crate::error::DocflowError;
use crate::pipeline::extract::{BuiltinExtractor, StructuralExtractor};
use artifacts::{ArtifactStore, LocalArtifactStore};
use std::path::PathBuf;
use std::sync::Arc;
use summarizer::{HttpSummarizer, Summarizer};
use task_store::{HttpTaskStore, InMemoryTaskStore, TaskStore};
use translator::{HttpTranslator, TranslationService};
use vision::{LlmVisionService, OpenAiCompatVisionService, VisionService};

/// Every capability the pipeline consumes.
#[derive(Clone)]
pub struct Services {
    pub extractor: Arc<dyn StructuralExtractor>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub tasks: Arc<dyn TaskStore>,
    /// Required only when a request asks for translation.
    pub translator: Option<Arc<dyn TranslationService>>,
    /// Required only when a request selects tables or pictures.
    pub vision: Option<Arc<dyn VisionService>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

impl Services {
    /// Minimal set: built-in extractor, local artifacts, in-memory tasks.
    pub fn local(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor: Arc::new(BuiltinExtractor::default()),
            artifacts: Arc::new(LocalArtifactStore::new(output_dir)),
            tasks: Arc::new(InMemoryTaskStore::new()),
            translator: None,
            vision: None,
            summarizer: None,
        }
    }

    /// Build clients for every configured endpoint on top of [`Services::local`].
    ///
    /// Without `DOCFLOW_VISION_URL` the vision client falls back to an
    /// `edgequake-llm` provider detected from the environment, if any.
    pub fn from_endpoints(
        endpoints: &ServiceEndpoints,
        config: &PipelineConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, DocflowError> {
        let mut services = Self::local(output_dir);
        let http_err = |service: &str| {
            let service = service.to_string();
            move |e: reqwest::Error| DocflowError::ServiceUnavailable {
                service,
                detail: e.to_string(),
            }
        };

        if let Some(url) = &endpoints.translator_url {
            let t = HttpTranslator::new(url.clone(), config.translation_call_timeout())
                .map_err(http_err("translator"))?;
            services.translator = Some(Arc::new(t));
        }
        if let Some(url) = &endpoints.task_store_url {
            services.tasks = Arc::new(HttpTaskStore::new(url.clone()).map_err(http_err("task-store"))?);
        }
        if let Some(url) = &endpoints.summarizer_url {
            services.summarizer =
                Some(Arc::new(HttpSummarizer::new(url.clone()).map_err(http_err("summarizer"))?));
        }
        services.vision = match &endpoints.vision_url {
            Some(url) => Some(Arc::new(OpenAiCompatVisionService::new(
                url,
                endpoints.vision_model.clone().unwrap_or_else(|| "LocalModel".into()),
                endpoints.vision_api_key.clone(),
            ))),
            None => LlmVisionService::from_env(endpoints.vision_model.as_deref())
                .ok()
                .map(|v| Arc::new(v) as Arc<dyn VisionService>),
        };
        Ok(services)
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn StructuralExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn TranslationService>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionService>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }
}
