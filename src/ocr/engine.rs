//! Recognition engine seam and the process-scoped engine cache

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::models::{ModelKind, ModelManager};
use super::structural::StructuralDetector;
use super::trained::OnnxDigitRecognizer;
use super::CandidateSource;
use crate::config::ModelSettings;
use crate::error::PipelineError;
use crate::raster::Raster;

/// Raw engine output for one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    /// Recognized text, lines separated by `\n`
    pub text: String,
    /// Engine-reported confidence in [0, 1], when the engine has one
    pub confidence: Option<f32>,
}

/// A text recognizer run on the blocking pool
pub trait RecognitionEngine: Send + Sync {
    fn source(&self) -> CandidateSource;

    fn recognize(&self, raster: &Raster) -> Result<Recognition, PipelineError>;
}

/// Builds engines on first use
pub trait EngineFactory: Send + Sync {
    fn create(&self, source: CandidateSource) -> Result<Arc<dyn RecognitionEngine>, PipelineError>;
}

/// Builds the structural detector and the ONNX recognizer from settings
pub struct DefaultEngineFactory {
    settings: ModelSettings,
}

impl DefaultEngineFactory {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }
}

impl EngineFactory for DefaultEngineFactory {
    fn create(&self, source: CandidateSource) -> Result<Arc<dyn RecognitionEngine>, PipelineError> {
        match source {
            CandidateSource::StructuralDetector => Ok(Arc::new(StructuralDetector::new())),
            CandidateSource::TrainedRecognizer => {
                let engine = source.engine_name();
                let manager =
                    ModelManager::new(&self.settings).map_err(|e| PipelineError::unavailable(engine, e))?;
                if !manager.are_models_ready() {
                    return Err(PipelineError::unavailable(
                        engine,
                        format!("model files missing in {:?}", manager.models_dir()),
                    ));
                }

                let recognizer = OnnxDigitRecognizer::load(
                    &manager.model_path(ModelKind::Recognition),
                    &manager.model_path(ModelKind::Dictionary),
                    self.settings.intra_threads,
                )
                .map_err(|e| PipelineError::unavailable(engine, format!("{:#}", e)))?;
                Ok(Arc::new(recognizer))
            }
        }
    }
}

/// Lazily built, shared engine handles.
///
/// Each engine kind is initialized at most once at a time; concurrent
/// callers wait on the same initialization. A failed initialization is not
/// stored, so the next caller retries.
pub struct EngineCache {
    factory: Arc<dyn EngineFactory>,
    structural: OnceCell<Arc<dyn RecognitionEngine>>,
    trained: OnceCell<Arc<dyn RecognitionEngine>>,
}

impl EngineCache {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            structural: OnceCell::new(),
            trained: OnceCell::new(),
        }
    }

    /// Cache backed by [`DefaultEngineFactory`]
    pub fn with_settings(settings: &ModelSettings) -> Self {
        Self::new(Arc::new(DefaultEngineFactory::new(settings.clone())))
    }

    /// Get (building on first use) the engine for `source`
    pub async fn get(&self, source: CandidateSource) -> Result<Arc<dyn RecognitionEngine>, PipelineError> {
        let cell = match source {
            CandidateSource::StructuralDetector => &self.structural,
            CandidateSource::TrainedRecognizer => &self.trained,
        };

        let engine = cell
            .get_or_try_init(|| async {
                info!("Initializing {}", source.engine_name());
                let factory = Arc::clone(&self.factory);
                let created = tokio::task::spawn_blocking(move || factory.create(source))
                    .await
                    .map_err(|e| PipelineError::unavailable(source.engine_name(), e))?;
                match &created {
                    Ok(_) => info!("{} initialized", source.engine_name()),
                    Err(e) => warn!("{}", e),
                }
                created
            })
            .await?;

        Ok(Arc::clone(engine))
    }

    /// Whether an engine has already been built
    pub fn is_initialized(&self, source: CandidateSource) -> bool {
        match source {
            CandidateSource::StructuralDetector => self.structural.initialized(),
            CandidateSource::TrainedRecognizer => self.trained.initialized(),
        }
    }
}

/// Run one recognition on the blocking pool, abandoning it after `timeout`.
///
/// The raster is moved into the call, and a late result is dropped with the
/// join handle, so a timed-out call can never touch the caller's state.
pub async fn recognize_with_timeout(
    engine: Arc<dyn RecognitionEngine>,
    raster: Raster,
    timeout: Duration,
    label: &str,
) -> Result<Recognition, PipelineError> {
    let engine_name = engine.source().engine_name();
    let started = std::time::Instant::now();
    let handle = tokio::task::spawn_blocking(move || engine.recognize(&raster));

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => {
            debug!("{} ({}) finished in {:?}", engine_name, label, started.elapsed());
            result
        }
        Ok(Err(join_error)) => Err(PipelineError::recognition(engine_name, join_error)),
        Err(_) => Err(PipelineError::EngineTimeout {
            engine: engine_name,
            label: label.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine returning canned text after an optional delay
    pub(crate) struct FakeEngine {
        pub source: CandidateSource,
        pub text: String,
        pub confidence: Option<f32>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl FakeEngine {
        pub(crate) fn new(source: CandidateSource, text: &str) -> Self {
            Self {
                source,
                text: text.to_string(),
                confidence: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl RecognitionEngine for FakeEngine {
        fn source(&self) -> CandidateSource {
            self.source
        }

        fn recognize(&self, _raster: &Raster) -> Result<Recognition, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(Recognition {
                text: self.text.clone(),
                confidence: self.confidence,
            })
        }
    }

    /// Factory handing out fixed engines; a missing engine is reported unavailable
    pub(crate) struct FakeFactory {
        pub structural: Option<Arc<dyn RecognitionEngine>>,
        pub trained: Option<Arc<dyn RecognitionEngine>>,
        pub creations: AtomicUsize,
    }

    impl FakeFactory {
        pub(crate) fn new(
            structural: Option<Arc<dyn RecognitionEngine>>,
            trained: Option<Arc<dyn RecognitionEngine>>,
        ) -> Self {
            Self {
                structural,
                trained,
                creations: AtomicUsize::new(0),
            }
        }
    }

    impl EngineFactory for FakeFactory {
        fn create(&self, source: CandidateSource) -> Result<Arc<dyn RecognitionEngine>, PipelineError> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            let engine = match source {
                CandidateSource::StructuralDetector => self.structural.clone(),
                CandidateSource::TrainedRecognizer => self.trained.clone(),
            };
            engine.ok_or_else(|| PipelineError::unavailable(source.engine_name(), "not installed"))
        }
    }

    #[tokio::test]
    async fn test_engine_cache_initializes_once() {
        let engine: Arc<dyn RecognitionEngine> =
            Arc::new(FakeEngine::new(CandidateSource::StructuralDetector, "123"));
        let factory = Arc::new(FakeFactory::new(Some(engine), None));
        let cache = Arc::new(EngineCache::new(factory.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.get(CandidateSource::StructuralDetector).await.is_ok()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(factory.creations.load(Ordering::SeqCst), 1);
        assert!(cache.is_initialized(CandidateSource::StructuralDetector));
    }

    #[tokio::test]
    async fn test_engine_cache_retries_failed_init() {
        let factory = Arc::new(FakeFactory::new(None, None));
        let cache = EngineCache::new(factory.clone());

        let err = cache.get(CandidateSource::TrainedRecognizer).await.err().unwrap();
        assert!(matches!(err, PipelineError::EngineUnavailable { .. }));
        assert!(cache.get(CandidateSource::TrainedRecognizer).await.is_err());

        assert_eq!(factory.creations.load(Ordering::SeqCst), 2);
        assert!(!cache.is_initialized(CandidateSource::TrainedRecognizer));
    }

    #[tokio::test]
    async fn test_recognize_with_timeout_abandons_slow_call() {
        let mut slow = FakeEngine::new(CandidateSource::TrainedRecognizer, "4821");
        slow.delay = Duration::from_millis(300);
        let engine: Arc<dyn RecognitionEngine> = Arc::new(slow);

        let raster = Raster::filled(4, 4, [255, 255, 255, 255]);
        let err = recognize_with_timeout(engine, raster, Duration::from_millis(20), "base")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "trained recognizer timed out after 20ms (base)");
    }

    #[tokio::test]
    async fn test_recognize_with_timeout_returns_result() {
        let engine: Arc<dyn RecognitionEngine> =
            Arc::new(FakeEngine::new(CandidateSource::StructuralDetector, "Order 500072"));
        let raster = Raster::filled(4, 4, [255, 255, 255, 255]);
        let recognition = recognize_with_timeout(engine, raster, Duration::from_secs(5), "base")
            .await
            .unwrap();
        assert_eq!(recognition.text, "Order 500072");
    }

    #[test]
    fn test_default_factory_reports_missing_models() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = ModelSettings {
            models_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let factory = DefaultEngineFactory::new(settings);

        let err = factory.create(CandidateSource::TrainedRecognizer).err().unwrap();
        assert!(matches!(err, PipelineError::EngineUnavailable { .. }));
        assert!(factory.create(CandidateSource::StructuralDetector).is_ok());
    }
}
