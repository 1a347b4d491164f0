//! Request-level facade: credential, intake, credits, pipeline, storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::credits::CreditStore;
use crate::error::{Error, Result};
use crate::intake::{self, SourceImage};
use crate::pipeline::{self, Pipeline};
use crate::store::{ArtifactId, ArtifactStore};

/// Route prefix under which stored artifacts are served.
pub const ARTIFACT_ROUTE: &str = "/image";

/// Settings of the request facade.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Shared API key; `None` disables the check.
    pub api_key: Option<String>,
    /// Whether uploads must carry an account with at least one credit.
    pub require_credits: bool,
}

/// One incoming upload.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// Declared MIME type.
    pub content_type: String,
    /// Credential presented by the caller.
    pub api_key: Option<String>,
    /// Account charged for the request.
    pub email: Option<String>,
}

/// Body returned for a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnhanceResponse {
    /// Always `"success"`.
    pub status: &'static str,
    /// Artifact identifier.
    pub id: String,
    /// Stored file name.
    pub filename: String,
    /// Retrieval path.
    pub url: String,
}

impl EnhanceResponse {
    fn for_artifact(id: ArtifactId) -> Self {
        let filename = id.filename();
        Self {
            status: "success",
            id: id.to_string(),
            url: format!("{ARTIFACT_ROUTE}/{filename}"),
            filename,
        }
    }
}

/// Liveness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    /// Always `"running"`.
    pub status: &'static str,
    /// Name of the background removal engine.
    pub remover: &'static str,
    /// Whether the engine can be called.
    pub remover_available: bool,
}

/// Result of processing a single file from disk.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the input file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Stored artifact, when successful.
    pub artifact: Option<EnhanceResponse>,
    /// Human-readable status message.
    pub message: String,
}

/// Ties the pipeline to storage, credentials, and credits.
pub struct EnhanceService {
    pipeline: Pipeline,
    store: ArtifactStore,
    credits: Option<Arc<dyn CreditStore>>,
    config: ServiceConfig,
}

impl std::fmt::Debug for EnhanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnhanceService")
            .field("pipeline", &self.pipeline)
            .field("store", &self.store)
            .field("credits", &self.credits.is_some())
            .field("require_credits", &self.config.require_credits)
            .finish_non_exhaustive()
    }
}

impl EnhanceService {
    /// Assemble a service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when credits are required but no store is given.
    pub fn new(
        pipeline: Pipeline,
        store: ArtifactStore,
        credits: Option<Arc<dyn CreditStore>>,
        config: ServiceConfig,
    ) -> Result<Self> {
        if config.require_credits && credits.is_none() {
            return Err(Error::Config(
                "require_credits is set but no credit store is configured".into(),
            ));
        }
        Ok(Self {
            pipeline,
            store,
            credits,
            config,
        })
    }

    /// The underlying pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The artifact store.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Report whether the service can cut out backgrounds.
    #[must_use]
    pub fn health(&self) -> Health {
        let remover = self.pipeline.remover();
        Health {
            status: "running",
            remover: remover.name(),
            remover_available: remover.is_available(),
        }
    }

    /// Handle one upload end to end.
    ///
    /// The credit is reserved before processing and refunded if anything
    /// after that fails, so concurrent uploads can never overspend.
    ///
    /// # Errors
    ///
    /// Client faults ([`Error::Unauthorized`], [`Error::UnsupportedFormat`],
    /// [`Error::PayloadTooLarge`], [`Error::InsufficientCredits`]) are raised
    /// before any processing; anything later is a server fault.
    pub fn enhance(&self, upload: Upload) -> Result<EnhanceResponse> {
        self.authorize(upload.api_key.as_deref())?;

        let source = SourceImage::new(
            upload.bytes,
            &upload.content_type,
            self.pipeline.config().max_upload_bytes,
        )?;
        let charged = self.reserve_credit(upload.email.as_deref())?;

        match self.render_and_store(&source) {
            Ok(id) => {
                log::info!("enhanced photo stored as {}", id.filename());
                Ok(EnhanceResponse::for_artifact(id))
            }
            Err(e) => {
                if let (Some(credits), Some(email)) = (&self.credits, charged) {
                    if let Err(refund) = credits.adjust(email, 1) {
                        log::error!("failed to refund credit for {email}: {refund}");
                    }
                }
                Err(e)
            }
        }
    }

    fn render_and_store(&self, source: &SourceImage) -> Result<ArtifactId> {
        let image = self.pipeline.render(source)?;
        let png = pipeline::encode_png(&image)?;
        self.store.save(&png)
    }

    /// Serve a stored artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArtifactNotFound`] for unknown names.
    pub fn fetch(&self, filename: &str) -> Result<Vec<u8>> {
        self.store.fetch(filename)
    }

    fn authorize(&self, presented: Option<&str>) -> Result<()> {
        match (&self.config.api_key, presented) {
            (None, _) => Ok(()),
            (Some(expected), Some(given)) if expected == given => Ok(()),
            _ => Err(Error::Unauthorized),
        }
    }

    /// Takes one credit from the account, if credits are enforced.
    fn reserve_credit<'a>(&self, email: Option<&'a str>) -> Result<Option<&'a str>> {
        if !self.config.require_credits {
            return Ok(None);
        }
        let (Some(credits), Some(email)) = (&self.credits, email) else {
            return Err(Error::Unauthorized);
        };
        if !credits.try_debit(email)? {
            return Err(Error::InsufficientCredits(email.to_string()));
        }
        log::debug!("reserved one credit for {email}");
        Ok(Some(email))
    }

    /// Process a single image file from disk into the store.
    #[must_use]
    pub fn process_file(&self, input: &Path) -> ProcessResult {
        let mut result = ProcessResult {
            path: input.to_path_buf(),
            success: false,
            artifact: None,
            message: String::new(),
        };

        let bytes = match std::fs::read(input) {
            Ok(b) => b,
            Err(e) => {
                result.message = format!("Failed to read: {e}");
                return result;
            }
        };

        let upload = Upload {
            bytes,
            content_type: intake::content_type_for_path(input)
                .unwrap_or("application/octet-stream")
                .to_string(),
            api_key: self.config.api_key.clone(),
            email: None,
        };

        match self.enhance(upload) {
            Ok(response) => {
                result.success = true;
                result.message = format!("Stored as {}", response.filename);
                result.artifact = Some(response);
            }
            Err(e) => {
                result.message = e.to_string();
            }
        }
        result
    }

    /// Process all supported images in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    #[must_use]
    pub fn process_directory(&self, input_dir: &Path) -> Vec<ProcessResult> {
        let entries: Vec<PathBuf> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .filter(|p| intake::content_type_for_path(p).is_some())
                .collect(),
            Err(e) => {
                return vec![ProcessResult {
                    path: input_dir.to_path_buf(),
                    success: false,
                    artifact: None,
                    message: format!("Failed to read directory: {e}"),
                }];
            }
        };

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            entries.par_iter().map(|p| self.process_file(p)).collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            entries.iter().map(|p| self.process_file(p)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::config::PipelineConfig;
    use crate::credits::FileCreditStore;
    use crate::removal::{BackgroundRemover, RemovalOutcome, UnavailableRemover};

    struct CountingRemover(AtomicUsize);

    impl BackgroundRemover for CountingRemover {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn remove(&self, encoded: &[u8]) -> RemovalOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            let img = image::load_from_memory(encoded).unwrap();
            RemovalOutcome::Cutout(img.to_rgba8())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        service: EnhanceService,
        remover: Arc<CountingRemover>,
        credits: Arc<FileCreditStore>,
    }

    fn fixture(config: ServiceConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let remover = Arc::new(CountingRemover(AtomicUsize::new(0)));
        let credits = Arc::new(FileCreditStore::open(dir.path().join("credits.json")).unwrap());
        let pipeline = Pipeline::new(
            PipelineConfig {
                target_size: 64,
                ..PipelineConfig::default()
            },
            remover.clone(),
        )
        .unwrap();
        let store = ArtifactStore::open(dir.path().join("output")).unwrap();
        let ledger: Arc<dyn CreditStore> = credits.clone();
        let service = EnhanceService::new(pipeline, store, Some(ledger), config).unwrap();
        Fixture {
            _dir: dir,
            service,
            remover,
            credits,
        }
    }

    fn png_upload() -> Upload {
        let img = RgbImage::from_pixel(32, 24, Rgb([120, 80, 40]));
        Upload {
            bytes: pipeline::encode_png(&img).unwrap(),
            content_type: "image/png".into(),
            api_key: Some("secret".into()),
            email: Some("a@example.com".into()),
        }
    }

    fn stored_files(f: &Fixture) -> usize {
        std::fs::read_dir(f.service.store().dir()).unwrap().count()
    }

    #[test]
    fn enhance_stores_and_serves_artifact() {
        let f = fixture(ServiceConfig::default());
        let response = f.service.enhance(png_upload()).unwrap();

        assert_eq!(response.status, "success");
        assert_eq!(response.url, format!("/image/{}", response.filename));
        let bytes = f.service.fetch(&response.filename).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (64, 64));
    }

    #[test]
    fn wrong_api_key_is_unauthorized() {
        let f = fixture(ServiceConfig {
            api_key: Some("other".into()),
            ..ServiceConfig::default()
        });
        let err = f.service.enhance(png_upload()).unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
        assert_eq!(f.remover.0.load(Ordering::SeqCst), 0);
        assert_eq!(stored_files(&f), 0);
    }

    #[test]
    fn unsupported_type_writes_nothing() {
        let f = fixture(ServiceConfig::default());
        let upload = Upload {
            content_type: "image/gif".into(),
            ..png_upload()
        };
        let err = f.service.enhance(upload).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(f.remover.0.load(Ordering::SeqCst), 0);
        assert_eq!(stored_files(&f), 0);
    }

    #[test]
    fn credits_gate_and_decrement() {
        let f = fixture(ServiceConfig {
            require_credits: true,
            ..ServiceConfig::default()
        });

        let err = f.service.enhance(png_upload()).unwrap_err();
        assert!(matches!(err, Error::InsufficientCredits(_)));
        assert_eq!(f.remover.0.load(Ordering::SeqCst), 0);

        f.credits.grant("a@example.com", 2).unwrap();
        f.service.enhance(png_upload()).unwrap();
        assert_eq!(f.credits.balance("a@example.com").unwrap(), 1);
    }

    #[test]
    fn failed_request_refunds_credit() {
        let dir = tempfile::tempdir().unwrap();
        let credits = Arc::new(FileCreditStore::open(dir.path().join("credits.json")).unwrap());
        credits.grant("a@example.com", 1).unwrap();
        let ledger: Arc<dyn CreditStore> = credits.clone();
        let pipeline =
            Pipeline::new(PipelineConfig::default(), Arc::new(UnavailableRemover)).unwrap();
        let store = ArtifactStore::open(dir.path().join("output")).unwrap();
        let config = ServiceConfig {
            require_credits: true,
            ..ServiceConfig::default()
        };
        let service = EnhanceService::new(pipeline, store, Some(ledger), config).unwrap();

        let err = service.enhance(png_upload()).unwrap_err();
        assert!(matches!(err, Error::BackgroundRemovalFailed(_)));
        assert_eq!(credits.balance("a@example.com").unwrap(), 1);
    }

    /// Holds every call long enough for a second request to overlap it.
    struct SlowRemover;

    impl BackgroundRemover for SlowRemover {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn remove(&self, encoded: &[u8]) -> RemovalOutcome {
            std::thread::sleep(Duration::from_millis(200));
            RemovalOutcome::from_encoded(encoded)
        }
    }

    #[test]
    fn concurrent_uploads_cannot_share_one_credit() {
        let dir = tempfile::tempdir().unwrap();
        let credits = Arc::new(FileCreditStore::open(dir.path().join("credits.json")).unwrap());
        credits.grant("a@example.com", 1).unwrap();
        let ledger: Arc<dyn CreditStore> = credits.clone();
        let pipeline = Pipeline::new(
            PipelineConfig {
                target_size: 32,
                ..PipelineConfig::default()
            },
            Arc::new(SlowRemover),
        )
        .unwrap();
        let store = ArtifactStore::open(dir.path().join("output")).unwrap();
        let config = ServiceConfig {
            require_credits: true,
            ..ServiceConfig::default()
        };
        let service = EnhanceService::new(pipeline, store, Some(ledger), config).unwrap();

        let results: Vec<_> = std::thread::scope(|s| {
            let a = s.spawn(|| service.enhance(png_upload()));
            let b = s.spawn(|| service.enhance(png_upload()));
            vec![a.join().unwrap(), b.join().unwrap()]
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::InsufficientCredits(_)))));
        assert_eq!(credits.balance("a@example.com").unwrap(), 0);
        assert_eq!(std::fs::read_dir(service.store().dir()).unwrap().count(), 1);
    }

    #[test]
    fn credits_required_without_email_is_unauthorized() {
        let f = fixture(ServiceConfig {
            require_credits: true,
            ..ServiceConfig::default()
        });
        let upload = Upload {
            email: None,
            ..png_upload()
        };
        assert!(matches!(f.service.enhance(upload), Err(Error::Unauthorized)));
    }

    #[test]
    fn health_reports_engine() {
        let f = fixture(ServiceConfig::default());
        let health = f.service.health();
        assert_eq!(health.status, "running");
        assert_eq!(health.remover, "counting");
        assert!(health.remover_available);
    }

    #[test]
    fn process_directory_skips_other_files() {
        let f = fixture(ServiceConfig::default());
        let input = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("a.png"), png_upload().bytes).unwrap();
        std::fs::write(input.path().join("notes.txt"), "hello").unwrap();

        let results = f.service.process_directory(input.path());
        assert_eq!(results.len(), 1);
        assert!(results[0].success, "{}", results[0].message);
        assert!(results[0].artifact.is_some());
    }
}
