//! Turn product photos into clean listing images.
//!
//! A photo goes through a fixed sequence of steps: EXIF-aware decode, an
//! optional pre-downscale, background removal by a pluggable engine, a fit
//! into a bounding box, composition on a padded white canvas (optionally with
//! a drop shadow), brightness/contrast/color/sharpness enhancement, and a
//! final resize to a square PNG.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use photo_enhance::{Pipeline, PipelineConfig, RemoteRemover, DEFAULT_REMOTE_TIMEOUT};
//!
//! let remover = RemoteRemover::new("http://localhost:7000/remove", None, DEFAULT_REMOTE_TIMEOUT)
//!     .expect("failed to build client");
//! let pipeline = Pipeline::new(PipelineConfig::default(), Arc::new(remover))
//!     .expect("invalid config");
//!
//! let bytes = std::fs::read("shirt.jpg").unwrap();
//! let png = pipeline.process(bytes, "image/jpeg").unwrap();
//! std::fs::write("shirt.png", png).unwrap();
//! ```
//!
//! # Storage
//!
//! [`EnhanceService`] wraps the pipeline with an API-key check, an optional
//! credit gate, and an [`ArtifactStore`] that keeps every output under a
//! fresh random identifier.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use photo_enhance::{
//!     ArtifactStore, EnhanceService, Pipeline, PipelineConfig, ServiceConfig, UnavailableRemover,
//!     Upload,
//! };
//!
//! let pipeline = Pipeline::new(PipelineConfig::default(), Arc::new(UnavailableRemover)).unwrap();
//! let store = ArtifactStore::open("output").unwrap();
//! let service = EnhanceService::new(pipeline, store, None, ServiceConfig::default()).unwrap();
//!
//! let upload = Upload {
//!     bytes: std::fs::read("shirt.jpg").unwrap(),
//!     content_type: "image/jpeg".into(),
//!     ..Upload::default()
//! };
//! match service.enhance(upload) {
//!     Ok(response) => println!("stored at {}", response.url),
//!     Err(e) => eprintln!("{} {e}", e.status_code()),
//! }
//! ```

#![deny(missing_docs)]

pub mod compose;
pub mod config;
pub mod credits;
mod decode;
pub mod enhance;
pub mod error;
pub mod intake;
mod pipeline;
pub mod removal;
pub mod resize;
mod service;
mod store;

pub use config::{
    CanvasLayout, EnhancementFactors, FitMode, PipelineConfig, RemovalFallback, ShadowConfig,
};
pub use credits::{CreditStore, FileCreditStore, CREDIT_PACK_SIZE};
pub use error::{Error, Fault, Result};
pub use intake::{ContentType, SourceImage};
pub use pipeline::{encode_png, Pipeline};
pub use removal::{
    BackgroundRemover, RemoteRemover, RemovalOutcome, UnavailableRemover, DEFAULT_REMOTE_TIMEOUT,
};
pub use service::{
    EnhanceResponse, EnhanceService, Health, ProcessResult, ServiceConfig, Upload, ARTIFACT_ROUTE,
};
pub use store::{ArtifactId, ArtifactStore};

#[cfg(feature = "onnx")]
pub use removal::{OnnxModel, OnnxRemover};
