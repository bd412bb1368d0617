//! Photo Seed - extract a short numeric seed from a photo
//!
//! A photo is decoded, downscaled and binarized, then read by a staged OCR
//! cascade. When no convincing digit run turns up, the seed is derived from
//! the photo's color palette, and as a last resort a weighted-random seed is
//! used. A scan always produces a seed together with an explanation of how
//! it was found.

pub mod bench;
pub mod config;
pub mod error;
pub mod ocr;
pub mod palette;
pub mod pipeline;
pub mod preprocess;
pub mod raster;

pub use config::AppConfig;
pub use error::PipelineError;
pub use pipeline::{PhotoPipelineOptions, PhotoSeedPipeline, PhotoSeedResult, SeedSource, SeedStatus};
