//! Client for the external analysis services.
//!
//! This crate provides:
//! - `JobClient`: submit and poll long-running video analysis jobs
//!   (labels, faces, moderation, transcription)
//! - `TextAnalyzer`: sentiment, key phrases and entities for a transcript
//! - `HttpAnalysisClient`: a stateless HTTP adapter implementing both

pub mod client;
pub mod error;
pub mod service;
pub mod types;

pub use client::{AnalysisClientConfig, HttpAnalysisClient};
pub use error::{AnalysisError, AnalysisResult};
pub use service::{JobClient, TextAnalyzer};
pub use types::SubmitJobRequest;
