//! Embedding generation
//!
//! The engine treats the embedder as an injected collaborator: any function
//! from text to a dense vector of one fixed dimension satisfies the
//! contract. Two backends ship here: [`HashedEmbedder`], a deterministic
//! signed feature hasher that needs no model files or network (tests and
//! offline runs), and an OpenAI-compatible HTTP client behind the `openai`
//! feature.

mod hashed;
#[cfg(feature = "openai")]
mod openai;

pub use hashed::HashedEmbedder;
#[cfg(feature = "openai")]
pub use openai::OpenAiEmbedder;

use std::sync::Arc;

use crate::config::Settings;
use crate::error::{MnemonError, Result};

/// A text-to-vector function with a fixed output dimension
pub trait Embedder: Send + Sync {
    /// Embed one text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimension; every vector returned by `embed` has this length
    fn dim(&self) -> usize;

    /// Backend identifier surfaced in system info
    fn name(&self) -> &str;
}

/// Create an embedder from settings
pub fn create_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    match settings.embedder_model.as_str() {
        "hashed" => Ok(Arc::new(HashedEmbedder::new(settings.vector_dimension))),
        #[cfg(feature = "openai")]
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_settings(settings)?)),
        other => Err(MnemonError::Config(format!(
            "Unknown embedder model: {}",
            other
        ))),
    }
}

/// Cosine similarity of two equal-length vectors.
///
/// Accumulates in f64 so long low-magnitude vectors keep their tail.
/// Mismatched lengths and zero vectors yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denominator = (norm_a * norm_b).sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        (dot / denominator) as f32
    }
}

/// Clamp a cosine similarity into the score range [0, 1]
pub fn similarity_to_score(similarity: f32) -> f32 {
    similarity.clamp(0.0, 1.0)
}
