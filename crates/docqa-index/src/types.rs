//! Core types for the vector index.

use chrono::{DateTime, Utc};
use docqa_core::error::{DocQaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A vector embedding.
pub type Vector = Vec<f32>;

/// Distance function used for similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    Cosine,
    DotProduct,
    L2,
}

impl Distance {
    /// Parse a configuration tag.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" | "dot_product" => Ok(Self::DotProduct),
            "l2" | "euclidean" => Ok(Self::L2),
            _ => Err(DocQaError::config(format!("unknown distance '{}'", s))),
        }
    }

    /// Raw distance between two vectors.
    ///
    /// Cosine distance is scaled to [0, 1]: 0 for identical direction,
    /// 0.5 for orthogonal, 1 for opposite.
    pub fn compute(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => (1.0 - cosine_similarity(a, b)) / 2.0,
            Self::DotProduct => dot_product(a, b),
            Self::L2 => euclidean_distance(a, b),
        }
    }

    /// Map a raw distance to a similarity score in [0, 1], higher is better.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            Self::Cosine => 1.0 - distance,
            Self::DotProduct => ((distance + 1.0) / 2.0).clamp(0.0, 1.0),
            Self::L2 => (-distance).exp().clamp(1e-4, 1.0),
        }
    }
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = (a.iter().map(|x| x * x).sum::<f32>()).sqrt();
    let norm_b = (b.iter().map(|x| x * x).sum::<f32>()).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// Calculate dot product of two vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Calculate Euclidean distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    (a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>()).sqrt()
}

/// Normalize a vector to unit length.
pub fn normalize(v: &mut [f32]) {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// A stored vector with its originating segment text and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub file_id: String,
    pub file_name: String,
    pub position: usize,
    pub text: String,
    pub vector: Vector,
    #[serde(default = "unix_epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl VectorDocument {
    pub fn new(
        id: impl Into<String>,
        file_id: impl Into<String>,
        position: usize,
        text: impl Into<String>,
        vector: Vector,
    ) -> Self {
        Self {
            id: id.into(),
            file_id: file_id.into(),
            file_name: String::new(),
            position,
            text: text.into(),
            vector,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// Post-filter applied to similarity search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Restrict candidates to these file ids (set membership)
    pub file_ids: Option<Vec<String>>,
    /// Equality on every provided key. String values prefixed `^=` are
    /// prefix matches, `$=` are suffix matches.
    pub metadata: HashMap<String, String>,
    /// Drop results scoring below this
    pub min_score: f32,
    /// Result count cap; 0 means the repository default
    pub max_results: usize,
}

impl SearchFilter {
    /// Check the metadata conditions against a document.
    pub fn matches_metadata(&self, doc: &VectorDocument) -> bool {
        for (key, expected) in &self.metadata {
            let Some(actual) = doc.metadata.get(key) else {
                return false;
            };
            let ok = if let Some(prefix) = expected.strip_prefix("^=") {
                actual.starts_with(prefix)
            } else if let Some(suffix) = expected.strip_prefix("$=") {
                actual.ends_with(suffix)
            } else {
                actual == expected
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// A scored search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: VectorDocument,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_relative_eq!(cosine_similarity(&a, &b), 1.0, epsilon = 1e-6);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_relative_eq!(cosine_similarity(&a, &b), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_score_identical_and_orthogonal() {
        let a = vec![1.0, 0.0];
        let d = Distance::Cosine;
        assert!(d.score(d.compute(&a, &a)) >= 0.999);

        let b = vec![0.0, 1.0];
        assert_relative_eq!(d.score(d.compute(&a, &b)), 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_dot_product_score_clamped() {
        let d = Distance::DotProduct;
        assert_relative_eq!(d.score(1.0), 1.0, epsilon = 1e-6);
        assert_relative_eq!(d.score(0.0), 0.5, epsilon = 1e-6);
        assert_eq!(d.score(5.0), 1.0);
        assert_eq!(d.score(-5.0), 0.0);
    }

    #[test]
    fn test_l2_score_bounds() {
        let d = Distance::L2;
        assert_relative_eq!(d.score(0.0), 1.0, epsilon = 1e-6);
        assert!(d.score(100.0) >= 1e-4);
        assert!(d.score(0.5) < 1.0);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0, 0.0];
        normalize(&mut v);
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.8, epsilon = 1e-6);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_distance_parse() {
        assert_eq!(Distance::parse("cosine").unwrap(), Distance::Cosine);
        assert_eq!(Distance::parse("dot").unwrap(), Distance::DotProduct);
        assert_eq!(Distance::parse("l2").unwrap(), Distance::L2);
        assert!(Distance::parse("manhattan").is_err());
    }

    #[test]
    fn test_metadata_filter_operators() {
        let mut doc = VectorDocument::new("v1", "f1", 0, "text", vec![1.0]);
        doc.metadata.insert("lang".to_string(), "english".to_string());

        let mut filter = SearchFilter::default();
        filter.metadata.insert("lang".to_string(), "english".to_string());
        assert!(filter.matches_metadata(&doc));

        filter.metadata.insert("lang".to_string(), "^=eng".to_string());
        assert!(filter.matches_metadata(&doc));

        filter.metadata.insert("lang".to_string(), "$=lish".to_string());
        assert!(filter.matches_metadata(&doc));

        filter.metadata.insert("lang".to_string(), "^=span".to_string());
        assert!(!filter.matches_metadata(&doc));

        filter.metadata.insert("lang".to_string(), "english".to_string());
        filter.metadata.insert("missing".to_string(), "x".to_string());
        assert!(!filter.matches_metadata(&doc));
    }
}
