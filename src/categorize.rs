use crate::config::Config;
use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(String),
    #[error("embedding response invalid: {0}")]
    InvalidResponse(String),
    #[error("category vocabulary is empty")]
    EmptyVocabulary,
}

/// Sentence embedding provider: a list of strings in, one fixed-dimension
/// vector per string out, in input order. Tests inject a deterministic
/// implementation; production uses [`HttpEmbedder`].
pub trait Embedder {
    fn embed(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>>;
}

/// Embedding client for an OpenAI-compatible `/embeddings` gateway serving
/// the configured multilingual sentence model.
pub struct HttpEmbedder {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &Config) -> Self {
        Self {
            http: build_client(config),
            endpoint: format!(
                "{}/embeddings",
                config.embedding_gateway_url.trim_end_matches('/')
            ),
            model: config.embedding_model.clone(),
            api_key: config.embedding_api_key.clone(),
        }
    }
}

impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|err| EmbeddingError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Http(format!("HTTP {}", response.status())));
        }

        let mut payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::InvalidResponse(err.to_string()))?;

        payload.data.sort_by_key(|entry| entry.index);
        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "{} embeddings for {} inputs",
                payload.data.len(),
                texts.len()
            )));
        }

        Ok(payload.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Assigns each item the closest vocabulary entry by cosine similarity.
///
/// The index is exact brute-force inner product over L2-normalized vectors;
/// vocabulary sizes are tens of entries, so correctness wins over scale.
/// Ties resolve to the first (lowest-index) vocabulary entry.
pub struct EmbeddingCategorizer<E> {
    embedder: E,
    batch_size: usize,
}

/// A vocabulary embedded and L2-normalized once, reusable across any number
/// of assignment batches.
pub struct CategoryIndex {
    labels: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl<E: Embedder> EmbeddingCategorizer<E> {
    pub fn new(embedder: E, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Embeds the vocabulary into a reusable index.
    pub async fn index(&self, vocabulary: &[String]) -> Result<CategoryIndex, EmbeddingError> {
        if vocabulary.is_empty() {
            return Err(EmbeddingError::EmptyVocabulary);
        }
        let mut vectors = self.embedder.embed(vocabulary).await?;
        for vector in &mut vectors {
            normalize_l2(vector);
        }
        Ok(CategoryIndex {
            labels: vocabulary.to_vec(),
            vectors,
        })
    }

    /// One vocabulary label per item, in item order. Batch chunking is a
    /// throughput control only: assignments are identical for any chunk
    /// size.
    pub async fn assign(
        &self,
        index: &CategoryIndex,
        items: &[String],
    ) -> Result<Vec<String>, EmbeddingError> {
        let mut labels = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.batch_size) {
            let mut item_vectors = self.embedder.embed(chunk).await?;
            for vector in &mut item_vectors {
                normalize_l2(vector);
                let best = nearest_index(vector, &index.vectors);
                labels.push(index.labels[best].clone());
            }
        }
        Ok(labels)
    }

    /// Index-then-assign in one call, for a single batch of items.
    pub async fn categorize(
        &self,
        items: &[String],
        vocabulary: &[String],
    ) -> Result<Vec<String>, EmbeddingError> {
        let index = self.index(vocabulary).await?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        self.assign(&index, items).await
    }
}

/// In-place L2 normalization; zero vectors are left untouched.
fn normalize_l2(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn nearest_index(item: &[f32], vocabulary: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (idx, candidate) in vocabulary.iter().enumerate() {
        let score: f32 = item
            .iter()
            .zip(candidate.iter())
            .map(|(a, b)| a * b)
            .sum();
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic fake: maps each string to a fixed vector by keyword so
    /// nearest-neighbor assignment is predictable without a model.
    struct KeywordEmbedder;

    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lower = text.to_lowercase();
                    if lower.contains("celular") || lower.contains("telefono") {
                        vec![3.0, 0.2, 0.1]
                    } else if lower.contains("notebook") || lower.contains("computacion") {
                        vec![0.1, 5.0, 0.3]
                    } else {
                        vec![0.2, 0.1, 1.0]
                    }
                })
                .collect())
        }
    }

    fn vocabulary() -> Vec<String> {
        vec![
            "Celulares y Telefonos".to_string(),
            "Computacion".to_string(),
            "Otras categorías".to_string(),
        ]
    }

    #[tokio::test]
    async fn assigns_nearest_vocabulary_entry() {
        let categorizer = EmbeddingCategorizer::new(KeywordEmbedder, 100);
        let items = vec![
            "celular samsung nuevo".to_string(),
            "notebook lenovo usada".to_string(),
            "silla de jardin".to_string(),
        ];
        let labels = categorizer
            .categorize(&items, &vocabulary())
            .await
            .expect("categorize");
        assert_eq!(labels[0], vocabulary()[0]);
        assert_eq!(labels[1], "Computacion");
        assert_eq!(labels[2], "Otras categorías");
    }

    #[tokio::test]
    async fn batch_size_does_not_change_assignments() {
        let items: Vec<String> = (0..37)
            .map(|i| match i % 3 {
                0 => format!("celular modelo {i}"),
                1 => format!("notebook gamer {i}"),
                _ => format!("lampara {i}"),
            })
            .collect();
        let one = EmbeddingCategorizer::new(KeywordEmbedder, 1)
            .categorize(&items, &vocabulary())
            .await
            .expect("batch 1");
        let hundred = EmbeddingCategorizer::new(KeywordEmbedder, 100)
            .categorize(&items, &vocabulary())
            .await
            .expect("batch 100");
        assert_eq!(one, hundred);
    }

    #[tokio::test]
    async fn ties_break_to_first_vocabulary_entry() {
        struct ConstantEmbedder;
        impl Embedder for ConstantEmbedder {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }
        let categorizer = EmbeddingCategorizer::new(ConstantEmbedder, 10);
        let vocab = vec!["primera".to_string(), "segunda".to_string()];
        let labels = categorizer
            .categorize(&["algo".to_string()], &vocab)
            .await
            .expect("categorize");
        assert_eq!(labels, vec!["primera".to_string()]);
    }

    #[tokio::test]
    async fn empty_vocabulary_is_an_error() {
        let categorizer = EmbeddingCategorizer::new(KeywordEmbedder, 10);
        let err = categorizer
            .categorize(&["algo".to_string()], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::EmptyVocabulary));
    }
}
