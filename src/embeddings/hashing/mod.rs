
use sha2::{Digest, Sha256};

use super::EmbeddingBackend;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic, model-free embeddings.
///
/// Lower-cased words and their boundary-marked character trigrams are hashed
/// with SHA-256 into signed buckets (feature hashing) and the result is
/// L2-normalized, so texts sharing vocabulary land close together. Text with
/// no word characters gets a dense vector expanded from the SHA-256 of the
/// raw text. The output depends only on the input and the dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub const NAME: &'static str = "hash";

    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            self.accumulate(&mut vector, "w", &word, WORD_WEIGHT);

            let marked: Vec<char> = format!("#{}#", word).chars().collect();
            for gram in marked.windows(3) {
                let gram: String = gram.iter().collect();
                self.accumulate(&mut vector, "t", &gram, TRIGRAM_WEIGHT);
            }
        }

        if normalize(&mut vector) {
            vector
        } else {
            self.seeded_vector(text)
        }
    }

    fn accumulate(&self, vector: &mut [f32], kind: &str, feature: &str, weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(b":");
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        let mut bucket_bytes = [0_u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };

        vector[bucket] += sign * weight;
    }

    /// Dense vector for text without any word features (blank, punctuation only)
    fn seeded_vector(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;

        while vector.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(b"seed:");
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();

            for chunk in digest.chunks_exact(4) {
                if vector.len() == self.dimension {
                    break;
                }
                let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                vector.push((value as f32 / u32::MAX as f32).mul_add(2.0, -1.0));
            }
            counter += 1;
        }

        if !normalize(&mut vector) {
            // Every sampled value was exactly zero
            vector[0] = 1.0;
        }
        vector
    }
}

impl EmbeddingBackend for HashEmbedder {
    #[inline]
    fn name(&self) -> &str {
        Self::NAME
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

/// Scale to unit length; false when the vector is all zeros
fn normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return false;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    true
}
