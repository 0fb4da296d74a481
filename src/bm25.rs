//! BM25 sparse vectorization for hybrid search.
//!
//! Learns a vocabulary and IDF table from a corpus of chunk contents, then
//! turns any text into a [`SparseVector`] of BM25 term weights keyed by
//! stable term ids. Weights use the classic formulation
//!
//! ```text
//! w(t) = idf(t) · tf·(k1+1) / (tf + k1·(1 − b + b·|T|/avgdl))
//! idf(t) = ln((N − df + 0.5) / (df + 0.5))
//! ```
//!
//! with `k1 = 1.2`, `b = 0.75`. The idf can go negative for very common
//! terms; before a vector is emitted all values are shifted by
//! `(−min + 1e-6)` whenever any weight is non-positive, so downstream
//! sparse backends always see strictly positive values.
//!
//! Models serialize to JSON (vocabulary and idf as `[term, value]` pair
//! arrays) and round-trip exactly; an untrained model serializes cleanly,
//! which is how empty hybrid collections persist their companion model.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::SparseVector;

const DEFAULT_K1: f64 = 1.2;
const DEFAULT_B: f64 = 0.75;
const DEFAULT_MIN_TERM_LENGTH: usize = 2;
const POSITIVITY_EPSILON: f64 = 1e-6;

/// Terms dropped during tokenization regardless of frequency.
pub fn default_stop_words() -> HashSet<String> {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "if", "in", "is",
        "it", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Tunables for [`Bm25Vectorizer`].
#[derive(Debug, Clone)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    pub min_term_length: usize,
    pub stop_words: HashSet<String>,
    /// Drop weights below this value (applied after the positivity shift).
    pub min_score: Option<f64>,
    /// Keep only the strongest N terms per vector.
    pub max_terms: Option<usize>,
    /// L2-normalize emitted vectors.
    pub normalize: bool,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            min_term_length: DEFAULT_MIN_TERM_LENGTH,
            stop_words: default_stop_words(),
            min_score: None,
            max_terms: None,
            normalize: false,
        }
    }
}

/// Persisted model layout. Vocabulary and idf are pair arrays so the file
/// format is stable regardless of map iteration order.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedModel {
    k1: f64,
    b: f64,
    min_term_length: usize,
    stop_words: Vec<String>,
    vocabulary: Vec<(String, u32)>,
    idf: Vec<(String, f64)>,
    avg_doc_length: f64,
    trained: bool,
}

/// Corpus-trained BM25 vectorizer.
#[derive(Debug, Clone)]
pub struct Bm25Vectorizer {
    params: Bm25Params,
    vocabulary: HashMap<String, u32>,
    idf: HashMap<String, f64>,
    avg_doc_length: f64,
    trained: bool,
}

impl Default for Bm25Vectorizer {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

impl Bm25Vectorizer {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            vocabulary: HashMap::new(),
            idf: HashMap::new(),
            avg_doc_length: 0.0,
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    pub fn idf_for(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    /// Lowercase, replace non-word characters with whitespace, split, and
    /// drop short tokens and stop words. Underscores count as word
    /// characters so identifiers survive intact.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|token| {
                token.len() >= self.params.min_term_length
                    && !self.params.stop_words.contains(*token)
            })
            .map(String::from)
            .collect()
    }

    /// Learn vocabulary, document frequencies, and average document length
    /// from the corpus. Fails on an empty corpus.
    pub fn train<S: AsRef<str>>(&mut self, corpus: &[S]) -> Result<()> {
        if corpus.is_empty() {
            bail!("cannot train BM25 model on an empty corpus");
        }

        let tokenized: Vec<Vec<String>> = corpus
            .iter()
            .map(|doc| self.tokenize(doc.as_ref()))
            .collect();

        let total_tokens: usize = tokenized.iter().map(|t| t.len()).sum();
        self.avg_doc_length = total_tokens as f64 / tokenized.len() as f64;

        let mut df: HashMap<&str, usize> = HashMap::new();
        for tokens in &tokenized {
            let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let n = tokenized.len() as f64;
        self.idf = df
            .iter()
            .map(|(term, freq)| {
                let idf = ((n - *freq as f64 + 0.5) / (*freq as f64 + 0.5)).ln();
                (term.to_string(), idf)
            })
            .collect();

        // Stable term ids: sorted term order is reproducible across runs.
        let mut terms: Vec<&String> = self.idf.keys().collect();
        terms.sort();
        self.vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(id, term)| (term.clone(), id as u32))
            .collect();

        self.trained = true;
        Ok(())
    }

    /// Produce the BM25 sparse vector for `text`.
    ///
    /// Unknown terms are dropped silently; a text with no vocabulary
    /// overlap yields an empty vector (callers use that as the hybrid
    /// fallback signal). Fails if the model is untrained.
    pub fn vectorize(&self, text: &str) -> Result<SparseVector> {
        if !self.trained {
            return Err(CoreError::NotTrained.into());
        }

        let tokens = self.tokenize(text);
        if tokens.is_empty() {
            return Ok(SparseVector::default());
        }

        let doc_len = tokens.len() as f64;
        let avgdl = if self.avg_doc_length > 0.0 {
            self.avg_doc_length
        } else {
            1.0
        };

        let mut tf: HashMap<&str, f64> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let mut weighted: Vec<(u32, f64)> = Vec::new();
        for (term, freq) in &tf {
            let (Some(term_id), Some(idf)) = (self.vocabulary.get(*term), self.idf.get(*term))
            else {
                continue;
            };
            let numerator = freq * (self.params.k1 + 1.0);
            let denominator = freq
                + self.params.k1 * (1.0 - self.params.b + self.params.b * doc_len / avgdl);
            weighted.push((*term_id, idf * numerator / denominator));
        }

        if weighted.is_empty() {
            return Ok(SparseVector::default());
        }

        // Shift into strictly positive territory when needed.
        let min = weighted
            .iter()
            .map(|(_, w)| *w)
            .fold(f64::INFINITY, f64::min);
        if min <= 0.0 {
            let shift = -min + POSITIVITY_EPSILON;
            for (_, w) in &mut weighted {
                *w += shift;
            }
        }

        if let Some(min_score) = self.params.min_score {
            weighted.retain(|(_, w)| *w >= min_score);
        }
        if let Some(max_terms) = self.params.max_terms {
            if weighted.len() > max_terms {
                weighted
                    .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                weighted.truncate(max_terms);
            }
        }
        weighted.sort_by_key(|(id, _)| *id);

        let mut vector = SparseVector {
            indices: weighted.iter().map(|(id, _)| *id).collect(),
            values: weighted.iter().map(|(_, w)| *w as f32).collect(),
        };
        if self.params.normalize {
            vector.l2_normalize();
        }
        Ok(vector)
    }

    /// JSON form of the model; an untrained model serializes cleanly.
    pub fn to_json(&self) -> Result<String> {
        let mut vocabulary: Vec<(String, u32)> = self
            .vocabulary
            .iter()
            .map(|(t, id)| (t.clone(), *id))
            .collect();
        vocabulary.sort();
        let mut idf: Vec<(String, f64)> =
            self.idf.iter().map(|(t, v)| (t.clone(), *v)).collect();
        idf.sort_by(|a, b| a.0.cmp(&b.0));
        let mut stop_words: Vec<String> = self.params.stop_words.iter().cloned().collect();
        stop_words.sort();

        Ok(serde_json::to_string_pretty(&SerializedModel {
            k1: self.params.k1,
            b: self.params.b,
            min_term_length: self.params.min_term_length,
            stop_words,
            vocabulary,
            idf,
            avg_doc_length: self.avg_doc_length,
            trained: self.trained,
        })?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: SerializedModel =
            serde_json::from_str(json).context("failed to parse BM25 model")?;
        Ok(Self {
            params: Bm25Params {
                k1: model.k1,
                b: model.b,
                min_term_length: model.min_term_length,
                stop_words: model.stop_words.into_iter().collect(),
                ..Bm25Params::default()
            },
            vocabulary: model.vocabulary.into_iter().collect(),
            idf: model.idf.into_iter().collect(),
            avg_doc_length: model.avg_doc_length,
            trained: model.trained,
        })
    }

    /// Persist via temp-file + rename so readers never see a torn model.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(json.as_bytes())?;
            file.flush()?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace model {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read BM25 model {}", path.display()))?;
        Self::from_json(&json)
    }
}
