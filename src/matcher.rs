// 🔍 Name Matcher - Join park names across two datasets
// TF-IDF vector space over the union of both name lists, best cosine match
// per source name. Fine for hundreds of names; no indexing needed.

use crate::normalize::normalize_name;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

// ============================================================================
// NAME MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameMatch {
    /// Name from the source list (green-area survey), as written
    pub source_name: String,

    /// Best-scoring name from the target list (invoice ledger), as written
    pub target_name: String,

    /// Cosine similarity (0.0 - 1.0)
    pub score: f64,
}

impl NameMatch {
    pub fn passes(&self, threshold: f64) -> bool {
        self.score > threshold
    }
}

// ============================================================================
// TF-IDF VECTOR SPACE
// ============================================================================

/// Word tokens: runs of 2+ alphanumeric chars, lowercased.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Sparse L2-normalised vector: term index → weight
type SparseVector = HashMap<usize, f64>;

struct TfIdfSpace {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfIdfSpace {
    /// Fit vocabulary and smoothed idf: ln((1 + n) / (1 + df)) + 1
    fn fit(documents: &[Vec<String>]) -> Self {
        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut df: Vec<usize> = Vec::new();

        for doc in documents {
            let unique: HashSet<&String> = doc.iter().collect();
            for term in unique {
                let next = vocabulary.len();
                let idx = *vocabulary.entry(term.clone()).or_insert(next);
                if idx == df.len() {
                    df.push(0);
                }
                df[idx] += 1;
            }
        }

        let n = documents.len() as f64;
        let idf = df
            .iter()
            .map(|&count| ((1.0 + n) / (1.0 + count as f64)).ln() + 1.0)
            .collect();

        TfIdfSpace { vocabulary, idf }
    }

    fn transform(&self, doc: &[String]) -> SparseVector {
        let mut vector: SparseVector = HashMap::new();
        for term in doc {
            if let Some(&idx) = self.vocabulary.get(term) {
                *vector.entry(idx).or_insert(0.0) += self.idf[idx];
            }
        }

        let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for w in vector.values_mut() {
                *w /= norm;
            }
        }
        vector
    }
}

fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(idx, w)| large.get(idx).map(|v| w * v))
        .sum();
    dot.clamp(0.0, 1.0)
}

fn dedup_in_order(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect()
}

/// Best match in `targets` for each distinct name in `sources`, sorted by
/// descending score. Names are folded with [`normalize_name`] before
/// vectorising; the returned rows carry the names as given.
///
/// Exactly one row per distinct source name. Ties on score go to the target
/// that comes first in `targets`. An empty target list yields `""` / 0.0.
pub fn best_matches(sources: &[String], targets: &[String]) -> Vec<NameMatch> {
    match_with(sources, targets, normalize_name)
}

/// Same as [`best_matches`] but vectorises the names exactly as given.
pub fn best_matches_raw(sources: &[String], targets: &[String]) -> Vec<NameMatch> {
    match_with(sources, targets, |s| s.to_string())
}

fn match_with<F>(sources: &[String], targets: &[String], prepare: F) -> Vec<NameMatch>
where
    F: Fn(&str) -> String,
{
    let sources = dedup_in_order(sources);
    let targets = dedup_in_order(targets);

    let source_docs: Vec<Vec<String>> = sources.iter().map(|s| tokenize(&prepare(s))).collect();
    let target_docs: Vec<Vec<String>> = targets.iter().map(|t| tokenize(&prepare(t))).collect();

    let mut corpus = source_docs.clone();
    corpus.extend(target_docs.iter().cloned());
    let space = TfIdfSpace::fit(&corpus);

    let target_vectors: Vec<SparseVector> =
        target_docs.iter().map(|doc| space.transform(doc)).collect();

    let mut matches: Vec<NameMatch> = sources
        .iter()
        .zip(source_docs.iter())
        .map(|(source, doc)| {
            let vector = space.transform(doc);

            let mut best: Option<(usize, f64)> = None;
            for (idx, target) in target_vectors.iter().enumerate() {
                let score = cosine(&vector, target);
                // strictly greater: the first target wins on ties
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((idx, score));
                }
            }

            let (target_name, score) = match best {
                Some((idx, score)) => (targets[idx].clone(), score),
                None => (String::new(), 0.0),
            };
            debug!(source = %source, target = %target_name, score, "best match");

            NameMatch {
                source_name: source.clone(),
                target_name,
                score,
            }
        })
        .collect();

    // stable sort keeps source order among equal scores
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches
}

/// Keep only matches strictly above `threshold`.
pub fn filter_matches(matches: &[NameMatch], threshold: f64) -> Vec<NameMatch> {
    matches
        .iter()
        .filter(|m| m.passes(threshold))
        .cloned()
        .collect()
}

// ============================================================================
// NAME MATCHER ENGINE
// ============================================================================

pub struct NameMatcher {
    /// Confidence threshold a match must exceed to be used (default: 0.95)
    pub threshold: f64,

    /// Fold case and diacritics before vectorising (default: true)
    pub normalize_names: bool,
}

/// Output of one matching pass: all best matches plus the confident subset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub all: Vec<NameMatch>,
    pub accepted: Vec<NameMatch>,
    pub threshold: f64,
}

impl MatchOutcome {
    pub fn rejected_count(&self) -> usize {
        self.all.len() - self.accepted.len()
    }
}

impl NameMatcher {
    pub fn new() -> Self {
        NameMatcher {
            threshold: 0.95,
            normalize_names: true,
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        NameMatcher {
            threshold,
            ..Self::new()
        }
    }

    pub fn best_matches(&self, sources: &[String], targets: &[String]) -> Vec<NameMatch> {
        if self.normalize_names {
            best_matches(sources, targets)
        } else {
            best_matches_raw(sources, targets)
        }
    }

    /// Match and split at the threshold
    pub fn run(&self, sources: &[String], targets: &[String]) -> MatchOutcome {
        let all = self.best_matches(sources, targets);
        let accepted = filter_matches(&all, self.threshold);

        info!(
            candidates = all.len(),
            accepted = accepted.len(),
            threshold = self.threshold,
            "name matching complete"
        );

        MatchOutcome {
            all,
            accepted,
            threshold: self.threshold,
        }
    }
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
