//! TF-IDF n-gram vectorizer over the subject column.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::SparseRow;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("valid regex"))
}

/// Lowercased word n-grams of `text`, lengths `1..=ngram_max`.
pub fn ngrams(text: &str, ngram_max: usize) -> Vec<String> {
    let lower = text.to_lowercase();
    let tokens: Vec<&str> = token_re().find_iter(&lower).map(|m| m.as_str()).collect();
    let mut grams = Vec::with_capacity(tokens.len() * ngram_max);
    for n in 1..=ngram_max {
        if tokens.len() < n {
            break;
        }
        grams.extend(tokens.windows(n).map(|w| w.join(" ")));
    }
    grams
}

/// Fitted vocabulary and inverse document frequencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    ngram_max: usize,
    /// Term → column, columns assigned in lexical order.
    vocabulary: BTreeMap<String, u32>,
    /// Smoothed idf per column.
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Fit on a corpus keeping at most `max_features` terms, the most
    /// frequent across the corpus (ties broken lexically).
    pub fn fit<'a>(
        docs: impl IntoIterator<Item = &'a str>,
        max_features: usize,
        ngram_max: usize,
    ) -> Self {
        let mut term_freq: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut n_docs = 0usize;

        for doc in docs {
            n_docs += 1;
            let grams = ngrams(doc, ngram_max);
            let mut seen: Vec<&String> = Vec::with_capacity(grams.len());
            for g in &grams {
                *term_freq.entry(g.clone()).or_default() += 1;
                if !seen.contains(&g) {
                    seen.push(g);
                    *doc_freq.entry(g.clone()).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = term_freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_features);

        let mut terms: Vec<String> = ranked.into_iter().map(|(t, _)| t).collect();
        terms.sort();

        let n = n_docs as f64;
        let idf = terms
            .iter()
            .map(|t| {
                let df = doc_freq.get(t).copied().unwrap_or(0) as f64;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();
        let vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, i as u32))
            .collect();

        Self {
            ngram_max,
            vocabulary,
            idf,
        }
    }

    /// Number of output columns.
    pub fn width(&self) -> usize {
        self.idf.len()
    }

    /// Column of a term, if it is in the vocabulary.
    pub fn column_of(&self, term: &str) -> Option<u32> {
        self.vocabulary.get(term).copied()
    }

    /// L2-normalised tf-idf weights of `text`, appended to `row` at `offset`.
    pub fn transform_into(&self, text: &str, offset: u32, row: &mut SparseRow) {
        let mut counts: BTreeMap<u32, f64> = BTreeMap::new();
        for g in ngrams(text, self.ngram_max) {
            if let Some(&col) = self.vocabulary.get(&g) {
                *counts.entry(col).or_default() += 1.0;
            }
        }
        let weighted: Vec<(u32, f64)> = counts
            .into_iter()
            .map(|(col, tf)| (col, tf * self.idf[col as usize]))
            .collect();
        let norm = weighted.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm == 0.0 {
            return;
        }
        row.extend(weighted.into_iter().map(|(col, w)| (offset + col, w / norm)));
    }
}
