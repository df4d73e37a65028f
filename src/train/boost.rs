//! Gradient-boosted symmetric (oblivious) decision trees for binary log loss.
//!
//! Each tree applies the same `(feature, border)` test to every node of a
//! level, so a tree of depth `d` is `d` tests plus `2^d` leaf values and a
//! prediction is a `d`-bit index. Features are quantised once into at most
//! `border_count + 1` bins; sparse columns only store rows that leave the
//! bin of `0.0`, which keeps histogram construction proportional to the
//! number of non-zero entries.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TrainingConfig;
use crate::error::{Result, TriageError};

use super::FeatureMatrix;

/// A model that scores P(class == 1) for a sparse feature row.
pub trait BinaryClassifier {
    /// Fit on `features` with 0/1 `labels`, replacing any previous fit.
    fn fit(&mut self, features: &FeatureMatrix, labels: &[u8]) -> Result<()>;

    /// Probability of the positive class. `row` is sorted by column.
    fn predict_proba(&self, row: &[(u32, f64)]) -> f64;

    /// Hard decision at 0.5.
    fn predict(&self, row: &[(u32, f64)]) -> u8 {
        u8::from(self.predict_proba(row) >= 0.5)
    }
}

/// Hyper-parameters of [`ObliviousBoost`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostParams {
    pub iterations: usize,
    pub depth: usize,
    pub learning_rate: f64,
    pub l2_leaf_reg: f64,
    pub border_count: usize,
    pub balanced_classes: bool,
}

impl From<&TrainingConfig> for BoostParams {
    fn from(cfg: &TrainingConfig) -> Self {
        Self {
            iterations: cfg.iterations,
            depth: cfg.depth,
            learning_rate: cfg.learning_rate,
            l2_leaf_reg: cfg.l2_leaf_reg,
            border_count: cfg.border_count,
            balanced_classes: cfg.balanced_classes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Split {
    feature: u32,
    border: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObliviousTree {
    splits: Vec<Split>,
    leaves: Vec<f64>,
}

impl ObliviousTree {
    fn leaf_index(&self, row: &[(u32, f64)]) -> usize {
        self.splits
            .iter()
            .enumerate()
            .fold(0, |idx, (depth, split)| {
                if value_at(row, split.feature) > split.border {
                    idx | (1 << depth)
                } else {
                    idx
                }
            })
    }
}

/// Value of `feature` in a column-sorted sparse row.
fn value_at(row: &[(u32, f64)], feature: u32) -> f64 {
    row.binary_search_by_key(&feature, |(col, _)| *col)
        .map(|i| row[i].1)
        .unwrap_or(0.0)
}

/// Ensemble of oblivious trees on a log-odds scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObliviousBoost {
    params: BoostParams,
    bias: f64,
    trees: Vec<ObliviousTree>,
}

impl ObliviousBoost {
    pub fn new(params: BoostParams) -> Self {
        Self {
            params,
            bias: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn raw_score(&self, row: &[(u32, f64)]) -> f64 {
        self.bias
            + self
                .trees
                .iter()
                .map(|t| t.leaves[t.leaf_index(row)])
                .sum::<f64>()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// One quantised feature column.
struct Column {
    borders: Vec<f64>,
    /// Bin of the implicit `0.0` entries.
    default_bin: u8,
    /// Rows whose bin differs from `default_bin`.
    entries: Vec<(u32, u8)>,
}

impl Column {
    fn bins(&self) -> usize {
        self.borders.len() + 1
    }
}

/// Number of borders strictly below `v`; `v > borders[k]` iff `bin > k`.
fn bin_of(borders: &[f64], v: f64) -> u8 {
    borders.partition_point(|b| *b < v) as u8
}

/// Pick up to `max_borders` split points from the value distribution.
fn select_borders(mut values: Vec<f64>, zeros: usize, max_borders: usize) -> Vec<f64> {
    if zeros > 0 {
        values.push(0.0);
    }
    values.sort_by(|a, b| a.total_cmp(b));

    // distinct values with their multiplicity
    let mut distinct: Vec<(f64, usize)> = Vec::new();
    for v in values {
        match distinct.last_mut() {
            Some((last, count)) if *last == v => *count += 1,
            _ => distinct.push((v, 1)),
        }
    }
    if zeros > 1 {
        if let Some(entry) = distinct.iter_mut().find(|(v, _)| *v == 0.0) {
            entry.1 += zeros - 1;
        }
    }
    if distinct.len() < 2 {
        return Vec::new();
    }

    let midpoint = |i: usize| (distinct[i].0 + distinct[i + 1].0) / 2.0;
    if distinct.len() - 1 <= max_borders {
        return (0..distinct.len() - 1).map(midpoint).collect();
    }

    let total: usize = distinct.iter().map(|(_, c)| c).sum();
    let step = total as f64 / (max_borders + 1) as f64;
    let mut borders = Vec::with_capacity(max_borders);
    let mut next = step;
    let mut cumulative = 0usize;
    for i in 0..distinct.len() - 1 {
        cumulative += distinct[i].1;
        if cumulative as f64 >= next {
            borders.push(midpoint(i));
            while next <= cumulative as f64 {
                next += step;
            }
            if borders.len() == max_borders {
                break;
            }
        }
    }
    borders
}

fn quantize(features: &FeatureMatrix, max_borders: usize) -> Vec<Column> {
    let n = features.rows.len();
    let mut by_feature: Vec<Vec<(u32, f64)>> = vec![Vec::new(); features.width];
    for (r, row) in features.rows.iter().enumerate() {
        for &(col, v) in row {
            if v != 0.0 {
                by_feature[col as usize].push((r as u32, v));
            }
        }
    }

    by_feature
        .into_iter()
        .map(|nonzero| {
            let zeros = n - nonzero.len();
            let borders = select_borders(nonzero.iter().map(|(_, v)| *v).collect(), zeros, max_borders);
            let default_bin = bin_of(&borders, 0.0);
            let entries = nonzero
                .into_iter()
                .map(|(r, v)| (r, bin_of(&borders, v)))
                .filter(|(_, b)| *b != default_bin)
                .collect();
            Column {
                borders,
                default_bin,
                entries,
            }
        })
        .collect()
}

/// Newton score of a partition: Σ G² / (H + λ).
fn partition_score(g: f64, h: f64, l2: f64) -> f64 {
    g * g / (h + l2)
}

impl BinaryClassifier for ObliviousBoost {
    fn fit(&mut self, features: &FeatureMatrix, labels: &[u8]) -> Result<()> {
        let n = features.rows.len();
        if n == 0 || labels.len() != n {
            return Err(TriageError::InvalidConfig(format!(
                "cannot fit on {n} rows with {} labels",
                labels.len()
            )));
        }
        let p = &self.params;
        let depth = p.depth.clamp(1, 16);
        let l2 = p.l2_leaf_reg.max(1e-12);

        let positives = labels.iter().filter(|&&y| y == 1).count();
        let negatives = n - positives;
        let (w_neg, w_pos) = if p.balanced_classes && positives > 0 && negatives > 0 {
            let max = positives.max(negatives) as f64;
            (max / negatives as f64, max / positives as f64)
        } else {
            (1.0, 1.0)
        };
        let weights: Vec<f64> = labels
            .iter()
            .map(|&y| if y == 1 { w_pos } else { w_neg })
            .collect();

        let pos_mass = positives as f64 * w_pos;
        let neg_mass = negatives as f64 * w_neg;
        self.bias = if pos_mass > 0.0 && neg_mass > 0.0 {
            (pos_mass / neg_mass).ln()
        } else {
            0.0
        };
        self.trees.clear();

        let columns = quantize(features, p.border_count.clamp(1, 255));
        let usable: Vec<usize> = (0..columns.len())
            .filter(|&f| !columns[f].borders.is_empty())
            .collect();
        debug!(rows = n, features = columns.len(), usable = usable.len(), "Quantised features");

        let mut raw = vec![self.bias; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut leaf = vec![0usize; n];
        let mut above = vec![false; n];

        for iteration in 0..p.iterations {
            for i in 0..n {
                let prob = sigmoid(raw[i]);
                let y = f64::from(labels[i]);
                grad[i] = weights[i] * (prob - y);
                hess[i] = weights[i] * prob * (1.0 - prob);
            }
            leaf.iter_mut().for_each(|l| *l = 0);

            let mut splits = Vec::with_capacity(depth);
            for level in 0..depth {
                let n_leaves = 1usize << level;
                let mut tot_g = vec![0.0; n_leaves];
                let mut tot_h = vec![0.0; n_leaves];
                for i in 0..n {
                    tot_g[leaf[i]] += grad[i];
                    tot_h[leaf[i]] += hess[i];
                }

                let mut best: Option<(f64, usize, usize)> = None;
                for &f in &usable {
                    let col = &columns[f];
                    let nb = col.bins();
                    let mut hg = vec![0.0; n_leaves * nb];
                    let mut hh = vec![0.0; n_leaves * nb];
                    let mut moved_g = vec![0.0; n_leaves];
                    let mut moved_h = vec![0.0; n_leaves];
                    for &(r, b) in &col.entries {
                        let r = r as usize;
                        let l = leaf[r];
                        hg[l * nb + b as usize] += grad[r];
                        hh[l * nb + b as usize] += hess[r];
                        moved_g[l] += grad[r];
                        moved_h[l] += hess[r];
                    }
                    let d = col.default_bin as usize;
                    for l in 0..n_leaves {
                        hg[l * nb + d] += tot_g[l] - moved_g[l];
                        hh[l * nb + d] += tot_h[l] - moved_h[l];
                    }

                    let mut scores = vec![0.0; nb - 1];
                    for l in 0..n_leaves {
                        let (mut gl, mut hl) = (0.0, 0.0);
                        for (k, score) in scores.iter_mut().enumerate() {
                            gl += hg[l * nb + k];
                            hl += hh[l * nb + k];
                            *score += partition_score(gl, hl, l2)
                                + partition_score(tot_g[l] - gl, tot_h[l] - hl, l2);
                        }
                    }
                    for (k, &score) in scores.iter().enumerate() {
                        if best.map_or(true, |(s, _, _)| score > s) {
                            best = Some((score, f, k));
                        }
                    }
                }

                let Some((_, f, k)) = best else { break };
                let col = &columns[f];
                let default_above = col.default_bin as usize > k;
                above.iter_mut().for_each(|a| *a = default_above);
                for &(r, b) in &col.entries {
                    above[r as usize] = b as usize > k;
                }
                for i in 0..n {
                    if above[i] {
                        leaf[i] |= 1 << level;
                    }
                }
                splits.push(Split {
                    feature: f as u32,
                    border: col.borders[k],
                });
            }

            let n_leaves = 1usize << splits.len();
            let mut leaf_g = vec![0.0; n_leaves];
            let mut leaf_h = vec![0.0; n_leaves];
            for i in 0..n {
                leaf_g[leaf[i]] += grad[i];
                leaf_h[leaf[i]] += hess[i];
            }
            let leaves: Vec<f64> = leaf_g
                .iter()
                .zip(&leaf_h)
                .map(|(g, h)| -p.learning_rate * g / (h + l2))
                .collect();
            for i in 0..n {
                raw[i] += leaves[leaf[i]];
            }
            self.trees.push(ObliviousTree { splits, leaves });

            if iteration % 50 == 0 {
                let loss: f64 = (0..n)
                    .map(|i| {
                        let prob = sigmoid(raw[i]).clamp(1e-12, 1.0 - 1e-12);
                        let y = f64::from(labels[i]);
                        -weights[i] * (y * prob.ln() + (1.0 - y) * (1.0 - prob).ln())
                    })
                    .sum::<f64>()
                    / n as f64;
                debug!(iteration, loss, "Boosting");
            }
        }
        Ok(())
    }

    fn predict_proba(&self, row: &[(u32, f64)]) -> f64 {
        sigmoid(self.raw_score(row))
    }
}
