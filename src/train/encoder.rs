//! One-hot encoding of the sender domain, and standardisation of the
//! numeric columns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::SparseRow;

/// One column per category seen during fitting. Unseen categories encode
/// to all zeros.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneHotEncoder {
    categories: BTreeMap<String, u32>,
}

impl OneHotEncoder {
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut names: Vec<&str> = values.into_iter().collect();
        names.sort_unstable();
        names.dedup();
        let categories = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i as u32))
            .collect();
        Self { categories }
    }

    pub fn width(&self) -> usize {
        self.categories.len()
    }

    pub fn transform_into(&self, value: &str, offset: u32, row: &mut SparseRow) {
        if let Some(&col) = self.categories.get(value) {
            row.push((offset + col, 1.0));
        }
    }
}

/// Zero mean, unit (population) variance per column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit<const N: usize>(rows: &[[f64; N]]) -> Self {
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; N];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; N];
        for row in rows {
            for ((s, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2);
            }
        }
        let scale = var
            .into_iter()
            .map(|s| {
                let std = (s / n).sqrt();
                // constant column: leave it centred but unscaled
                if std == 0.0 {
                    1.0
                } else {
                    std
                }
            })
            .collect();
        Self { mean, scale }
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_into(&self, values: &[f64], offset: u32, row: &mut SparseRow) {
        for (i, ((v, m), s)) in values.iter().zip(&self.mean).zip(&self.scale).enumerate() {
            let z = (v - m) / s;
            if z != 0.0 {
                row.push((offset + i as u32, z));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hot_known_and_unknown() {
        let enc = OneHotEncoder::fit(["b.example", "a.example", "b.example"]);
        assert_eq!(enc.width(), 2);
        let mut row = Vec::new();
        enc.transform_into("b.example", 5, &mut row);
        assert_eq!(row, [(6, 1.0)]);
        row.clear();
        enc.transform_into("never.seen", 5, &mut row);
        assert!(row.is_empty());
    }

    #[test]
    fn test_scaler_standardises() {
        let rows = [[1.0, 0.0, 5.0], [3.0, 1.0, 5.0]];
        let scaler = StandardScaler::fit(&rows);
        let mut row = Vec::new();
        scaler.transform_into(&rows[1], 0, &mut row);
        // third column is constant and centres to zero, so it is not stored
        assert_eq!(row, [(0, 1.0), (1, 1.0)]);
    }
}
