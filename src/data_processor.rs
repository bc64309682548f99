//! Stateless numeric utilities over feature matrices. Missing values are
//! represented as NaN.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImputeStrategy {
    Mean,
    Median,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMethod {
    Standard,
    MinMax,
}

fn column_count(x: &[Vec<f64>]) -> usize {
    x.first().map(|row| row.len()).unwrap_or(0)
}

/// Non-NaN values of one column.
fn finite_column(x: &[Vec<f64>], col: usize) -> Vec<f64> {
    x.iter()
        .filter_map(|row| {
            let v = row[col];
            if v.is_nan() { None } else { Some(v) }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Linear-interpolated percentile over the column's non-NaN values,
/// `p` in [0, 1].
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Replaces NaNs per column (mean/median of the non-NaN entries) or drops
/// rows containing any NaN. Shape is preserved for mean/median; `Drop`
/// never grows the row count. Empty input is a no-op.
pub fn impute_missing(x: &[Vec<f64>], strategy: ImputeStrategy) -> Vec<Vec<f64>> {
    if x.is_empty() {
        return Vec::new();
    }

    match strategy {
        ImputeStrategy::Drop => x
            .iter()
            .filter(|row| row.iter().all(|v| !v.is_nan()))
            .cloned()
            .collect(),
        ImputeStrategy::Mean | ImputeStrategy::Median => {
            let cols = column_count(x);
            let fills: Vec<f64> = (0..cols)
                .map(|col| {
                    let mut values = finite_column(x, col);
                    match strategy {
                        ImputeStrategy::Mean => mean(&values),
                        _ => median(&mut values),
                    }
                })
                .collect();
            x.iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .map(|(col, v)| if v.is_nan() { fills[col] } else { *v })
                        .collect()
                })
                .collect()
        }
    }
}

/// Keeps a row only if every column value lies inside that column's
/// [(1-p), p] percentile bounds. Returns the survivors in their original
/// order plus the indices of removed rows. NaN never passes a bound check.
pub fn trim_outliers(x: &[Vec<f64>], p: f64) -> (Vec<Vec<f64>>, Vec<usize>) {
    if x.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let cols = column_count(x);
    let bounds: Vec<(f64, f64)> = (0..cols)
        .map(|col| {
            let mut values = finite_column(x, col);
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            (percentile(&values, 1.0 - p), percentile(&values, p))
        })
        .collect();

    let mut kept = Vec::new();
    let mut removed = Vec::new();
    for (idx, row) in x.iter().enumerate() {
        let inside = row
            .iter()
            .zip(&bounds)
            .all(|(v, (lo, hi))| *v >= *lo && *v <= *hi);
        if inside {
            kept.push(row.clone());
        } else {
            removed.push(idx);
        }
    }
    (kept, removed)
}

/// A fitted per-column transform. Fit on training data only; applying the
/// same fitted scaler to test data keeps test statistics out of the fit.
#[derive(Debug, Clone)]
pub struct Scaler {
    method: ScaleMethod,
    offsets: Vec<f64>,
    scales: Vec<f64>,
}

impl Scaler {
    pub fn fit(x: &[Vec<f64>], method: ScaleMethod) -> Self {
        let cols = column_count(x);
        let mut offsets = Vec::with_capacity(cols);
        let mut scales = Vec::with_capacity(cols);
        for col in 0..cols {
            let values = finite_column(x, col);
            match method {
                ScaleMethod::Standard => {
                    let mu = mean(&values);
                    let var = if values.is_empty() {
                        0.0
                    } else {
                        values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64
                    };
                    offsets.push(mu);
                    scales.push(var.sqrt());
                }
                ScaleMethod::MinMax => {
                    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
                    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    if lo.is_finite() && hi.is_finite() {
                        offsets.push(lo);
                        scales.push(hi - lo);
                    } else {
                        offsets.push(0.0);
                        scales.push(0.0);
                    }
                }
            }
        }
        Self {
            method,
            offsets,
            scales,
        }
    }

    pub fn method(&self) -> ScaleMethod {
        self.method
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(col, v)| {
                let offset = self.offsets.get(col).copied().unwrap_or(0.0);
                let scale = self.scales.get(col).copied().unwrap_or(0.0);
                // Constant columns map to 0 instead of dividing by zero.
                if scale > 0.0 { (v - offset) / scale } else { 0.0 }
            })
            .collect()
    }

    pub fn transform(&self, x: &[Vec<f64>]) -> Vec<Vec<f64>> {
        x.iter().map(|row| self.transform_row(row)).collect()
    }
}

/// Fits a scaler on `train` only and applies the identical transform to
/// `test` when given.
pub fn normalize(
    train: &[Vec<f64>],
    test: Option<&[Vec<f64>]>,
    method: ScaleMethod,
) -> (Vec<Vec<f64>>, Option<Vec<Vec<f64>>>, Scaler) {
    let scaler = Scaler::fit(train, method);
    let train_scaled = scaler.transform(train);
    let test_scaled = test.map(|rows| scaler.transform(rows));
    (train_scaled, test_scaled, scaler)
}

/// Seeded random train/test split; with `stratify` the per-class
/// proportions are preserved. Deterministic for a fixed seed. Mismatched
/// input lengths are truncated to the shorter of the two. This is the
/// general-purpose utility -- temporal model training uses the training
/// engine's chronological split instead.
#[allow(clippy::type_complexity)]
pub fn split_train_test(
    x: &[Vec<f64>],
    y: &[u8],
    test_ratio: f64,
    stratify: bool,
    seed: u64,
) -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<u8>, Vec<u8>) {
    let n = x.len().min(y.len());
    let (x, y) = (&x[..n], &y[..n]);
    let test_ratio = test_ratio.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed);

    let groups: Vec<Vec<usize>> = if stratify {
        let mut classes: Vec<u8> = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        classes
            .into_iter()
            .map(|class| {
                (0..y.len())
                    .filter(|idx| y[*idx] == class)
                    .collect::<Vec<_>>()
            })
            .collect()
    } else {
        vec![(0..y.len()).collect()]
    };

    let mut test_indices = Vec::new();
    for mut group in groups {
        group.shuffle(&mut rng);
        let n_test = (group.len() as f64 * test_ratio).round() as usize;
        test_indices.extend(group.into_iter().take(n_test));
    }
    let is_test: Vec<bool> = {
        let mut mask = vec![false; y.len()];
        for idx in &test_indices {
            mask[*idx] = true;
        }
        mask
    };

    let mut x_train = Vec::new();
    let mut x_test = Vec::new();
    let mut y_train = Vec::new();
    let mut y_test = Vec::new();
    for idx in 0..y.len() {
        if is_test[idx] {
            x_test.push(x[idx].clone());
            y_test.push(y[idx]);
        } else {
            x_train.push(x[idx].clone());
            y_train.push(y[idx]);
        }
    }
    (x_train, x_test, y_train, y_test)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> Vec<Vec<f64>> {
        vec![
            vec![1.0, 10.0],
            vec![2.0, f64::NAN],
            vec![3.0, 30.0],
            vec![f64::NAN, 20.0],
        ]
    }

    #[test]
    fn mean_impute_fills_everything_and_keeps_shape() {
        let x = sample_matrix();
        let out = impute_missing(&x, ImputeStrategy::Mean);
        assert_eq!(out.len(), x.len());
        assert!(out.iter().flatten().all(|v| !v.is_nan()));
        assert!((out[1][1] - 20.0).abs() < 1e-9);
        assert!((out[3][0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn median_impute_uses_column_median() {
        let x = vec![
            vec![1.0],
            vec![100.0],
            vec![2.0],
            vec![f64::NAN],
        ];
        let out = impute_missing(&x, ImputeStrategy::Median);
        assert!((out[3][0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn drop_impute_never_grows_the_matrix() {
        let x = sample_matrix();
        let out = impute_missing(&x, ImputeStrategy::Drop);
        assert_eq!(out.len(), 2);
        assert!(out.len() <= x.len());
        assert!(impute_missing(&[], ImputeStrategy::Drop).is_empty());
    }

    #[test]
    fn trim_requires_every_column_inside_bounds() {
        let mut x = vec![vec![0.0, 0.0]; 20];
        for (idx, row) in x.iter_mut().enumerate() {
            row[0] = idx as f64;
            row[1] = 50.0;
        }
        // One row is extreme in column 1 only.
        x.push(vec![10.0, 1_000.0]);

        let (kept, removed) = trim_outliers(&x, 0.95);
        assert!(removed.contains(&20));
        assert!(kept.iter().all(|row| row[1] < 100.0));
        // Survivors stay in original order.
        let firsts: Vec<f64> = kept.iter().map(|row| row[0]).collect();
        let mut sorted = firsts.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(firsts, sorted);
    }

    #[test]
    fn scaler_fits_on_train_only() {
        let train = vec![vec![0.0], vec![10.0]];
        let test = vec![vec![5.0], vec![100.0]];
        let (train_scaled, test_scaled, _) =
            normalize(&train, Some(&test), ScaleMethod::MinMax);

        assert!((train_scaled[0][0] - 0.0).abs() < 1e-9);
        assert!((train_scaled[1][0] - 1.0).abs() < 1e-9);
        let test_scaled = test_scaled.unwrap();
        assert!((test_scaled[0][0] - 0.5).abs() < 1e-9);
        // Outside the train range maps outside [0, 1]; the fit ignored it.
        assert!(test_scaled[1][0] > 1.0);

        // Reordering test rows must not change their transforms.
        let reordered = vec![vec![100.0], vec![5.0]];
        let scaler = Scaler::fit(&train, ScaleMethod::MinMax);
        let out = scaler.transform(&reordered);
        assert!((out[1][0] - test_scaled[0][0]).abs() < 1e-12);
        assert!((out[0][0] - test_scaled[1][0]).abs() < 1e-12);
    }

    #[test]
    fn standard_scaler_centers_training_data() {
        let train = vec![vec![2.0], vec![4.0], vec![6.0]];
        let (scaled, _, _) = normalize(&train, None, ScaleMethod::Standard);
        let mean: f64 = scaled.iter().map(|row| row[0]).sum::<f64>() / 3.0;
        assert!(mean.abs() < 1e-9);
    }

    #[test]
    fn stratified_split_preserves_class_balance_and_is_seeded() {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for idx in 0..60 {
            x.push(vec![idx as f64]);
            y.push((idx % 3) as u8);
        }

        let (x_train, x_test, y_train, y_test) = split_train_test(&x, &y, 0.2, true, 42);
        assert_eq!(x_train.len() + x_test.len(), 60);
        assert_eq!(y_test.len(), 12);
        for class in 0..3u8 {
            assert_eq!(y_test.iter().filter(|c| **c == class).count(), 4);
        }
        assert_eq!(y_train.len(), 48);

        let again = split_train_test(&x, &y, 0.2, true, 42);
        assert_eq!(again.1, x_test);
        let different = split_train_test(&x, &y, 0.2, true, 43);
        assert_ne!(different.1, x_test);
    }

    #[test]
    fn mismatched_lengths_truncate_to_the_shorter_input() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let y = vec![0u8, 1, 2];
        let (x_train, x_test, y_train, y_test) = split_train_test(&x, &y, 0.0, false, 1);
        assert_eq!(x_train.len() + x_test.len(), 3);
        assert_eq!(y_train.len() + y_test.len(), 3);
        // Extra feature rows past the labels never appear in the output.
        assert!(x_train.iter().chain(&x_test).all(|row| row[0] < 4.0));
    }
}
