//! Binary confusion matrices and derived metrics

use crate::types::{CanopyError, CanopyResult};
use ndarray::{Array2, Zip};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

/// The two admissible label values of a binary map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryLabels {
    pub negative: u8,
    pub positive: u8,
}

impl BinaryLabels {
    pub fn new(negative: u8, positive: u8) -> Self {
        Self { negative, positive }
    }

    fn is_positive(&self, label: u8) -> CanopyResult<bool> {
        if label == self.positive {
            Ok(true)
        } else if label == self.negative {
            Ok(false)
        } else {
            Err(CanopyError::LabelOutOfDomain {
                label,
                tree_value: self.positive,
            })
        }
    }
}

impl Default for BinaryLabels {
    fn default() -> Self {
        Self::new(0, 255)
    }
}

/// Pixel-pair counts of one or more tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairCounts {
    pub true_negative: u64,
    pub false_positive: u64,
    pub false_negative: u64,
    pub true_positive: u64,
}

impl PairCounts {
    /// Count (observed, predicted) label pairs of two same-shaped maps
    pub fn tabulate(
        observed: &Array2<u8>,
        predicted: &Array2<u8>,
        labels: BinaryLabels,
    ) -> CanopyResult<Self> {
        if observed.dim() != predicted.dim() {
            return Err(CanopyError::DimensionMismatch(format!(
                "observed {:?} vs predicted {:?}",
                observed.dim(),
                predicted.dim()
            )));
        }

        let mut counts = PairCounts::default();
        let mut invalid = None;
        Zip::from(observed).and(predicted).for_each(|&obs, &pred| {
            if invalid.is_some() {
                return;
            }
            match (labels.is_positive(obs), labels.is_positive(pred)) {
                (Ok(false), Ok(false)) => counts.true_negative += 1,
                (Ok(false), Ok(true)) => counts.false_positive += 1,
                (Ok(true), Ok(false)) => counts.false_negative += 1,
                (Ok(true), Ok(true)) => counts.true_positive += 1,
                (Err(e), _) | (_, Err(e)) => invalid = Some(e),
            }
        });

        match invalid {
            Some(error) => Err(error),
            None => Ok(counts),
        }
    }

    pub fn total(&self) -> u64 {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

impl Add for PairCounts {
    type Output = PairCounts;

    fn add(self, other: PairCounts) -> PairCounts {
        PairCounts {
            true_negative: self.true_negative + other.true_negative,
            false_positive: self.false_positive + other.false_positive,
            false_negative: self.false_negative + other.false_negative,
            true_positive: self.true_positive + other.true_positive,
        }
    }
}

impl Sum for PairCounts {
    fn sum<I: Iterator<Item = PairCounts>>(iter: I) -> PairCounts {
        iter.fold(PairCounts::default(), Add::add)
    }
}

/// Ratio that is undefined for a zero denominator
fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

/// Scores derived from a confusion matrix; `None` marks an undefined score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
}

impl Metrics {
    pub fn from_counts(counts: &PairCounts) -> Self {
        let accuracy = ratio(counts.true_positive + counts.true_negative, counts.total());
        let precision = ratio(counts.true_positive, counts.true_positive + counts.false_positive);
        let recall = ratio(counts.true_positive, counts.true_positive + counts.false_negative);
        let f1 = match (precision, recall) {
            (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
            _ => None,
        };

        Metrics { accuracy, precision, recall, f1 }
    }
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "undefined".to_string(), |value| format!("{:.4}", value))
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy {}, precision {}, recall {}, F1 {}",
            format_score(self.accuracy),
            format_score(self.precision),
            format_score(self.recall),
            format_score(self.f1)
        )
    }
}

/// Row-normalized 2x2 confusion matrix over the total pixel count.
///
/// Rows are observed (negative, positive), columns are predicted
/// (negative, positive); entries sum to 1 unless the matrix is empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfusionMatrix {
    counts: PairCounts,
}

impl ConfusionMatrix {
    pub fn from_counts(counts: PairCounts) -> Self {
        Self { counts }
    }

    pub fn counts(&self) -> &PairCounts {
        &self.counts
    }

    /// Fractions of the total, all zero for an empty matrix
    pub fn table(&self) -> [[f64; 2]; 2] {
        let total = self.counts.total();
        let frequency = |count: u64| ratio(count, total).unwrap_or(0.0);
        [
            [frequency(self.counts.true_negative), frequency(self.counts.false_positive)],
            [frequency(self.counts.false_negative), frequency(self.counts.true_positive)],
        ]
    }

    pub fn metrics(&self) -> Metrics {
        Metrics::from_counts(&self.counts)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table();
        writeln!(f, "{:>14} {:>10} {:>10}", "obs \\ pred", "negative", "positive")?;
        writeln!(f, "{:>14} {:>10.4} {:>10.4}", "negative", table[0][0], table[0][1])?;
        write!(f, "{:>14} {:>10.4} {:>10.4}", "positive", table[1][0], table[1][1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn counts(tn: u64, fp: u64, fn_: u64, tp: u64) -> PairCounts {
        PairCounts {
            true_negative: tn,
            false_positive: fp,
            false_negative: fn_,
            true_positive: tp,
        }
    }

    #[test]
    fn test_tabulate_counts_pairs() {
        let observed = Array2::from_shape_vec((2, 2), vec![0, 255, 255, 0]).unwrap();
        let predicted = Array2::from_shape_vec((2, 2), vec![0, 255, 0, 255]).unwrap();
        let tallied = PairCounts::tabulate(&observed, &predicted, BinaryLabels::default()).unwrap();
        assert_eq!(tallied, counts(1, 1, 1, 1));
        assert_eq!(tallied.total(), 4);
    }

    #[test]
    fn test_tabulate_rejects_shape_mismatch() {
        let observed = Array2::<u8>::zeros((2, 2));
        let predicted = Array2::<u8>::zeros((2, 3));
        let result = PairCounts::tabulate(&observed, &predicted, BinaryLabels::default());
        assert!(matches!(result, Err(CanopyError::DimensionMismatch(_))));
    }

    #[test]
    fn test_tabulate_rejects_unknown_label() {
        let observed = Array2::from_shape_vec((1, 2), vec![0, 255]).unwrap();
        let predicted = Array2::from_shape_vec((1, 2), vec![0, 128]).unwrap();
        let result = PairCounts::tabulate(&observed, &predicted, BinaryLabels::default());
        assert!(matches!(
            result,
            Err(CanopyError::LabelOutOfDomain { label: 128, tree_value: 255 })
        ));
    }

    #[test]
    fn test_metrics_without_false_positives() {
        let metrics = Metrics::from_counts(&counts(100, 0, 20, 80));
        assert_relative_eq!(metrics.precision.unwrap(), 1.0);
        assert_relative_eq!(metrics.recall.unwrap(), 0.8);
        assert_relative_eq!(metrics.f1.unwrap(), 2.0 * 0.8 / 1.8, epsilon = 1e-12);
        assert_relative_eq!(metrics.accuracy.unwrap(), 180.0 / 200.0);
    }

    #[test]
    fn test_precision_undefined_without_positive_predictions() {
        let metrics = Metrics::from_counts(&counts(50, 0, 10, 0));
        assert_eq!(metrics.precision, None);
        assert_eq!(metrics.recall, Some(0.0));
        assert_eq!(metrics.f1, None);
        assert_eq!(format!("{}", metrics), "accuracy 0.8333, precision undefined, recall 0.0000, F1 undefined");
    }

    #[test]
    fn test_empty_matrix_has_no_scores() {
        let matrix = ConfusionMatrix::from_counts(PairCounts::default());
        assert_eq!(matrix.table(), [[0.0, 0.0], [0.0, 0.0]]);
        let metrics = matrix.metrics();
        assert_eq!(metrics.accuracy, None);
        assert_eq!(metrics.f1, None);
    }

    #[test]
    fn test_table_sums_to_one() {
        let matrix = ConfusionMatrix::from_counts(counts(3, 1, 2, 4));
        let table = matrix.table();
        let sum: f64 = table.iter().flatten().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        assert_relative_eq!(table[1][1], 0.4);
    }

    #[test]
    fn test_sum_of_tiles() {
        let total: PairCounts = vec![counts(1, 2, 3, 4), counts(10, 20, 30, 40)].into_iter().sum();
        assert_eq!(total, counts(11, 22, 33, 44));
        assert_eq!(total.total(), 110);
    }
}
