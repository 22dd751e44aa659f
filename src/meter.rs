use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;

use crate::dictionary::Dictionary;
use crate::loss::Predictions;

#[derive(Clone, Copy, Default)]
struct Metrics {
    gold: i64,
    predicted: i64,
    predicted_gold: i64,
}

impl Metrics {
    fn precision(&self) -> f64 {
        if self.predicted == 0 {
            return f64::NAN;
        }
        self.predicted_gold as f64 / self.predicted as f64
    }

    fn recall(&self) -> f64 {
        if self.gold == 0 {
            return f64::NAN;
        }
        self.predicted_gold as f64 / self.gold as f64
    }

    fn f1_score(&self) -> f64 {
        if self.predicted + self.gold == 0 {
            return f64::NAN;
        }
        2.0 * self.predicted_gold as f64 / (self.predicted + self.gold) as f64
    }
}

/// Precision/recall bookkeeping over (gold labels, predictions) pairs,
/// aggregate and per-label.
#[derive(Default)]
pub struct Meter {
    metrics: Metrics,
    nexamples: i64,
    label_metrics: BTreeMap<i32, Metrics>,
}

impl Meter {
    pub fn new() -> Meter {
        Meter::default()
    }

    pub fn nexamples(&self) -> i64 {
        self.nexamples
    }

    pub fn log(&mut self, labels: &[i32], predictions: &Predictions) {
        self.nexamples += 1;
        self.metrics.gold += labels.len() as i64;
        self.metrics.predicted += predictions.len() as i64;

        for &(_, predicted) in predictions {
            let m = self.label_metrics.entry(predicted).or_default();
            m.predicted += 1;
            if labels.contains(&predicted) {
                m.predicted_gold += 1;
                self.metrics.predicted_gold += 1;
            }
        }
        for &label in labels {
            self.label_metrics.entry(label).or_default().gold += 1;
        }
    }

    pub fn precision(&self) -> f64 {
        self.metrics.precision()
    }

    pub fn recall(&self) -> f64 {
        self.metrics.recall()
    }

    pub fn precision_label(&self, label: i32) -> f64 {
        self.label_metrics
            .get(&label)
            .copied()
            .unwrap_or_default()
            .precision()
    }

    pub fn recall_label(&self, label: i32) -> f64 {
        self.label_metrics
            .get(&label)
            .copied()
            .unwrap_or_default()
            .recall()
    }

    pub fn f1_score_label(&self, label: i32) -> f64 {
        self.label_metrics
            .get(&label)
            .copied()
            .unwrap_or_default()
            .f1_score()
    }

    pub fn write_general_metrics<W: Write>(&self, w: &mut W, k: i32) -> Result<()> {
        writeln!(w, "N\t{}", self.nexamples)?;
        writeln!(w, "P@{}\t{:.3}", k, self.precision())?;
        writeln!(w, "R@{}\t{:.3}", k, self.recall())?;
        Ok(())
    }

    /// One line per known label with its F1/precision/recall.
    pub fn write_label_metrics<W: Write>(&self, w: &mut W, dict: &Dictionary) -> Result<()> {
        for (&label, m) in &self.label_metrics {
            writeln!(
                w,
                "F1-Score : {:.6}  Precision : {:.6}  Recall : {:.6}   {}",
                m.f1_score(),
                m.precision(),
                m.recall(),
                dict.get_label(label)?
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_precision_and_recall() {
        let mut meter = Meter::new();
        // one example: gold {0}, predicted {0} -> perfect
        meter.log(&[0], &vec![(0.0, 0)]);
        // one example: gold {1}, predicted {0} -> miss
        meter.log(&[1], &vec![(0.0, 0)]);

        assert_eq!(meter.nexamples(), 2);
        assert!((meter.precision() - 0.5).abs() < 1e-9);
        assert!((meter.recall() - 0.5).abs() < 1e-9);

        assert!((meter.precision_label(0) - 0.5).abs() < 1e-9);
        assert!((meter.recall_label(0) - 1.0).abs() < 1e-9);
        assert!(meter.precision_label(1).is_nan());
        assert_eq!(meter.recall_label(1), 0.0);
    }

    #[test]
    fn empty_meter_is_nan() {
        let meter = Meter::new();
        assert!(meter.precision().is_nan());
        assert!(meter.recall().is_nan());
    }
}
