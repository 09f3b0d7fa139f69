//! Pairwise component correlation

use crate::baseline::mean;
use crate::config::CorrelationConfig;
use crate::harmonizer::HarmonizedTable;
use crate::types::CorrelationMatrix;

#[derive(Debug, Clone, Default)]
pub struct CorrelationEngine {
    config: CorrelationConfig,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    /// Correlation matrix over every column of the table
    pub fn compute(&self, table: &HarmonizedTable) -> CorrelationMatrix {
        let names: Vec<&str> = table.component_names().collect();
        self.compute_for(table, &names)
    }

    /// Correlation matrix over the named components present in the table.
    ///
    /// Fewer than two components or fewer than two rows yields an empty
    /// matrix.
    pub fn compute_for(&self, table: &HarmonizedTable, components: &[&str]) -> CorrelationMatrix {
        let start = match self.config.window {
            0 => 0,
            window => table.len().saturating_sub(window),
        };

        let series: Vec<(String, &[f64])> = components
            .iter()
            .filter_map(|name| {
                let column = table.column(name)?;
                Some((column.component.clone(), &column.values[start..]))
            })
            .collect();

        if series.len() < 2 || table.len() - start < 2 {
            return CorrelationMatrix::empty();
        }

        let k = series.len();
        let mut values = vec![vec![0.0; k]; k];
        for i in 0..k {
            values[i][i] = 1.0;
            for j in (i + 1)..k {
                let r = pearson(series[i].1, series[j].1);
                values[i][j] = r;
                values[j][i] = r;
            }
        }

        CorrelationMatrix {
            components: series.into_iter().map(|(name, _)| name).collect(),
            values,
        }
    }
}

/// Pearson correlation clipped to [-1, 1].
///
/// Zero variance, non-finite input or fewer than two paired values give 0.0.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (Some(mean_a), Some(mean_b)) = (mean(a.iter().copied()), mean(b.iter().copied())) else {
        return 0.0;
    };

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denominator = (var_a * var_b).sqrt();
    if denominator > 0.0 && denominator.is_finite() {
        let r = cov / denominator;
        if r.is_finite() {
            r.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    } else {
        0.0
    }
}
