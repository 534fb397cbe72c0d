use super::types::{Band, ChartPoint, RepresentativeRun, SUCCESS_EPSILON, SimulationRun};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub percentile_curve: Vec<ChartPoint>,
    pub success_rate: f64,
    pub final_median_value: f64,
    pub volatility: f64,
}

struct YearColumns {
    columns: Vec<Vec<f64>>,
}

impl YearColumns {
    fn new(years: usize, expected_runs: usize) -> Self {
        Self {
            columns: (0..years)
                .map(|_| Vec::with_capacity(expected_runs))
                .collect(),
        }
    }

    fn push(&mut self, trajectory: &[f64]) {
        for (column, total) in self.columns.iter_mut().zip(trajectory) {
            column.push(*total);
        }
    }

    fn into_curve(self, start_total: f64) -> Vec<ChartPoint> {
        let mut curve = Vec::with_capacity(self.columns.len() + 1);
        curve.push(ChartPoint {
            year: 0,
            p10: start_total,
            p25: start_total,
            p50: start_total,
        });

        for (idx, mut column) in self.columns.into_iter().enumerate() {
            column.sort_unstable_by(|a, b| a.total_cmp(b));
            curve.push(ChartPoint {
                year: idx as u32 + 1,
                p10: at_percentile(&column, Band::Downturn.percentile()),
                p25: at_percentile(&column, Band::BelowAverage.percentile()),
                p50: at_percentile(&column, Band::Average.percentile()),
            });
        }
        curve
    }
}

pub fn percentile_index(len: usize, p: f64) -> usize {
    ((len as f64 * p).floor() as usize).min(len.saturating_sub(1))
}

fn at_percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted[percentile_index(sorted.len(), p)]
}

pub fn summarize(runs: &[SimulationRun], horizon: u32, start_total: f64) -> BatchSummary {
    let mut columns = YearColumns::new(horizon as usize, runs.len());
    for run in runs {
        columns.push(&run.trajectory);
    }
    let percentile_curve = columns.into_curve(start_total);

    let n = runs.len();
    let depleted = runs
        .iter()
        .filter(|r| r.final_balance <= SUCCESS_EPSILON)
        .count();
    let success_rate = if n == 0 {
        0.0
    } else {
        (n - depleted) as f64 / n as f64 * 100.0
    };

    let mut finals: Vec<f64> = runs.iter().map(|r| r.final_balance).collect();
    finals.sort_unstable_by(|a, b| a.total_cmp(b));
    let final_median_value = at_percentile(&finals, 0.50);

    let volatility = if n == 0 {
        0.0
    } else {
        runs.iter().map(|r| r.volatility).sum::<f64>() / n as f64 * 100.0
    };

    BatchSummary {
        percentile_curve,
        success_rate,
        final_median_value,
        volatility,
    }
}

/// Ranks runs by final balance, run id breaking ties, and picks one run per
/// band. The curve itself is pointwise, so no single run traces it.
pub fn select_representatives(runs: &[SimulationRun]) -> Vec<RepresentativeRun> {
    if runs.is_empty() {
        return Vec::new();
    }

    let mut order: Vec<&SimulationRun> = runs.iter().collect();
    order.sort_by(|a, b| {
        a.final_balance
            .total_cmp(&b.final_balance)
            .then(a.id.cmp(&b.id))
    });

    Band::ALL
        .iter()
        .map(|band| {
            let run = order[percentile_index(order.len(), band.percentile())];
            RepresentativeRun {
                band: *band,
                run_id: run.id,
                final_balance: run.final_balance,
            }
        })
        .collect()
}
