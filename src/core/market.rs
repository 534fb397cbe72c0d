use std::f64::consts::PI;

use rand::Rng;
use rand::distributions::Standard;

use super::error::SimulationError;
use super::types::AnnualReturn;

// stock, bond, cash
pub const ASSET_CORRELATION: [[f64; 3]; 3] = [
    [1.00, -0.15, 0.05],
    [-0.15, 1.00, 0.10],
    [0.05, 0.10, 1.00],
];

const MIN_GROWTH_TERM: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationModel {
    matrix: [[f64; 3]; 3],
    lower: [[f64; 3]; 3],
}

impl CorrelationModel {
    pub fn standard() -> Result<Self, SimulationError> {
        Self::new(ASSET_CORRELATION)
    }

    pub fn new(matrix: [[f64; 3]; 3]) -> Result<Self, SimulationError> {
        let lower = cholesky(&matrix)?;
        Ok(Self { matrix, lower })
    }

    pub fn matrix(&self) -> &[[f64; 3]; 3] {
        &self.matrix
    }

    pub fn lower(&self) -> &[[f64; 3]; 3] {
        &self.lower
    }

    pub fn correlate(&self, z: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (i, row) in self.lower.iter().enumerate() {
            out[i] = row.iter().zip(z.iter()).map(|(l, z)| l * z).sum();
        }
        out
    }
}

fn cholesky(m: &[[f64; 3]; 3]) -> Result<[[f64; 3]; 3], SimulationError> {
    let mut l = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let radicand = m[i][i] - sum;
                if !radicand.is_finite() || radicand <= 0.0 {
                    return Err(SimulationError::Configuration(format!(
                        "correlation matrix is not positive definite (pivot {i}: {radicand})"
                    )));
                }
                l[i][j] = radicand.sqrt();
            } else {
                l[i][j] = (m[i][j] - sum) / l[j][j];
            }
        }
    }
    Ok(l)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetAssumption {
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetAssumptions {
    pub stock: AssetAssumption,
    pub bond: AssetAssumption,
    pub cash: AssetAssumption,
}

impl AssetAssumptions {
    pub const fn nominal() -> Self {
        Self {
            stock: AssetAssumption {
                mean: 0.10,
                std_dev: 0.17,
            },
            bond: AssetAssumption {
                mean: 0.05,
                std_dev: 0.06,
            },
            cash: AssetAssumption {
                mean: 0.03,
                std_dev: 0.01,
            },
        }
    }

    // inflation_rate is a percent
    pub fn deflate(&self, inflation_rate: f64) -> Self {
        let factor = 1.0 + inflation_rate / 100.0;
        let real = |a: AssetAssumption| AssetAssumption {
            mean: (1.0 + a.mean) / factor - 1.0,
            std_dev: a.std_dev / factor,
        };
        Self {
            stock: real(self.stock),
            bond: real(self.bond),
            cash: real(self.cash),
        }
    }

    fn as_array(&self) -> [AssetAssumption; 3] {
        [self.stock, self.bond, self.cash]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormalParams {
    pub mu: f64,
    pub sigma: f64,
}

impl LogNormalParams {
    pub fn from_arithmetic(a: AssetAssumption) -> Self {
        let term = (1.0 + a.mean).max(MIN_GROWTH_TERM);
        let phi = (a.std_dev * a.std_dev + term * term).sqrt();
        Self {
            mu: (term * term / phi).ln(),
            sigma: (phi * phi / (term * term)).ln().sqrt(),
        }
    }

    pub fn annual_return(self, z: f64) -> f64 {
        (self.mu + self.sigma * z).exp() - 1.0
    }
}

pub trait ReturnSource {
    fn next_return(&mut self) -> AnnualReturn;
}

pub struct CorrelatedReturns<'a, R> {
    correlation: &'a CorrelationModel,
    params: [LogNormalParams; 3],
    rng: R,
}

impl<'a, R: Rng> CorrelatedReturns<'a, R> {
    pub fn new(correlation: &'a CorrelationModel, real: &AssetAssumptions, rng: R) -> Self {
        Self {
            correlation,
            params: real.as_array().map(LogNormalParams::from_arithmetic),
            rng,
        }
    }
}

impl<R: Rng> ReturnSource for CorrelatedReturns<'_, R> {
    fn next_return(&mut self) -> AnnualReturn {
        let z = [
            standard_normal(&mut self.rng),
            standard_normal(&mut self.rng),
            standard_normal(&mut self.rng),
        ];
        let corr = self.correlation.correlate(z);
        AnnualReturn {
            stock: self.params[0].annual_return(corr[0]),
            bond: self.params[1].annual_return(corr[1]),
            cash: self.params[2].annual_return(corr[2]),
        }
    }
}

// Box-Muller, cosine branch only.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let mut u: f64 = rng.sample(Standard);
    while u == 0.0 {
        u = rng.sample(Standard);
    }
    let v: f64 = rng.sample(Standard);
    (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
}

// Repeats the last entry once exhausted.
#[derive(Debug, Clone)]
pub struct FixedReturns {
    returns: Vec<AnnualReturn>,
    cursor: usize,
}

impl FixedReturns {
    pub fn constant(value: AnnualReturn) -> Self {
        Self::sequence(vec![value])
    }

    pub fn sequence(returns: Vec<AnnualReturn>) -> Self {
        Self { returns, cursor: 0 }
    }
}

impl ReturnSource for FixedReturns {
    fn next_return(&mut self) -> AnnualReturn {
        let idx = self.cursor.min(self.returns.len().saturating_sub(1));
        self.cursor += 1;
        self.returns.get(idx).copied().unwrap_or(AnnualReturn {
            stock: 0.0,
            bond: 0.0,
            cash: 0.0,
        })
    }
}
