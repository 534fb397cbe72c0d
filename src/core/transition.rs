use std::fmt;

use super::types::{
    AnnualReturn, BUFFER_YEARS, DEPLETION_THRESHOLD, SimulationRequest, Strategy, TargetWeights,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioState {
    pub stock: f64,
    pub bond: f64,
    pub cash: f64,
    pub spend: f64,
}

impl PortfolioState {
    pub fn initial(request: &SimulationRequest, weights: TargetWeights) -> Self {
        let total = request.start_total();
        let spend = request.annual_spend;
        match request.strategy {
            Strategy::Bucket => {
                let cash = total.min(BUFFER_YEARS * spend);
                Self {
                    stock: total - cash,
                    bond: 0.0,
                    cash,
                    spend,
                }
            }
            Strategy::Conservative | Strategy::Aggressive | Strategy::Custom => Self {
                stock: total * weights.stock,
                bond: total * weights.bond,
                cash: 0.0,
                spend,
            },
        }
    }

    pub fn total(&self) -> f64 {
        self.stock + self.bond + self.cash
    }

    fn depleted(spend: f64) -> Self {
        Self {
            stock: 0.0,
            bond: 0.0,
            cash: 0.0,
            spend,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionParams {
    pub strategy: Strategy,
    pub weights: TargetWeights,
    pub fee_rate: f64,
    pub friction_rate: f64,
}

impl TransitionParams {
    pub fn new(request: &SimulationRequest, weights: TargetWeights, friction_rate: f64) -> Self {
        Self {
            strategy: request.strategy,
            weights,
            fee_rate: request.fee_rate(),
            friction_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum YearAction {
    PortfolioDepleted,
    SpentFromBuffer,
    ForcedSale { market_up: bool },
    RefilledBuffer { amount: f64 },
    NoRefillNeeded,
    Rebalanced { stock_weight: f64 },
}

impl fmt::Display for YearAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearAction::PortfolioDepleted => write!(f, "Portfolio Depleted"),
            YearAction::SpentFromBuffer => write!(f, "Market down, spent from buffer"),
            YearAction::ForcedSale { market_up: false } => {
                write!(f, "Market down, buffer empty, forced sale")
            }
            YearAction::ForcedSale { market_up: true } => {
                write!(f, "Market up, buffer short, forced sale")
            }
            YearAction::RefilledBuffer { amount } => {
                write!(f, "Market up, refilled buffer by ${}", group_thousands(*amount))
            }
            YearAction::NoRefillNeeded => write!(f, "Market up, no refill needed"),
            YearAction::Rebalanced { stock_weight } => {
                let stock = (stock_weight * 100.0).round();
                write!(f, "Rebalanced to {stock:.0}/{:.0}", 100.0 - stock)
            }
        }
    }
}

fn group_thousands(amount: f64) -> String {
    let digits = format!("{:.0}", amount.max(0.0));
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearOutcome {
    pub next: PortfolioState,
    pub withdrawal: f64,
    pub fees: f64,
    pub growth: f64,
    pub action: YearAction,
}

/// Pure: the same state, returns and params always give the same outcome,
/// which is what lets the audit log replay a stored run exactly.
pub fn advance_year(
    state: &PortfolioState,
    returns: &AnnualReturn,
    params: &TransitionParams,
) -> YearOutcome {
    let gross_stock = state.stock * (1.0 + returns.stock);
    let gross_bond = state.bond * (1.0 + returns.bond);
    let gross_cash = state.cash * (1.0 + returns.cash);
    let growth =
        (gross_stock - state.stock) + (gross_bond - state.bond) + (gross_cash - state.cash);

    let stock_fee = gross_stock * params.fee_rate;
    let bond_fee = gross_bond * params.fee_rate;
    let fees = stock_fee + bond_fee;

    let stock = (gross_stock - stock_fee).max(0.0);
    let bond = (gross_bond - bond_fee).max(0.0);
    let cash = gross_cash.max(0.0);

    let total_available = stock + bond + cash;
    if total_available <= DEPLETION_THRESHOLD {
        return depleted_outcome(state.spend, 0.0, fees, growth);
    }
    let withdrawal = state.spend.min(total_available);

    let after_growth = PortfolioState {
        stock,
        bond,
        cash,
        spend: state.spend,
    };

    match params.strategy {
        Strategy::Bucket => bucket_year(
            after_growth,
            returns,
            params.friction_rate,
            withdrawal,
            fees,
            growth,
        ),
        Strategy::Conservative | Strategy::Aggressive | Strategy::Custom => {
            rebalance_year(after_growth, params, withdrawal, fees, growth)
        }
    }
}

fn depleted_outcome(spend: f64, withdrawal: f64, fees: f64, growth: f64) -> YearOutcome {
    YearOutcome {
        next: PortfolioState::depleted(spend),
        withdrawal,
        fees,
        growth,
        action: YearAction::PortfolioDepleted,
    }
}

fn bucket_year(
    mut pf: PortfolioState,
    returns: &AnnualReturn,
    friction_rate: f64,
    withdrawal: f64,
    fees: f64,
    growth: f64,
) -> YearOutcome {
    let market_up = returns.stock > 0.0;
    let buffer_target = BUFFER_YEARS * pf.spend;

    let mut refilled = 0.0;
    if market_up && pf.cash < buffer_target {
        let sale = (buffer_target - pf.cash).min(pf.stock);
        pf.stock -= sale;
        refilled = sale * (1.0 - friction_rate);
        pf.cash += refilled;
    }

    let mut forced_sale = false;
    if pf.cash >= withdrawal {
        pf.cash -= withdrawal;
    } else {
        let shortfall = withdrawal - pf.cash;
        pf.cash = 0.0;
        let gross_sell = shortfall / (1.0 - friction_rate);
        pf.stock = (pf.stock - gross_sell).max(0.0);
        forced_sale = true;
    }

    let action = if forced_sale {
        YearAction::ForcedSale { market_up }
    } else if !market_up {
        YearAction::SpentFromBuffer
    } else if refilled > 0.0 {
        YearAction::RefilledBuffer { amount: refilled }
    } else {
        YearAction::NoRefillNeeded
    };

    YearOutcome {
        next: pf,
        withdrawal,
        fees,
        growth,
        action,
    }
}

fn rebalance_year(
    pf: PortfolioState,
    params: &TransitionParams,
    withdrawal: f64,
    fees: f64,
    growth: f64,
) -> YearOutcome {
    let remaining = pf.total() - withdrawal;
    let after_drag = remaining * (1.0 - params.friction_rate);
    if after_drag <= DEPLETION_THRESHOLD {
        return depleted_outcome(pf.spend, withdrawal, fees, growth);
    }

    YearOutcome {
        next: PortfolioState {
            stock: after_drag * params.weights.stock,
            bond: after_drag * params.weights.bond,
            cash: 0.0,
            spend: pf.spend,
        },
        withdrawal,
        fees,
        growth,
        action: YearAction::Rebalanced {
            stock_weight: params.weights.stock,
        },
    }
}
