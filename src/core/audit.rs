use super::transition::{PortfolioState, TransitionParams, advance_year};
use super::types::{AnnualReturn, AuditRow, SimulationRequest};

pub fn build_audit_log(
    request: &SimulationRequest,
    params: &TransitionParams,
    returns: &[AnnualReturn],
) -> Vec<AuditRow> {
    let mut state = PortfolioState::initial(request, params.weights);
    let mut rows = Vec::with_capacity(returns.len());

    for (idx, sample) in returns.iter().enumerate() {
        let outcome = advance_year(&state, sample, params);
        rows.push(AuditRow {
            year: idx as u32 + 1,
            start_cash: state.cash,
            start_stock: state.stock,
            start_bond: state.bond,
            stock_return: sample.stock,
            bond_return: sample.bond,
            cash_return: sample.cash,
            growth: outcome.growth,
            fees: outcome.fees,
            action: outcome.action.to_string(),
            withdrawal: outcome.withdrawal,
            end_total: outcome.next.total(),
        });
        state = outcome.next;
    }

    rows
}
