//! Turns a [`Plan`] into ledger submissions.
//!
//! Groups are admitted in plan order until the balance or the gas ceiling
//! would be exceeded; a group is never split. Within the batch every
//! reinforcement of a cube is placed ahead of any transfer or engage that
//! draws units from that cube. When the allowance does not cover the batch,
//! a standalone approval is emitted to be confirmed first; an approval that
//! alone breaks the gas ceiling takes the whole batch down with it.

use crate::modules::config::BatchConfig;
use crate::modules::economy::{Amount, Economy};
use crate::modules::error::SkipReason;
use crate::modules::grid::CubeId;
use crate::modules::ledger::EncodedAction;
use crate::modules::strategy::{Plan, ProposedAction};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposedBatch {
    /// Submitted and confirmed on its own before `actions`.
    pub approval: Option<EncodedAction>,
    pub approval_gas: u64,
    pub actions: Vec<EncodedAction>,
    pub labels: Vec<String>,
    pub total_cost: Amount,
    pub gas: u64,
    pub skips: Vec<SkipReason>,
}

impl ComposedBatch {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn gas_of(action: &ProposedAction, config: &BatchConfig) -> u64 {
    match action {
        ProposedAction::Reinforce { .. } => config.reinforce_gas,
        ProposedAction::Transfer { .. } => config.transfer_gas,
        ProposedAction::Engage { .. } => config.engage_gas,
    }
}

/// Cube whose stack the action spends units from, if any.
fn source_cube(action: &ProposedAction) -> Option<CubeId> {
    match action {
        ProposedAction::Reinforce { .. } => None,
        ProposedAction::Transfer { from, .. } => Some(*from),
        ProposedAction::Engage { cube, .. } => Some(*cube),
    }
}

/// Moves each reinforcement ahead of the first earlier action that consumes
/// from the same cube. Relative order is otherwise kept.
pub fn order_actions(actions: Vec<ProposedAction>) -> Vec<ProposedAction> {
    let mut ordered: Vec<ProposedAction> = Vec::with_capacity(actions.len());
    for action in actions {
        let insert_at = match &action {
            ProposedAction::Reinforce { cube, .. } => ordered
                .iter()
                .position(|a| source_cube(a) == Some(*cube)),
            _ => None,
        };
        match insert_at {
            Some(index) => ordered.insert(index, action),
            None => ordered.push(action),
        }
    }
    ordered
}

pub fn compose(
    plan: &Plan,
    economy: &Economy,
    balance: Amount,
    allowance: Amount,
    config: &BatchConfig,
) -> ComposedBatch {
    let mut batch = ComposedBatch::default();
    let mut admitted = Vec::new();

    for (index, group) in plan.groups.iter().enumerate() {
        let cost = group.cost(economy);
        let gas: u64 = group.actions.iter().map(|a| gas_of(a, config)).sum();

        let over_balance = batch.total_cost.saturating_add(cost) > balance;
        let over_gas = batch.gas.saturating_add(gas) > config.gas_ceiling;
        if over_balance || over_gas {
            let rest: Vec<&str> = plan.groups[index..]
                .iter()
                .map(|g| g.label.as_str())
                .collect();
            batch.skips.push(if over_balance {
                SkipReason::InsufficientBalance {
                    needed: batch.total_cost.saturating_add(cost),
                    available: balance,
                }
            } else {
                SkipReason::GasCeilingExceeded {
                    dropped: rest.join(", "),
                }
            });
            break;
        }

        batch.total_cost += cost;
        batch.gas += gas;
        batch.labels.push(group.label.clone());
        admitted.extend(group.actions.iter().cloned());
    }

    batch.actions = order_actions(admitted)
        .iter()
        .map(ProposedAction::encode)
        .collect();

    if !batch.actions.is_empty() && allowance < batch.total_cost {
        batch.skips.push(SkipReason::InsufficientAllowance {
            needed: batch.total_cost,
            allowance,
        });
        if config.approve_gas > config.gas_ceiling {
            batch.skips.push(SkipReason::GasCeilingExceeded {
                dropped: format!("approve, {}", batch.labels.join(", ")),
            });
            return ComposedBatch {
                skips: batch.skips,
                ..ComposedBatch::default()
            };
        }
        batch.approval = Some(EncodedAction::Approve {
            amount: Amount::MAX,
        });
        batch.approval_gas = config.approve_gas;
    }
    batch
}
