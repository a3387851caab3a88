//! Pluggable decision policies.
//!
//! Every strategy reads the same fresh [`WorldView`] and produces a [`Plan`]:
//! groups of actions that belong together (for example a reinforcement and
//! the attack it funds) plus the reasons it chose not to act elsewhere.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::modules::config::StrategyConfig;
use crate::modules::economy::{Amount, Economy, Multiplier, Power, Roi, Units, required_force, roi};
use crate::modules::engine::LoopState;
use crate::modules::error::SkipReason;
use crate::modules::grid::{CubeId, Grid};
use crate::modules::ledger::{EncodedAction, Identity, LedgerEvent, StackRecord};
use crate::modules::scanner::WorldView;

pub mod aftershock;
pub mod fortress;
pub mod predator;
pub mod seeder;
pub mod sniper;

pub use aftershock::Aftershock;
pub use fortress::Fortress;
pub use predator::Predator;
pub use seeder::Seeder;
pub use sniper::Sniper;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Best ROI above a threshold
    Sniper,
    /// Largest bounty, overwhelming force
    Predator,
    /// Hold and defend a hub cube
    Fortress,
    /// React one cycle after observed kills
    Aftershock,
    /// Reinforce random empty or weak cubes
    Seeder,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Sniper => "sniper",
            StrategyKind::Predator => "predator",
            StrategyKind::Fortress => "fortress",
            StrategyKind::Aftershock => "aftershock",
            StrategyKind::Seeder => "seeder",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ProposedAction {
    Reinforce {
        cube: CubeId,
        units: Units,
    },
    Transfer {
        from: CubeId,
        to: CubeId,
        units: Units,
        reapers: Units,
    },
    Engage {
        target: Identity,
        cube: CubeId,
        units: Units,
        reapers: Units,
    },
}

impl ProposedAction {
    /// Tokens the action spends.
    pub fn cost(&self, economy: &Economy) -> Amount {
        match self {
            ProposedAction::Reinforce { units, .. } => economy.spawn_cost(*units),
            ProposedAction::Transfer { .. } => economy.params.move_fee,
            ProposedAction::Engage { .. } => 0,
        }
    }

    pub fn encode(&self) -> EncodedAction {
        match self {
            ProposedAction::Reinforce { cube, units } => EncodedAction::Reinforce {
                cube: *cube,
                amount: *units,
            },
            ProposedAction::Transfer {
                from,
                to,
                units,
                reapers,
            } => EncodedAction::Transfer {
                from: *from,
                to: *to,
                units: *units,
                reapers: *reapers,
            },
            ProposedAction::Engage {
                target,
                cube,
                units,
                reapers,
            } => EncodedAction::Engage {
                target: target.clone(),
                cube: *cube,
                units: *units,
                reapers: *reapers,
            },
        }
    }
}

/// Actions that only make sense together; the composer keeps or drops them whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionGroup {
    pub label: String,
    pub actions: Vec<ProposedAction>,
}

impl ActionGroup {
    pub fn new(label: impl Into<String>, actions: Vec<ProposedAction>) -> Self {
        Self {
            label: label.into(),
            actions,
        }
    }

    pub fn cost(&self, economy: &Economy) -> Amount {
        self.actions
            .iter()
            .map(|a| a.cost(economy))
            .fold(0, Amount::saturating_add)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub groups: Vec<ActionGroup>,
    pub skips: Vec<SkipReason>,
}

impl Plan {
    pub fn push(&mut self, group: ActionGroup) {
        if !group.actions.is_empty() {
            self.groups.push(group);
        }
    }

    pub fn skip(&mut self, reason: SkipReason) {
        self.skips.push(reason);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total_cost(&self, economy: &Economy) -> Amount {
        self.groups
            .iter()
            .map(|g| g.cost(economy))
            .fold(0, Amount::saturating_add)
    }
}

/// Read-only inputs for one decision.
pub struct DecisionContext<'a> {
    pub identity: &'a str,
    pub grid: &'a Grid,
    pub economy: &'a Economy,
    pub view: &'a WorldView,
    pub balance: Amount,
    /// Recent events, oldest first. Empty unless the strategy asked for them.
    pub events: &'a [LedgerEvent],
    pub power_ceiling: Power,
    pub reserve_units: Units,
}

pub trait Strategy {
    fn kind(&self) -> StrategyKind;

    /// Cubes to read this cycle.
    fn scan_targets(&self, grid: &Grid, state: &LoopState) -> Vec<CubeId>;

    /// How many recent ledger events to fetch before deciding; `None` skips the feed.
    fn event_window(&self) -> Option<usize> {
        None
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>, state: &mut LoopState) -> Plan;
}

pub fn build_strategy(config: &StrategyConfig) -> Box<dyn Strategy> {
    match config.kind {
        StrategyKind::Sniper => Box::new(Sniper::new(config.sniper)),
        StrategyKind::Predator => Box::new(Predator::new(config.predator)),
        StrategyKind::Fortress => Box::new(Fortress::new(config.fortress)),
        StrategyKind::Aftershock => Box::new(Aftershock::new(config.aftershock)),
        StrategyKind::Seeder => Box::new(Seeder::new(config.seeder)),
    }
}

/// One attackable stack, recomputed from fresh reads every cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetCandidate {
    pub cube: CubeId,
    pub occupant: Identity,
    pub power: Power,
    pub required_force: Units,
    /// Units to buy before attacking.
    pub reinforce_units: Units,
    pub engage_units: Units,
    pub engage_reapers: Units,
    pub cost: Amount,
    pub net_bounty: Amount,
    pub roi: Roi,
}

impl TargetCandidate {
    /// Reinforce (if needed) then engage, as one group.
    pub fn attack_group(&self, label: &str) -> ActionGroup {
        let mut actions = Vec::with_capacity(2);
        if self.reinforce_units > 0 {
            actions.push(ProposedAction::Reinforce {
                cube: self.cube,
                units: self.reinforce_units,
            });
        }
        actions.push(ProposedAction::Engage {
            target: self.occupant.clone(),
            cube: self.cube,
            units: self.engage_units,
            reapers: self.engage_reapers,
        });
        ActionGroup::new(format!("{} cube {}", label, self.cube), actions)
    }
}

/// Sizes an attack on `target` from whatever we already hold on its cube.
///
/// Our reapers count toward the force first; units make up the rest, and
/// `reserve_units` stay behind so the source stack survives.
pub fn evaluate_target(
    ctx: &DecisionContext<'_>,
    cube: CubeId,
    target: &StackRecord,
    multiplier: Multiplier,
    floor: Units,
) -> TargetCandidate {
    let economy = ctx.economy;
    let power = target.power(economy);
    let force = required_force(power, multiplier, floor);

    let (own_units, own_reapers) = ctx
        .view
        .self_stack(cube, ctx.identity)
        .map(|s| (s.units, s.reapers))
        .unwrap_or((0, 0));
    let reaper_power = economy.power(0, own_reapers);
    let engage_units = Units::try_from((force as Power).saturating_sub(reaper_power))
        .unwrap_or(Units::MAX);
    let reinforce_units = engage_units
        .saturating_add(ctx.reserve_units)
        .saturating_sub(own_units);

    let cost = economy.spawn_cost(reinforce_units);
    let net_bounty = economy.net_bounty(target.gross_bounty(economy));
    TargetCandidate {
        cube,
        occupant: target.occupant.clone(),
        power,
        required_force: force,
        reinforce_units,
        engage_units,
        engage_reapers: own_reapers,
        cost,
        net_bounty,
        roi: roi(net_bounty, cost),
    }
}

/// Every hostile stack in view under the power ceiling, sized for attack.
/// Stacks above the ceiling are reported as skips.
pub fn collect_candidates(
    ctx: &DecisionContext<'_>,
    multiplier: Multiplier,
    floor: Units,
    skips: &mut Vec<SkipReason>,
) -> Vec<TargetCandidate> {
    let mut out = Vec::new();
    for occupancy in &ctx.view.cubes {
        for stack in ctx.view.hostiles_on(occupancy.cube, ctx.identity) {
            let power = stack.power(ctx.economy);
            if power > ctx.power_ceiling {
                skips.push(SkipReason::PowerCeilingExceeded {
                    cube: occupancy.cube,
                    power,
                    ceiling: ctx.power_ceiling,
                });
                continue;
            }
            out.push(evaluate_target(ctx, occupancy.cube, stack, multiplier, floor));
        }
    }
    out
}

/// Emits the candidate's attack if the balance covers it; otherwise defers.
pub fn commit_if_affordable(
    ctx: &DecisionContext<'_>,
    candidate: &TargetCandidate,
    label: &str,
    plan: &mut Plan,
) {
    if candidate.cost > ctx.balance {
        plan.skip(SkipReason::InsufficientBalance {
            needed: candidate.cost,
            available: ctx.balance,
        });
        return;
    }
    plan.push(candidate.attack_group(label));
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn evaluate_uses_floor_and_reserve() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![(5, vec![stack("0xbbbb", 50, 0, 0)])]);
        let ctx = context(&grid, &economy, &view, 1_000_000);
        let c = evaluate_target(&ctx, 5, &view.cubes[0].stacks[0], Multiplier::whole(3), 1_000);
        assert_eq!(c.power, 50);
        assert_eq!(c.required_force, 1_000);
        assert_eq!(c.engage_units, 1_000);
        assert_eq!(c.reinforce_units, 1_001);
        assert_eq!(c.cost, 20_020);
        // 50 × 666 gross, less 6.66% burn.
        assert_eq!(c.net_bounty, 31_083);
    }

    #[test]
    fn existing_units_and_reapers_reduce_cost() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![(
            5,
            vec![stack("0xbbbb", 50, 0, 0), stack(ME, 600, 1, 0)],
        )]);
        let ctx = context(&grid, &economy, &view, 0);
        let c = evaluate_target(&ctx, 5, &view.cubes[0].stacks[0], Multiplier::whole(3), 1_000);
        // 1 reaper covers 666; 334 units still needed plus reserve, 600 already held.
        assert_eq!(c.engage_units, 334);
        assert_eq!(c.engage_reapers, 1);
        assert_eq!(c.reinforce_units, 0);
        assert_eq!(c.roi, Roi::Unbounded);

        let group = c.attack_group("snipe");
        assert_eq!(group.actions.len(), 1);
    }

    #[test]
    fn ceiling_filters_candidates() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![
            (1, vec![stack("0xbbbb", 2_000_000, 0, 0)]),
            (2, vec![stack("0xcccc", 10, 0, 0)]),
        ]);
        let ctx = context(&grid, &economy, &view, 0);
        let mut skips = Vec::new();
        let found = collect_candidates(&ctx, Multiplier::whole(3), 1, &mut skips);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].cube, 2);
        assert!(matches!(skips[0], SkipReason::PowerCeilingExceeded { cube: 1, .. }));
    }

    #[test]
    fn unaffordable_candidate_defers() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![(5, vec![stack("0xbbbb", 50, 0, 0)])]);
        let ctx = context(&grid, &economy, &view, 100);
        let c = evaluate_target(&ctx, 5, &view.cubes[0].stacks[0], Multiplier::whole(3), 1_000);
        let mut plan = Plan::default();
        commit_if_affordable(&ctx, &c, "snipe", &mut plan);
        assert!(plan.is_empty());
        assert!(matches!(plan.skips[0], SkipReason::InsufficientBalance { .. }));
    }
}
