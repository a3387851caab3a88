//! Hub defense.
//!
//! Categories in strict priority order, at most one per cycle:
//! repel a hostile on the hub, top up the hub, send a force sized to the
//! nearest hostile inside the safe radius one hop toward it, walk a stray
//! stack one hop home. An advance never takes the hub down to its replenish
//! threshold. The first category able to act wins; the ones above
//! it leave their skip reasons in the plan.

use std::cmp::Reverse;

use crate::modules::config::FortressConfig;
use crate::modules::economy::{Power, Units, required_force};
use crate::modules::engine::LoopState;
use crate::modules::error::SkipReason;
use crate::modules::grid::{CubeId, Grid};
use crate::modules::ledger::StackRecord;
use crate::modules::strategy::{
    ActionGroup, DecisionContext, Plan, ProposedAction, Strategy, StrategyKind, evaluate_target,
};

pub struct Fortress {
    config: FortressConfig,
}

impl Fortress {
    pub fn new(config: FortressConfig) -> Self {
        Self { config }
    }

    fn repel(&self, ctx: &DecisionContext<'_>, plan: &mut Plan) -> Option<ActionGroup> {
        let hub = self.config.hub;
        let strongest = ctx
            .view
            .hostiles_on(hub, ctx.identity)
            .max_by_key(|s| (s.power(ctx.economy), Reverse(s.occupant.clone())))?;

        let power = strongest.power(ctx.economy);
        if power > ctx.power_ceiling {
            plan.skip(SkipReason::PowerCeilingExceeded {
                cube: hub,
                power,
                ceiling: ctx.power_ceiling,
            });
            return None;
        }
        let candidate = evaluate_target(
            ctx,
            hub,
            strongest,
            self.config.safety_multiplier,
            self.config.min_force,
        );
        if candidate.cost > ctx.balance {
            plan.skip(SkipReason::InsufficientBalance {
                needed: candidate.cost,
                available: ctx.balance,
            });
            return None;
        }
        Some(candidate.attack_group("repel"))
    }

    /// Hub power at or below which the hub is topped up.
    fn replenish_threshold(&self) -> Power {
        self.config
            .target_power
            .saturating_sub(self.config.replenish_units as Power)
    }

    /// Units and reapers a stack can send out. The hub keeps its reapers and
    /// stays above the replenish threshold; other stacks keep the reserve.
    fn spare(&self, ctx: &DecisionContext<'_>, cube: CubeId, own: &StackRecord) -> (Units, Units) {
        if cube != self.config.hub {
            return (own.units.saturating_sub(ctx.reserve_units), own.reapers);
        }
        let keep_power = self
            .replenish_threshold()
            .saturating_add(1)
            .saturating_sub(ctx.economy.power(0, own.reapers));
        let keep_units = Units::try_from(keep_power)
            .unwrap_or(Units::MAX)
            .max(ctx.reserve_units);
        (own.units.saturating_sub(keep_units), 0)
    }

    fn top_up(&self, ctx: &DecisionContext<'_>, plan: &mut Plan) -> Option<ActionGroup> {
        let hub = self.config.hub;
        let current = ctx
            .view
            .self_stack(hub, ctx.identity)
            .map(|s| s.power(ctx.economy))
            .unwrap_or(0);
        if current > self.replenish_threshold() {
            return None;
        }

        let deficit = Units::try_from(self.config.target_power - current).unwrap_or(Units::MAX);
        let per_unit = ctx.economy.constants.cost_per_unit.max(1);
        let affordable = Units::try_from(ctx.balance / per_unit).unwrap_or(Units::MAX);
        let units = deficit.min(affordable);
        if units == 0 {
            plan.skip(SkipReason::InsufficientBalance {
                needed: ctx.economy.spawn_cost(deficit),
                available: ctx.balance,
            });
            return None;
        }
        Some(ActionGroup::new(
            format!("top up hub {}", hub),
            vec![ProposedAction::Reinforce { cube: hub, units }],
        ))
    }

    fn advance(&self, ctx: &DecisionContext<'_>, plan: &mut Plan) -> Option<ActionGroup> {
        let grid = ctx.grid;
        let hub = self.config.hub;
        let in_zone = |cube: CubeId| {
            grid.manhattan(hub, cube)
                .map(|d| d <= self.config.safe_radius)
                .unwrap_or(false)
        };

        // Nearest hostile to the hub, off the hub itself (that is repel's job).
        let mut best: Option<(u32, CubeId, &StackRecord)> = None;
        for occupancy in &ctx.view.cubes {
            let cube = occupancy.cube;
            if cube == hub || !in_zone(cube) {
                continue;
            }
            for hostile in ctx.view.hostiles_on(cube, ctx.identity) {
                let power = hostile.power(ctx.economy);
                if power > ctx.power_ceiling {
                    plan.skip(SkipReason::PowerCeilingExceeded {
                        cube,
                        power,
                        ceiling: ctx.power_ceiling,
                    });
                    continue;
                }
                let Ok(distance) = grid.manhattan(hub, cube) else {
                    continue;
                };
                let closer = match best {
                    None => true,
                    Some((d, c, _)) => (distance, cube) < (d, c),
                };
                if closer {
                    best = Some((distance, cube, hostile));
                }
            }
        }
        let (_, target_cube, target) = best?;
        let needed = required_force(
            target.power(ctx.economy),
            self.config.safety_multiplier,
            self.config.min_force,
        ) as Power;

        // The closest stack able to win on its own, the hub last among equals.
        let mut strongest: Option<Power> = None;
        let mut source: Option<((u32, bool, CubeId), Units, Units)> = None;
        for (cube, own) in ctx.view.own_stacks(ctx.identity) {
            if !in_zone(cube) {
                continue;
            }
            let (units, reapers) = self.spare(ctx, cube, own);
            let force = ctx.economy.power(units, reapers);
            strongest = Some(strongest.unwrap_or(0).max(force));
            if force == 0 || force < needed {
                continue;
            }
            let Ok(distance) = grid.manhattan(cube, target_cube) else {
                continue;
            };
            let key = (distance, cube == hub, cube);
            if source.as_ref().is_none_or(|(k, _, _)| key < *k) {
                source = Some((key, units, reapers));
            }
        }
        let Some(((_, _, from), spare_units, reapers)) = source else {
            if let Some(force) = strongest {
                plan.skip(SkipReason::Outgunned {
                    cube: target_cube,
                    force,
                    required: needed,
                });
            }
            return None;
        };

        let strike_units = Units::try_from(needed.saturating_sub(ctx.economy.power(0, reapers)))
            .unwrap_or(Units::MAX)
            .min(spare_units);
        let engage = ProposedAction::Engage {
            target: target.occupant.clone(),
            cube: target_cube,
            units: strike_units,
            reapers,
        };

        if from == target_cube {
            return Some(ActionGroup::new(
                format!("strike cube {}", target_cube),
                vec![engage],
            ));
        }

        let (_, step) = grid.next_step_toward(from, target_cube).ok()?;
        if step == target_cube {
            let transfer = ProposedAction::Transfer {
                from,
                to: step,
                units: strike_units,
                reapers,
            };
            return Some(ActionGroup::new(
                format!("raid cube {}", target_cube),
                vec![transfer, engage],
            ));
        }
        // The forward stack keeps its reserve after the raid.
        let carried = strike_units
            .saturating_add(ctx.reserve_units)
            .min(spare_units);
        Some(ActionGroup::new(
            format!("advance toward cube {}", target_cube),
            vec![ProposedAction::Transfer {
                from,
                to: step,
                units: carried,
                reapers,
            }],
        ))
    }

    fn recall(&self, ctx: &DecisionContext<'_>) -> Option<ActionGroup> {
        let grid = ctx.grid;
        let hub = self.config.hub;
        let (from, stray) = ctx
            .view
            .own_stacks(ctx.identity)
            .filter(|(cube, _)| *cube != hub)
            .max_by_key(|(cube, _)| (grid.manhattan(hub, *cube).unwrap_or(0), Reverse(*cube)))?;
        let (_, step) = grid.next_step_toward(from, hub).ok()?;
        Some(ActionGroup::new(
            format!("recall cube {}", from),
            vec![ProposedAction::Transfer {
                from,
                to: step,
                units: stray.units,
                reapers: stray.reapers,
            }],
        ))
    }
}

impl Strategy for Fortress {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fortress
    }

    /// The safe zone plus one ring, so stacks that just left it are still seen.
    fn scan_targets(&self, grid: &Grid, _state: &LoopState) -> Vec<CubeId> {
        grid.within_radius(self.config.hub, self.config.safe_radius + 1)
            .unwrap_or_default()
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>, _state: &mut LoopState) -> Plan {
        let mut plan = Plan::default();
        let chosen = self
            .repel(ctx, &mut plan)
            .or_else(|| self.top_up(ctx, &mut plan))
            .or_else(|| self.advance(ctx, &mut plan))
            .or_else(|| self.recall(ctx));
        match chosen {
            Some(group) => plan.push(group),
            None => plan.skip(SkipReason::NoCandidate),
        }
        plan
    }
}
