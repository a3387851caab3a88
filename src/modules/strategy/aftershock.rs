//! Two-phase reaction to other agents' kills.
//!
//! Detection turns a fresh kill into a [`PendingIntent`] against the winner.
//! Execution only consumes intents detected on an earlier cycle, re-checks the
//! target against a fresh read and then attacks. At most one intent is
//! executed per cycle.

use crate::modules::config::AftershockConfig;
use crate::modules::economy::Power;
use crate::modules::engine::{LoopState, PendingIntent};
use crate::modules::error::SkipReason;
use crate::modules::grid::{CubeId, Grid};
use crate::modules::ledger::{EventKind, same_identity};
use crate::modules::strategy::{
    DecisionContext, Plan, Strategy, StrategyKind, commit_if_affordable, evaluate_target,
};

pub struct Aftershock {
    config: AftershockConfig,
}

impl Aftershock {
    pub fn new(config: AftershockConfig) -> Self {
        Self { config }
    }

    fn execute(&self, ctx: &DecisionContext<'_>, state: &mut LoopState, plan: &mut Plan) {
        let Some(intent) = state.take_ready_intent() else {
            return;
        };

        let Some(target) = ctx
            .view
            .hostiles_on(intent.cube, ctx.identity)
            .find(|s| same_identity(&s.occupant, &intent.occupant))
        else {
            plan.skip(SkipReason::TargetVanished { cube: intent.cube });
            return;
        };

        let power = target.power(ctx.economy);
        if power > ctx.power_ceiling {
            plan.skip(SkipReason::PowerCeilingExceeded {
                cube: intent.cube,
                power,
                ceiling: ctx.power_ceiling,
            });
            return;
        }

        let candidate = evaluate_target(
            ctx,
            intent.cube,
            target,
            self.config.safety_multiplier,
            self.config.min_force,
        );
        if candidate.net_bounty <= candidate.cost {
            plan.skip(SkipReason::Unprofitable {
                cube: candidate.cube,
                net_bounty: candidate.net_bounty,
                cost: candidate.cost,
            });
            return;
        }
        commit_if_affordable(ctx, &candidate, "aftershock", plan);
    }

    fn detect(&self, ctx: &DecisionContext<'_>, state: &mut LoopState, plan: &mut Plan) {
        for event in ctx.events {
            if state.processed.contains(&event.id) {
                continue;
            }
            let EventKind::Killed {
                attacker,
                remaining_units,
                remaining_reapers,
                ..
            } = &event.kind
            else {
                state.processed.insert(event.id.clone());
                continue;
            };
            if same_identity(attacker, ctx.identity) {
                state.processed.insert(event.id.clone());
                continue;
            }

            // Survivor strength, when the feed reports it.
            if let Some(units) = remaining_units {
                let power: Power = ctx.economy.power(*units, remaining_reapers.unwrap_or(0));
                if power > ctx.power_ceiling {
                    state.processed.insert(event.id.clone());
                    plan.skip(SkipReason::PowerCeilingExceeded {
                        cube: event.cube,
                        power,
                        ceiling: ctx.power_ceiling,
                    });
                    continue;
                }
            }

            let intent = PendingIntent {
                cube: event.cube,
                occupant: attacker.clone(),
                event_id: event.id.clone(),
                detected_cycle: state.cycle,
            };
            match state.push_intent(intent) {
                Ok(()) => {
                    state.processed.insert(event.id.clone());
                }
                Err(capacity) => {
                    // Left unprocessed so it is picked up once the queue drains.
                    plan.skip(SkipReason::PendingQueueFull { capacity });
                    break;
                }
            }
        }
    }
}

impl Strategy for Aftershock {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Aftershock
    }

    /// Only cubes named by intents that are ready to execute.
    fn scan_targets(&self, _grid: &Grid, state: &LoopState) -> Vec<CubeId> {
        state.ready_intent_cubes()
    }

    fn event_window(&self) -> Option<usize> {
        Some(self.config.event_window.max(1))
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>, state: &mut LoopState) -> Plan {
        let mut plan = Plan::default();
        self.execute(ctx, state, &mut plan);
        self.detect(ctx, state, &mut plan);
        if plan.is_empty() && plan.skips.is_empty() {
            plan.skip(SkipReason::NoCandidate);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::economy::Multiplier;
    use crate::modules::ledger::LedgerEvent;
    use crate::modules::strategy::ProposedAction;
    use crate::modules::strategy::test_support::*;

    fn aftershock() -> Aftershock {
        Aftershock::new(AftershockConfig {
            safety_multiplier: Multiplier::from_bps(25_000),
            min_force: 10,
            event_window: 10,
        })
    }

    fn kill(id: &str, cube: CubeId, attacker: &str, remaining: Option<u64>) -> LedgerEvent {
        LedgerEvent {
            id: id.into(),
            block: 10,
            cube,
            kind: EventKind::Killed {
                attacker: attacker.into(),
                defender: "0xdead".into(),
                bounty: 6_660,
                remaining_units: remaining,
                remaining_reapers: remaining.map(|_| 0),
            },
        }
    }

    #[test]
    fn detection_records_intent_once() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![]);
        let events = vec![kill("k1", 12, "0xbbbb", Some(40)), kill("k2", 13, ME, Some(40))];
        let mut ctx = context(&grid, &economy, &view, 1_000_000);
        ctx.events = &events;
        let mut state = LoopState::default();
        state.cycle = 1;

        aftershock().decide(&ctx, &mut state);
        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.pending[0].cube, 12);
        assert!(state.processed.contains("k1"));
        assert!(state.processed.contains("k2"));

        aftershock().decide(&ctx, &mut state);
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn intents_wait_one_cycle_before_execution() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![(12, vec![stack("0xbbbb", 40, 0, 0)])]);
        let events = vec![kill("k1", 12, "0xbbbb", Some(40))];
        let mut state = LoopState::default();
        let mut strategy = aftershock();

        state.cycle = 1;
        let mut ctx = context(&grid, &economy, &view, 1_000_000);
        ctx.events = &events;
        let plan = strategy.decide(&ctx, &mut state);
        assert!(plan.is_empty());
        assert!(strategy.scan_targets(&grid, &state).is_empty());

        state.cycle = 2;
        assert_eq!(strategy.scan_targets(&grid, &state), vec![12]);
        let plan = strategy.decide(&ctx, &mut state);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(
            plan.groups[0].actions[0],
            ProposedAction::Reinforce { cube: 12, units: 101 }
        );
        assert!(state.pending.is_empty());
    }

    #[test]
    fn vanished_target_drops_the_intent_without_action() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![(12, vec![stack("0xcccc", 5, 0, 0)])]);
        let mut state = LoopState::default();
        state.cycle = 2;
        state
            .push_intent(PendingIntent {
                cube: 12,
                occupant: "0xbbbb".into(),
                event_id: "k1".into(),
                detected_cycle: 1,
            })
            .unwrap();

        let ctx = context(&grid, &economy, &view, 1_000_000);
        let plan = aftershock().decide(&ctx, &mut state);
        assert!(plan.is_empty());
        assert_eq!(plan.skips, vec![SkipReason::TargetVanished { cube: 12 }]);
        assert!(state.pending.is_empty());
    }

    #[test]
    fn full_queue_leaves_event_unprocessed() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![]);
        let events = vec![kill("k1", 12, "0xbbbb", None), kill("k2", 14, "0xcccc", None)];
        let mut ctx = context(&grid, &economy, &view, 1_000_000);
        ctx.events = &events;
        let mut state = LoopState::with_capacity(1);
        state.cycle = 1;

        let plan = aftershock().decide(&ctx, &mut state);
        assert_eq!(state.pending.len(), 1);
        assert!(!state.processed.contains("k2"));
        assert!(plan
            .skips
            .contains(&SkipReason::PendingQueueFull { capacity: 1 }));
    }

    #[test]
    fn target_grown_past_the_ceiling_is_dropped_at_execution() {
        let grid = Grid::default();
        let economy = economy();
        // Detected small; reinforced to 900 power before the execution cycle.
        let view = view(vec![(12, vec![stack("0xbbbb", 900, 0, 0)])]);
        let mut state = LoopState::default();
        state.cycle = 2;
        state
            .push_intent(PendingIntent {
                cube: 12,
                occupant: "0xbbbb".into(),
                event_id: "k1".into(),
                detected_cycle: 1,
            })
            .unwrap();

        let mut ctx = context(&grid, &economy, &view, 1_000_000);
        ctx.power_ceiling = 500;
        let plan = aftershock().decide(&ctx, &mut state);
        assert!(plan.is_empty());
        assert_eq!(
            plan.skips,
            vec![SkipReason::PowerCeilingExceeded {
                cube: 12,
                power: 900,
                ceiling: 500,
            }]
        );
        assert!(state.pending.is_empty());
    }

    #[test]
    fn strong_survivor_is_never_queued() {
        let grid = Grid::default();
        let economy = economy();
        let view = view(vec![]);
        let events = vec![kill("k1", 12, "0xbbbb", Some(800))];
        let mut ctx = context(&grid, &economy, &view, 1_000_000);
        ctx.events = &events;
        ctx.power_ceiling = 500;
        let mut state = LoopState::default();
        state.cycle = 1;

        let plan = aftershock().decide(&ctx, &mut state);
        assert!(state.pending.is_empty());
        assert!(state.processed.contains("k1"));
        assert!(plan.skips.contains(&SkipReason::PowerCeilingExceeded {
            cube: 12,
            power: 800,
            ceiling: 500,
        }));
    }
}
