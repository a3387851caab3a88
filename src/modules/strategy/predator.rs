use std::cmp::Reverse;

use crate::modules::config::PredatorConfig;
use crate::modules::engine::LoopState;
use crate::modules::error::SkipReason;
use crate::modules::grid::{CubeId, Grid};
use crate::modules::strategy::{
    DecisionContext, Plan, Strategy, StrategyKind, collect_candidates, commit_if_affordable,
};

/// Goes after the biggest bounty with overwhelming force. No ROI floor; a
/// target only needs to pay more than it costs.
pub struct Predator {
    config: PredatorConfig,
}

impl Predator {
    pub fn new(config: PredatorConfig) -> Self {
        Self { config }
    }
}

impl Strategy for Predator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Predator
    }

    fn scan_targets(&self, grid: &Grid, _state: &LoopState) -> Vec<CubeId> {
        grid.ids().collect()
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>, _state: &mut LoopState) -> Plan {
        let mut plan = Plan::default();
        let candidates = collect_candidates(
            ctx,
            self.config.safety_multiplier,
            self.config.min_force,
            &mut plan.skips,
        );

        let mut profitable = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.net_bounty > candidate.cost {
                profitable.push(candidate);
            } else {
                plan.skip(SkipReason::Unprofitable {
                    cube: candidate.cube,
                    net_bounty: candidate.net_bounty,
                    cost: candidate.cost,
                });
            }
        }

        let best = profitable
            .iter()
            .max_by_key(|c| (c.net_bounty, c.roi, Reverse(c.cube)));
        match best {
            Some(candidate) => commit_if_affordable(ctx, candidate, "hunt", &mut plan),
            None => plan.skip(SkipReason::NoCandidate),
        }
        plan
    }
}
