use std::cmp::Reverse;

use crate::modules::config::SniperConfig;
use crate::modules::economy::Roi;
use crate::modules::engine::LoopState;
use crate::modules::error::SkipReason;
use crate::modules::grid::{CubeId, Grid};
use crate::modules::strategy::{
    DecisionContext, Plan, Strategy, StrategyKind, collect_candidates, commit_if_affordable,
};

/// Picks the single best-ROI target above a threshold.
pub struct Sniper {
    config: SniperConfig,
}

impl Sniper {
    pub fn new(config: SniperConfig) -> Self {
        Self { config }
    }
}

impl Strategy for Sniper {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sniper
    }

    fn scan_targets(&self, grid: &Grid, _state: &LoopState) -> Vec<CubeId> {
        grid.ids().collect()
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>, _state: &mut LoopState) -> Plan {
        let mut plan = Plan::default();
        let threshold = Roi::from_bps(self.config.roi_threshold_bps);
        let candidates = collect_candidates(
            ctx,
            self.config.safety_multiplier,
            self.config.min_force,
            &mut plan.skips,
        );

        let mut eligible = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.roi >= threshold {
                eligible.push(candidate);
            } else {
                plan.skip(SkipReason::BelowRoiThreshold {
                    cube: candidate.cube,
                    roi: candidate.roi,
                });
            }
        }

        // roi desc, then net bounty desc, then lowest cube id.
        let best = eligible
            .iter()
            .max_by_key(|c| (c.roi, c.net_bounty, Reverse(c.cube)));
        match best {
            Some(candidate) => commit_if_affordable(ctx, candidate, "snipe", &mut plan),
            None => plan.skip(SkipReason::NoCandidate),
        }
        plan
    }
}
