use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::modules::config::SeederConfig;
use crate::modules::economy::Units;
use crate::modules::engine::LoopState;
use crate::modules::error::SkipReason;
use crate::modules::grid::{CubeId, Grid};
use crate::modules::strategy::{
    ActionGroup, DecisionContext, Plan, ProposedAction, Strategy, StrategyKind,
};

/// Baseline presence builder: reinforces random empty or weak cubes.
pub struct Seeder {
    config: SeederConfig,
    rng: StdRng,
}

impl Seeder {
    pub fn new(config: SeederConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }
}

impl Strategy for Seeder {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Seeder
    }

    fn scan_targets(&self, grid: &Grid, _state: &LoopState) -> Vec<CubeId> {
        grid.ids().collect()
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>, _state: &mut LoopState) -> Plan {
        let mut plan = Plan::default();
        let units: Units = self.config.units_per_cube.max(1);
        let per_cube = ctx.economy.spawn_cost(units);

        let mut open: Vec<CubeId> = ctx
            .view
            .cubes
            .iter()
            .map(|c| c.cube)
            .filter(|&cube| ctx.view.total_power(cube, ctx.economy) < self.config.low_value_power)
            .collect();
        if open.is_empty() {
            plan.skip(SkipReason::NoCandidate);
            return plan;
        }

        let affordable = if per_cube == 0 {
            usize::MAX
        } else {
            usize::try_from(ctx.balance / per_cube).unwrap_or(usize::MAX)
        };
        let count = self.config.batch_size.min(affordable).min(open.len());
        if count == 0 {
            plan.skip(SkipReason::InsufficientBalance {
                needed: per_cube,
                available: ctx.balance,
            });
            return plan;
        }

        open.shuffle(&mut self.rng);
        for &cube in open.iter().take(count) {
            plan.push(ActionGroup::new(
                format!("seed cube {}", cube),
                vec![ProposedAction::Reinforce { cube, units }],
            ));
        }
        plan
    }
}
