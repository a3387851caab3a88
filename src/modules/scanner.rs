use serde::Serialize;
use tracing::debug;

use crate::modules::economy::{Economy, Power};
use crate::modules::error::CycleError;
use crate::modules::grid::CubeId;
use crate::modules::ledger::{CubeOccupancy, LedgerReader, StackRecord, same_identity};

/// Occupancy of the scanned cubes, in scan order. Rebuilt from fresh reads
/// every cycle.
#[derive(Clone, Debug, Default, Serialize)]
pub struct WorldView {
    pub cubes: Vec<CubeOccupancy>,
}

impl WorldView {
    pub fn cube(&self, id: CubeId) -> Option<&CubeOccupancy> {
        self.cubes.iter().find(|c| c.cube == id)
    }

    pub fn stacks_on(&self, id: CubeId) -> &[StackRecord] {
        self.cube(id).map(|c| c.stacks.as_slice()).unwrap_or(&[])
    }

    pub fn self_stack(&self, id: CubeId, identity: &str) -> Option<&StackRecord> {
        self.stacks_on(id)
            .iter()
            .find(|s| same_identity(&s.occupant, identity) && !s.is_empty())
    }

    /// Non-empty stacks on `id` held by anyone else.
    pub fn hostiles_on<'a>(
        &'a self,
        id: CubeId,
        identity: &'a str,
    ) -> impl Iterator<Item = &'a StackRecord> + 'a {
        self.stacks_on(id)
            .iter()
            .filter(move |s| !s.is_empty() && !same_identity(&s.occupant, identity))
    }

    /// Every non-empty stack owned by `identity`, with its cube.
    pub fn own_stacks<'a>(
        &'a self,
        identity: &'a str,
    ) -> impl Iterator<Item = (CubeId, &'a StackRecord)> + 'a {
        self.cubes.iter().flat_map(move |c| {
            c.stacks
                .iter()
                .filter(move |s| !s.is_empty() && same_identity(&s.occupant, identity))
                .map(move |s| (c.cube, s))
        })
    }

    pub fn total_power(&self, id: CubeId, economy: &Economy) -> Power {
        self.stacks_on(id).iter().map(|s| s.power(economy)).sum()
    }

    pub fn is_empty_cube(&self, id: CubeId) -> bool {
        self.stacks_on(id).iter().all(StackRecord::is_empty)
    }
}

pub struct WorldScanner<'a, R: LedgerReader + ?Sized> {
    reader: &'a R,
}

impl<'a, R: LedgerReader + ?Sized> WorldScanner<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        Self { reader }
    }

    /// One logical batched read. Any failure abandons the whole scan.
    pub fn scan(&self, cubes: &[CubeId]) -> Result<WorldView, CycleError> {
        if cubes.is_empty() {
            return Ok(WorldView::default());
        }
        let read = self
            .reader
            .batch_read(cubes)
            .map_err(CycleError::TransientReadFailure)?;
        let occupied = read.iter().filter(|c| !c.stacks.is_empty()).count();
        debug!(requested = cubes.len(), occupied, "scan complete");
        Ok(WorldView { cubes: read })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::sim::SimLedger;

    const ME: &str = "0xaaaa";

    #[test]
    fn scan_preserves_order_and_splits_owners() {
        let mut sim = SimLedger::with_defaults();
        sim.place(4, ME, 10, 0);
        sim.place(4, "0xBBBB", 5, 1);
        sim.place(2, "0xcccc", 7, 0);

        let view = WorldScanner::new(&sim).scan(&[4, 3, 2]).unwrap();
        assert_eq!(view.cubes.iter().map(|c| c.cube).collect::<Vec<_>>(), vec![4, 3, 2]);
        assert_eq!(view.self_stack(4, "0xAAAA").unwrap().units, 10);
        assert_eq!(view.hostiles_on(4, ME).count(), 1);
        assert!(view.is_empty_cube(3));
        assert_eq!(view.own_stacks(ME).count(), 1);
    }

    #[test]
    fn failed_read_yields_no_partial_view() {
        let sim = SimLedger::with_defaults();
        sim.fail_next_reads(1);
        let result = WorldScanner::new(&sim).scan(&[1, 2, 3]);
        assert!(matches!(result, Err(CycleError::TransientReadFailure(_))));
    }

    #[test]
    fn empty_request_makes_no_call() {
        let sim = SimLedger::with_defaults();
        sim.fail_next_reads(1);
        let view = WorldScanner::new(&sim).scan(&[]).unwrap();
        assert!(view.cubes.is_empty());
        // The armed failure was not consumed.
        assert!(sim.batch_read(&[1]).is_err());
    }
}
