//! The scan → decide → submit → confirm loop.
//!
//! One [`ExecutionLoop`] drives one identity. Every cycle reads balance,
//! allowance, optional events and the strategy's cubes afresh, lets the
//! strategy decide against that view, composes one atomic batch and waits for
//! it to settle before the next cycle starts. Failures are contained to the
//! cycle that produced them; only [`LoopState`] survives between cycles.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::modules::batch::compose;
use crate::modules::config::{AgentConfig, BatchConfig};
use crate::modules::economy::{Economy, LedgerConstants, Power, Units};
use crate::modules::error::{ConfigError, CycleError, SkipReason};
use crate::modules::grid::{CubeId, Grid};
use crate::modules::ledger::{
    EncodedAction, Identity, Ledger, LedgerEvent, SubmissionRef, normalize_identity,
    short_identity,
};
use crate::modules::scanner::WorldScanner;
use crate::modules::state::{self, RuntimeState, Status};
use crate::modules::stats::{
    ActionStatsStore, load_action_stats_in, record_confirmed_actions, record_rejected_batch,
    save_action_stats_in,
};
use crate::modules::strategy::{DecisionContext, Strategy, StrategyKind};

pub const DEFAULT_PENDING_CAPACITY: usize = 8;
/// Oldest processed ids are forgotten past this many.
const PROCESSED_RETENTION: usize = 4_096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Scanning,
    Deciding,
    Submitting,
    AwaitingConfirmation,
    Error,
}

/// A detected opportunity waiting one cycle before it may be executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingIntent {
    pub cube: CubeId,
    pub occupant: Identity,
    pub event_id: String,
    pub detected_cycle: u64,
}

/// Event ids already acted on, bounded by insertion order.
#[derive(Clone, Debug, Default)]
pub struct ProcessedEventSet {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl ProcessedEventSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: String) -> bool {
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > PROCESSED_RETENTION {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Everything carried from one cycle to the next.
#[derive(Clone, Debug)]
pub struct LoopState {
    pub cycle: u64,
    pub processed: ProcessedEventSet,
    pub pending: VecDeque<PendingIntent>,
    pending_capacity: usize,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PENDING_CAPACITY)
    }
}

impl LoopState {
    pub fn with_capacity(pending_capacity: usize) -> Self {
        Self {
            cycle: 0,
            processed: ProcessedEventSet::default(),
            pending: VecDeque::with_capacity(pending_capacity),
            pending_capacity: pending_capacity.max(1),
        }
    }

    pub fn pending_capacity(&self) -> usize {
        self.pending_capacity
    }

    /// Queues an intent. A second intent for the same event is ignored; a
    /// full queue returns its capacity.
    pub fn push_intent(&mut self, intent: PendingIntent) -> Result<(), usize> {
        if self.pending.iter().any(|p| p.event_id == intent.event_id) {
            return Ok(());
        }
        if self.pending.len() >= self.pending_capacity {
            return Err(self.pending_capacity);
        }
        self.pending.push_back(intent);
        Ok(())
    }

    fn is_ready(&self, intent: &PendingIntent) -> bool {
        intent.detected_cycle < self.cycle
    }

    /// Removes and returns the oldest intent detected before this cycle.
    pub fn take_ready_intent(&mut self) -> Option<PendingIntent> {
        let index = self.pending.iter().position(|p| self.is_ready(p))?;
        self.pending.remove(index)
    }

    /// Cube of the intent [`take_ready_intent`](Self::take_ready_intent) would return.
    pub fn ready_intent_cubes(&self) -> Vec<CubeId> {
        self.pending
            .iter()
            .find(|p| self.is_ready(p))
            .map(|p| vec![p.cube])
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing worth submitting.
    Idle,
    Confirmed {
        reference: SubmissionRef,
        actions: usize,
        approved: bool,
    },
    Failed(CycleError),
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Idle => write!(f, "idle"),
            CycleOutcome::Confirmed {
                reference,
                actions,
                approved,
            } => {
                write!(f, "confirmed {} action(s) in {}", actions, reference)?;
                if *approved {
                    write!(f, " after approval")?;
                }
                Ok(())
            }
            CycleOutcome::Failed(err) => write!(f, "{}", err),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcome: CycleOutcome,
    pub skips: Vec<SkipReason>,
}

pub struct ExecutionLoop<L: Ledger> {
    ledger: L,
    strategy: Box<dyn Strategy>,
    identity: Identity,
    grid: Grid,
    economy: Economy,
    power_ceiling: Power,
    reserve_units: Units,
    batch: BatchConfig,
    state: LoopState,
    phase: LoopPhase,
    stats: ActionStatsStore,
    persist_dir: Option<PathBuf>,
}

impl<L: Ledger> ExecutionLoop<L> {
    /// Validates the config and caches the ledger's economic constants.
    /// Any failure here is fatal.
    pub fn new(
        ledger: L,
        strategy: Box<dyn Strategy>,
        config: &AgentConfig,
    ) -> Result<Self, ConfigError> {
        let grid = config.validate()?;
        let cost_per_unit = ledger.cost_per_unit().map_err(ConfigError::Constants)?;
        if cost_per_unit == 0 {
            return Err(ConfigError::ZeroCostPerUnit);
        }
        let burn_bps = ledger.burn_bps().map_err(ConfigError::Constants)?;
        if burn_bps > 10_000 {
            return Err(ConfigError::Invalid(format!(
                "ledger burn rate {} bps exceeds 100%",
                burn_bps
            )));
        }
        let constants = LedgerConstants {
            cost_per_unit,
            burn_bps,
        };
        info!(
            identity = short_identity(&config.identity),
            strategy = %strategy.kind(),
            %cost_per_unit,
            burn_bps,
            "execution loop ready"
        );

        Ok(Self {
            ledger,
            strategy,
            identity: normalize_identity(&config.identity),
            grid,
            economy: Economy::new(config.economy, constants),
            power_ceiling: config.strategy.power_ceiling,
            reserve_units: config.runner.reserve_units,
            batch: config.batch,
            state: LoopState::with_capacity(config.runner.pending_capacity),
            phase: LoopPhase::Idle,
            stats: ActionStatsStore::default(),
            persist_dir: None,
        })
    }

    /// Writes runtime status and action counters under `dir` after every cycle.
    pub fn with_persistence(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.stats = match load_action_stats_in(&dir) {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "failed to load action stats; starting from zero");
                ActionStatsStore::default()
            }
        };
        self.persist_dir = Some(dir);
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    pub fn stats(&self) -> &ActionStatsStore {
        &self.stats
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Runs cycles until `max_cycles` is reached, or forever when `None`.
    /// Returns the number of cycles run.
    pub fn run(&mut self, max_cycles: Option<u64>, delay: Duration) -> u64 {
        let mut completed = 0u64;
        loop {
            self.run_cycle();
            completed += 1;
            if max_cycles.is_some_and(|max| completed >= max) {
                break;
            }
            if delay > Duration::ZERO {
                std::thread::sleep(delay);
            }
            self.phase = LoopPhase::Idle;
        }
        completed
    }

    /// One full iteration. Never fails: errors end the cycle and are reported.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.state.cycle += 1;
        let cycle = self.state.cycle;
        let mut skips = Vec::new();

        let outcome = match self.try_cycle(&mut skips) {
            Ok(outcome) => {
                self.phase = LoopPhase::Idle;
                outcome
            }
            Err(err) => {
                self.phase = LoopPhase::Error;
                if matches!(err, CycleError::RejectedSubmission { .. }) {
                    record_rejected_batch(&mut self.stats, &self.identity);
                }
                warn!(cycle, error = %err, "cycle abandoned");
                CycleOutcome::Failed(err)
            }
        };
        info!(cycle, outcome = %outcome, skipped = skips.len(), "cycle finished");
        self.persist(cycle, &outcome);

        CycleReport {
            cycle,
            outcome,
            skips,
        }
    }

    fn try_cycle(&mut self, skips: &mut Vec<SkipReason>) -> Result<CycleOutcome, CycleError> {
        let cycle = self.state.cycle;

        self.phase = LoopPhase::Scanning;
        let balance = self
            .ledger
            .balance_of(&self.identity)
            .map_err(CycleError::TransientReadFailure)?;
        let allowance = self
            .ledger
            .allowance_of(&self.identity)
            .map_err(CycleError::TransientReadFailure)?;
        let events = match self.strategy.event_window() {
            Some(window) => self.fetch_events(window)?,
            None => Vec::new(),
        };
        let targets = self.strategy.scan_targets(&self.grid, &self.state);
        let view = WorldScanner::new(&self.ledger).scan(&targets)?;
        debug!(cycle, %balance, %allowance, cubes = targets.len(), events = events.len(), "world read");

        self.phase = LoopPhase::Deciding;
        let ctx = DecisionContext {
            identity: &self.identity,
            grid: &self.grid,
            economy: &self.economy,
            view: &view,
            balance,
            events: &events,
            power_ceiling: self.power_ceiling,
            reserve_units: self.reserve_units,
        };
        let plan = self.strategy.decide(&ctx, &mut self.state);
        let batch = compose(&plan, &self.economy, balance, allowance, &self.batch);

        skips.extend(plan.skips);
        skips.extend(batch.skips.iter().cloned());
        for skip in skips.iter() {
            info!(cycle, reason = skip.label(), "skip: {}", skip);
        }

        if batch.is_empty() {
            return Ok(CycleOutcome::Idle);
        }
        info!(
            cycle,
            groups = %batch.labels.join("; "),
            cost = %batch.total_cost,
            gas = batch.gas,
            "submitting batch"
        );

        let approved = match &batch.approval {
            Some(approval) => {
                let reference = self.submit_and_confirm(std::slice::from_ref(approval))?;
                info!(
                    cycle,
                    reference = %reference,
                    gas = batch.approval_gas,
                    "allowance approved"
                );
                true
            }
            None => false,
        };
        let reference = self.submit_and_confirm(&batch.actions)?;
        Ok(CycleOutcome::Confirmed {
            reference,
            actions: batch.actions.len(),
            approved,
        })
    }

    /// Recent events, oldest first.
    fn fetch_events(&self, window: usize) -> Result<Vec<LedgerEvent>, CycleError> {
        let mut events = self
            .ledger
            .recent_events(window)
            .map_err(CycleError::TransientReadFailure)?;
        events.reverse();
        events.sort_by_key(|e| e.block);
        Ok(events)
    }

    /// Submits one atomic batch and blocks until it is final.
    fn submit_and_confirm(
        &mut self,
        actions: &[EncodedAction],
    ) -> Result<SubmissionRef, CycleError> {
        self.phase = LoopPhase::Submitting;
        let receipt = self
            .ledger
            .submit(&self.identity, actions)
            .map_err(|err| CycleError::RejectedSubmission {
                reason: err.to_string(),
            })?;
        if !receipt.accepted {
            return Err(CycleError::RejectedSubmission {
                reason: receipt
                    .reason
                    .unwrap_or_else(|| "rejected without reason".into()),
            });
        }

        self.phase = LoopPhase::AwaitingConfirmation;
        let finality = self
            .ledger
            .await_finality(&receipt.reference)
            .map_err(|err| CycleError::RejectedSubmission {
                reason: format!("confirmation failed: {}", err),
            })?;
        if !finality.confirmed {
            return Err(CycleError::RejectedSubmission {
                reason: finality.reason.unwrap_or_else(|| "reverted".into()),
            });
        }

        record_confirmed_actions(&mut self.stats, &self.identity, actions.iter());
        Ok(receipt.reference)
    }

    fn persist(&self, cycle: u64, outcome: &CycleOutcome) {
        let Some(dir) = &self.persist_dir else {
            return;
        };
        let mut runtime = match state::load_state_in(dir) {
            Ok(Some(existing)) => existing,
            Ok(None) => RuntimeState::default(),
            Err(err) => {
                warn!(error = %err, "unreadable runtime state; overwriting");
                RuntimeState::default()
            }
        };
        runtime.status = Status::Running;
        runtime.cycle = cycle;
        runtime.strategy = Some(self.strategy.kind().to_string());
        runtime.message = Some(outcome.to_string());
        if let Err(err) = state::save_state_in(dir, &runtime) {
            warn!(error = %err, "failed to write runtime state");
        }
        if let Err(err) = save_action_stats_in(dir, &self.stats) {
            warn!(error = %err, "failed to save action stats");
        }
    }
}
