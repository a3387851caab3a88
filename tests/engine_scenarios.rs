use std::time::Duration;

use killbot::{
    AgentConfig, Amount, CubeId, CubeOccupancy, CycleError, CycleOutcome, EncodedAction,
    EventFeed, ExecutionLoop, Finality, Ledger, LedgerError, LedgerEvent, LedgerReader, LedgerWriter,
    SimLedger, SkipReason, StrategyKind, SubmissionRef, SubmitReceipt, build_strategy,
    state::{self, Status},
};

const ME: &str = "0xaaaa";
const RIVAL: &str = "0xbbbb";

fn config(kind: StrategyKind) -> AgentConfig {
    let mut config = AgentConfig {
        identity: ME.into(),
        ..AgentConfig::default()
    };
    config.strategy.kind = kind;
    config
}

fn engine<L: Ledger>(ledger: L, config: &AgentConfig) -> ExecutionLoop<L> {
    ExecutionLoop::new(ledger, build_strategy(&config.strategy), config).unwrap()
}

fn funded_sim() -> SimLedger {
    let mut sim = SimLedger::with_defaults();
    sim.fund(ME, 1_000_000);
    sim.set_allowance(ME, Amount::MAX);
    sim
}

fn my_batches(sim: &SimLedger) -> Vec<Vec<EncodedAction>> {
    sim.submissions()
        .iter()
        .filter(|(who, _)| who == ME)
        .map(|(_, actions)| actions.clone())
        .collect()
}

#[test]
fn sniper_reinforces_then_attacks_in_one_batch() {
    let mut sim = funded_sim();
    sim.place(30, RIVAL, 50, 0);
    let mut engine = engine(sim, &config(StrategyKind::Sniper));

    let report = engine.run_cycle();
    assert!(matches!(
        report.outcome,
        CycleOutcome::Confirmed {
            actions: 2,
            approved: false,
            ..
        }
    ));

    // 50 power × 3 is under the 1000 floor; one extra unit stays behind.
    let batches = my_batches(engine.ledger());
    assert_eq!(
        batches,
        vec![vec![
            EncodedAction::Reinforce {
                cube: 30,
                amount: 1_001
            },
            EncodedAction::Engage {
                target: RIVAL.into(),
                cube: 30,
                units: 1_000,
                reapers: 0,
            },
        ]]
    );

    let sim = engine.ledger();
    assert!(sim.stack(30, RIVAL).is_none());
    assert!(sim.stack(30, ME).is_some());
    // Paid 1001 × 20, collected 50 × 666 less the 6.66% burn.
    assert_eq!(sim.balance(ME), 1_000_000 - 20_020 + 31_083);
}

#[test]
fn approval_is_confirmed_on_its_own_before_the_batch() {
    let mut sim = SimLedger::with_defaults();
    sim.fund(ME, 1_000_000);
    sim.place(30, RIVAL, 50, 0);
    let mut engine = engine(sim, &config(StrategyKind::Sniper));

    let report = engine.run_cycle();
    assert!(matches!(
        report.outcome,
        CycleOutcome::Confirmed { approved: true, .. }
    ));
    assert!(report
        .skips
        .iter()
        .any(|s| matches!(s, SkipReason::InsufficientAllowance { allowance: 0, .. })));

    let batches = my_batches(engine.ledger());
    assert_eq!(batches.len(), 2);
    assert_eq!(
        batches[0],
        vec![EncodedAction::Approve {
            amount: Amount::MAX
        }]
    );
    assert!(batches[1]
        .iter()
        .all(|a| !matches!(a, EncodedAction::Approve { .. })));
    assert_eq!(engine.stats().per_identity[ME].approve_count, 1);
}

#[test]
fn failed_read_abandons_cycle_and_next_cycle_recovers() {
    let mut sim = funded_sim();
    sim.place(30, RIVAL, 50, 0);
    let mut engine = engine(sim, &config(StrategyKind::Sniper));

    engine.ledger().fail_next_reads(1);
    let first = engine.run_cycle();
    assert!(matches!(
        first.outcome,
        CycleOutcome::Failed(CycleError::TransientReadFailure(_))
    ));
    assert!(engine.ledger().submissions().is_empty());

    let second = engine.run_cycle();
    assert_eq!(second.cycle, 2);
    assert!(matches!(second.outcome, CycleOutcome::Confirmed { .. }));
}

#[test]
fn two_phase_drops_intent_when_target_is_taken_first() {
    let mut sim = funded_sim();
    // Someone else's kill on cube 12 leaves RIVAL exposed.
    sim.place(12, "0xcccc", 10, 0);
    sim.place(12, RIVAL, 100, 0);
    sim.submit(
        RIVAL,
        &[EncodedAction::Engage {
            target: "0xcccc".into(),
            cube: 12,
            units: 100,
            reapers: 0,
        }],
    )
    .unwrap();
    let mut engine = engine(sim, &config(StrategyKind::Aftershock));

    let detect = engine.run_cycle();
    assert_eq!(detect.outcome, CycleOutcome::Idle);
    assert_eq!(engine.state().pending.len(), 1);
    assert_eq!(engine.state().pending[0].cube, 12);

    // A third agent finishes RIVAL off before our execution cycle.
    let sim = engine.ledger_mut();
    sim.place(12, "0xdddd", 2_000, 0);
    sim.submit(
        "0xdddd",
        &[EncodedAction::Engage {
            target: RIVAL.into(),
            cube: 12,
            units: 2_000,
            reapers: 0,
        }],
    )
    .unwrap();

    let execute = engine.run_cycle();
    assert_eq!(execute.outcome, CycleOutcome::Idle);
    assert!(execute
        .skips
        .contains(&SkipReason::TargetVanished { cube: 12 }));
    assert!(engine
        .state()
        .pending
        .iter()
        .all(|p| p.occupant != RIVAL));
    assert!(my_batches(engine.ledger()).is_empty());
}

#[test]
fn two_phase_attacks_survivor_one_cycle_later() {
    let mut sim = funded_sim();
    sim.place(12, "0xcccc", 10, 0);
    sim.place(12, RIVAL, 100, 0);
    sim.submit(
        RIVAL,
        &[EncodedAction::Engage {
            target: "0xcccc".into(),
            cube: 12,
            units: 100,
            reapers: 0,
        }],
    )
    .unwrap();
    let mut engine = engine(sim, &config(StrategyKind::Aftershock));

    assert_eq!(engine.run_cycle().outcome, CycleOutcome::Idle);
    assert!(my_batches(engine.ledger()).is_empty());

    let report = engine.run_cycle();
    assert!(matches!(report.outcome, CycleOutcome::Confirmed { .. }));
    let batches = my_batches(engine.ledger());
    assert_eq!(batches.len(), 1);
    assert!(matches!(
        batches[0].last(),
        Some(EncodedAction::Engage { cube: 12, .. })
    ));
    assert!(engine.ledger().stack(12, RIVAL).is_none());
    assert!(engine.state().pending.is_empty());
}

#[test]
fn fortress_repels_intruder_on_the_hub() {
    let mut config = config(StrategyKind::Fortress);
    config.strategy.fortress.hub = 44;
    let mut sim = funded_sim();
    sim.place(44, ME, 5_000, 0);
    sim.place(44, RIVAL, 30, 0);
    sim.place(45, "0xcccc", 5, 0);
    let mut engine = engine(sim, &config);

    let report = engine.run_cycle();
    assert!(matches!(report.outcome, CycleOutcome::Confirmed { actions: 1, .. }));
    assert_eq!(
        my_batches(engine.ledger()),
        vec![vec![EncodedAction::Engage {
            target: RIVAL.into(),
            cube: 44,
            units: 100,
            reapers: 0,
        }]]
    );
    assert!(engine.ledger().stack(44, RIVAL).is_none());
    // Only one category per cycle: the neighbour on 45 is untouched.
    assert!(engine.ledger().stack(45, "0xcccc").is_some());
}

#[test]
fn fortress_raids_without_draining_the_hub() {
    let mut config = config(StrategyKind::Fortress);
    config.strategy.fortress.hub = 44;
    config.strategy.fortress.target_power = 1_000;
    config.strategy.fortress.replenish_units = 200;
    config.strategy.fortress.min_force = 10;
    let mut sim = funded_sim();
    sim.place(44, ME, 900, 0);
    sim.place(46, RIVAL, 10, 0);
    let mut engine = engine(sim, &config);

    for _ in 0..3 {
        engine.run_cycle();
        let hub = engine.ledger().stack(44, ME).map(|s| s.units).unwrap_or(0);
        assert!(hub > 800, "hub fell to {}", hub);
    }

    let sim = engine.ledger();
    assert!(sim.stack(46, RIVAL).is_none());
    // No top-up was ever bought; the bounty is pure profit.
    assert_eq!(sim.balance(ME), 1_000_000 + 6_217);
    assert!(my_batches(sim)
        .iter()
        .flatten()
        .all(|a| !matches!(a, EncodedAction::Reinforce { .. })));
}

#[test]
fn seeder_spreads_reinforcements_within_balance() {
    let mut config = config(StrategyKind::Seeder);
    config.strategy.seeder.rng_seed = Some(11);
    config.strategy.seeder.units_per_cube = 100;
    let mut sim = SimLedger::with_defaults();
    // Enough for two cubes of 100 units at 20 each.
    sim.fund(ME, 4_500);
    sim.set_allowance(ME, Amount::MAX);
    let mut engine = engine(sim, &config);

    engine.run_cycle();
    let batches = my_batches(engine.ledger());
    assert_eq!(batches.len(), 1);
    let cubes: Vec<CubeId> = batches[0]
        .iter()
        .map(|a| match a {
            EncodedAction::Reinforce { cube, amount } => {
                assert_eq!(*amount, 100);
                *cube
            }
            other => panic!("unexpected {}", other),
        })
        .collect();
    assert_eq!(cubes.len(), 2);
    assert_ne!(cubes[0], cubes[1]);
    assert_eq!(engine.ledger().balance(ME), 500);
}

/// Serves reads from a sim but refuses every submission.
struct RejectingLedger(SimLedger);

impl LedgerReader for RejectingLedger {
    fn batch_read(&self, cubes: &[CubeId]) -> Result<Vec<CubeOccupancy>, LedgerError> {
        self.0.batch_read(cubes)
    }
    fn cost_per_unit(&self) -> Result<Amount, LedgerError> {
        self.0.cost_per_unit()
    }
    fn burn_bps(&self) -> Result<u32, LedgerError> {
        self.0.burn_bps()
    }
    fn balance_of(&self, identity: &str) -> Result<Amount, LedgerError> {
        self.0.balance_of(identity)
    }
    fn allowance_of(&self, identity: &str) -> Result<Amount, LedgerError> {
        self.0.allowance_of(identity)
    }
}

impl LedgerWriter for RejectingLedger {
    fn submit(
        &mut self,
        _identity: &str,
        _actions: &[EncodedAction],
    ) -> Result<SubmitReceipt, LedgerError> {
        Ok(SubmitReceipt {
            accepted: false,
            reference: SubmissionRef("0x0".into()),
            reason: Some("execution reverted".into()),
        })
    }
    fn await_finality(&mut self, _reference: &SubmissionRef) -> Result<Finality, LedgerError> {
        Err(LedgerError::Unavailable("nothing submitted".into()))
    }
}

impl EventFeed for RejectingLedger {
    fn recent_events(&self, first: usize) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.0.recent_events(first)
    }
}

#[test]
fn rejected_batch_is_a_no_op_and_the_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = funded_sim();
    sim.place(30, RIVAL, 50, 0);
    let mut engine = engine(RejectingLedger(sim), &config(StrategyKind::Sniper))
        .with_persistence(dir.path());

    assert_eq!(engine.run(Some(2), Duration::ZERO), 2);

    let sim = &engine.ledger().0;
    assert_eq!(sim.balance(ME), 1_000_000);
    assert!(sim.stack(30, RIVAL).is_some());
    assert_eq!(engine.stats().per_identity[ME].rejected_batches, 2);
    assert_eq!(engine.stats().per_identity[ME].engage_count, 0);

    let runtime = state::load_state_in(dir.path()).unwrap().unwrap();
    assert_eq!(runtime.status, Status::Running);
    assert_eq!(runtime.cycle, 2);
    assert!(runtime.message.unwrap().contains("execution reverted"));
}
