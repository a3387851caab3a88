//! In-process ledger double.
//!
//! Applies submitted batches atomically against an in-memory board so the
//! execution loop can be driven end to end without a network. Combat here is a
//! simplified model (attacker must exceed defender power by 10%); it exists to
//! exercise the engine, not to mirror every rule of a deployed ledger.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use sha2::{Digest, Sha256};

use crate::modules::economy::{
    Amount, EconomyParams, LedgerConstants, Power, Units, bounty_multiplier, effective_power,
    net_bounty, spawn_cost,
};
use crate::modules::grid::{CubeId, Grid};
use crate::modules::ledger::{
    CubeOccupancy, EncodedAction, EventFeed, EventKind, Finality, Identity, LedgerError,
    LedgerEvent, LedgerReader, LedgerWriter, StackRecord, SubmissionRef, SubmitReceipt,
    normalize_identity,
};

/// Defender bonus: attackers must beat `power × 11 / 10`.
const DEFENDER_BONUS_NUM: Power = 11;
const DEFENDER_BONUS_DEN: Power = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SimStack {
    units: Units,
    reapers: Units,
    spawn_block: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimRejection {
    EmptyBatch,
    ApproveNotAlone,
    InvalidCube(CubeId),
    ZeroAmount,
    InsufficientBalance { needed: Amount, available: Amount },
    InsufficientAllowance { needed: Amount, allowance: Amount },
    InsufficientUnits { cube: CubeId },
    NotAdjacent { from: CubeId, to: CubeId },
    NoDefender { cube: CubeId },
    SelfTarget,
}

impl fmt::Display for SimRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimRejection::EmptyBatch => write!(f, "empty batch"),
            SimRejection::ApproveNotAlone => write!(f, "approve must be submitted on its own"),
            SimRejection::InvalidCube(cube) => write!(f, "invalid cube {}", cube),
            SimRejection::ZeroAmount => write!(f, "zero amount"),
            SimRejection::InsufficientBalance { needed, available } => {
                write!(f, "insufficient balance: need {}, have {}", needed, available)
            }
            SimRejection::InsufficientAllowance { needed, allowance } => {
                write!(f, "insufficient allowance: need {}, approved {}", needed, allowance)
            }
            SimRejection::InsufficientUnits { cube } => {
                write!(f, "not enough units on cube {}", cube)
            }
            SimRejection::NotAdjacent { from, to } => {
                write!(f, "cube {} is not adjacent to cube {}", from, to)
            }
            SimRejection::NoDefender { cube } => write!(f, "no defender on cube {}", cube),
            SimRejection::SelfTarget => write!(f, "cannot engage own stack"),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Board {
    stacks: BTreeMap<(CubeId, Identity), SimStack>,
    balances: HashMap<Identity, Amount>,
    allowances: HashMap<Identity, Amount>,
    events: Vec<LedgerEvent>,
    next_event: u64,
}

pub struct SimLedger {
    grid: Grid,
    params: EconomyParams,
    constants: LedgerConstants,
    block: u64,
    board: Board,
    sequence: u64,
    receipts: HashMap<SubmissionRef, Finality>,
    submissions: Vec<(Identity, Vec<EncodedAction>)>,
    failing_reads: Cell<u32>,
}

impl SimLedger {
    pub fn new(grid: Grid, params: EconomyParams, constants: LedgerConstants) -> Self {
        Self {
            grid,
            params,
            constants,
            block: 1,
            board: Board::default(),
            sequence: 0,
            receipts: HashMap::new(),
            submissions: Vec::new(),
            failing_reads: Cell::new(0),
        }
    }

    /// 6×6×6 board, cost 20 per unit, 6.66% burn.
    pub fn with_defaults() -> Self {
        Self::new(
            Grid::default(),
            EconomyParams::default(),
            LedgerConstants {
                cost_per_unit: 20,
                burn_bps: 666,
            },
        )
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn advance_blocks(&mut self, blocks: u64) {
        self.block = self.block.saturating_add(blocks);
    }

    pub fn fund(&mut self, identity: &str, amount: Amount) {
        let entry = self
            .board
            .balances
            .entry(normalize_identity(identity))
            .or_default();
        *entry = entry.saturating_add(amount);
    }

    pub fn set_allowance(&mut self, identity: &str, amount: Amount) {
        self.board
            .allowances
            .insert(normalize_identity(identity), amount);
    }

    /// Places (or merges into) a stack without charging anyone.
    pub fn place(&mut self, cube: CubeId, occupant: &str, units: Units, reapers: Units) {
        let block = self.block;
        merge_into(&mut self.board, cube, &normalize_identity(occupant), units, reapers, block);
    }

    pub fn stack(&self, cube: CubeId, occupant: &str) -> Option<StackRecord> {
        self.board
            .stacks
            .get(&(cube, normalize_identity(occupant)))
            .map(|s| self.record_for(&normalize_identity(occupant), s))
    }

    pub fn balance(&self, identity: &str) -> Amount {
        self.board
            .balances
            .get(&normalize_identity(identity))
            .copied()
            .unwrap_or(0)
    }

    /// Every batch submitted so far, accepted or not.
    pub fn submissions(&self) -> &[(Identity, Vec<EncodedAction>)] {
        &self.submissions
    }

    /// Makes the next `count` read calls fail with a transport error.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.set(count);
    }

    fn check_read(&self) -> Result<(), LedgerError> {
        let remaining = self.failing_reads.get();
        if remaining > 0 {
            self.failing_reads.set(remaining - 1);
            return Err(LedgerError::Transport("simulated read failure".into()));
        }
        Ok(())
    }

    fn record_for(&self, occupant: &str, stack: &SimStack) -> StackRecord {
        let age = self.block.saturating_sub(stack.spawn_block);
        StackRecord {
            occupant: occupant.to_string(),
            units: stack.units,
            reapers: stack.reapers,
            spawn_age: age,
            pending_bounty: Some(self.pending_bounty(stack)),
        }
    }

    fn pending_bounty(&self, stack: &SimStack) -> Amount {
        let age = self.block.saturating_sub(stack.spawn_block);
        (stack.units as Amount)
            .saturating_mul(self.params.bounty_per_unit as Amount)
            .saturating_mul(bounty_multiplier(age, &self.params) as Amount)
    }

    fn submission_ref(&self, identity: &str, actions: &[EncodedAction]) -> SubmissionRef {
        let mut hasher = Sha256::new();
        hasher.update(identity.as_bytes());
        hasher.update(self.sequence.to_le_bytes());
        for action in actions {
            hasher.update(action.to_string().as_bytes());
        }
        SubmissionRef(hex::encode(hasher.finalize()))
    }

    /// Applies the whole batch to a scratch copy and commits only if every
    /// action succeeds.
    fn execute(&self, identity: &str, actions: &[EncodedAction]) -> Result<Board, SimRejection> {
        if actions.is_empty() {
            return Err(SimRejection::EmptyBatch);
        }
        let has_approve = actions
            .iter()
            .any(|a| matches!(a, EncodedAction::Approve { .. }));
        if has_approve && actions.len() > 1 {
            return Err(SimRejection::ApproveNotAlone);
        }

        let mut board = self.board.clone();
        for action in actions {
            self.apply(&mut board, identity, action)?;
        }
        Ok(board)
    }

    fn apply(
        &self,
        board: &mut Board,
        identity: &str,
        action: &EncodedAction,
    ) -> Result<(), SimRejection> {
        match action {
            EncodedAction::Approve { amount } => {
                board.allowances.insert(identity.to_string(), *amount);
                Ok(())
            }
            EncodedAction::Reinforce { cube, amount } => {
                self.valid_cube(*cube)?;
                if *amount == 0 {
                    return Err(SimRejection::ZeroAmount);
                }
                charge(board, identity, spawn_cost(*amount, self.constants.cost_per_unit))?;
                merge_into(board, *cube, identity, *amount, 0, self.block);
                push_event(
                    board,
                    self.block,
                    *cube,
                    EventKind::Reinforced {
                        agent: identity.to_string(),
                        units: *amount,
                    },
                );
                Ok(())
            }
            EncodedAction::Transfer {
                from,
                to,
                units,
                reapers,
            } => {
                self.valid_cube(*from)?;
                self.valid_cube(*to)?;
                if !self.grid.is_adjacent(*from, *to).unwrap_or(false) {
                    return Err(SimRejection::NotAdjacent {
                        from: *from,
                        to: *to,
                    });
                }
                if *units == 0 && *reapers == 0 {
                    return Err(SimRejection::ZeroAmount);
                }
                if self.params.move_fee > 0 {
                    charge(board, identity, self.params.move_fee)?;
                }
                withdraw(board, *from, identity, *units, *reapers)?;
                merge_into(board, *to, identity, *units, *reapers, self.block);
                Ok(())
            }
            EncodedAction::Engage {
                target,
                cube,
                units,
                reapers,
            } => {
                self.valid_cube(*cube)?;
                let target = normalize_identity(target);
                if target == identity {
                    return Err(SimRejection::SelfTarget);
                }
                let defender = board
                    .stacks
                    .get(&(*cube, target.clone()))
                    .copied()
                    .ok_or(SimRejection::NoDefender { cube: *cube })?;
                withdraw(board, *cube, identity, *units, *reapers)?;

                let m = self.params.reaper_multiplier;
                let atk = effective_power(*units, *reapers, m);
                let def = effective_power(defender.units, defender.reapers, m);
                if atk * DEFENDER_BONUS_DEN <= def * DEFENDER_BONUS_NUM {
                    // Committed force is lost, defender untouched.
                    return Ok(());
                }

                let surplus = atk * DEFENDER_BONUS_DEN - def * DEFENDER_BONUS_NUM;
                let remain_pct = surplus * 100 / (atk * DEFENDER_BONUS_DEN);
                let rem_units = (*units as Power * remain_pct / 100) as Units;
                let rem_reapers = (*reapers as Power * remain_pct / 100) as Units;

                let bounty = self.pending_bounty(&defender);
                let payout = net_bounty(bounty, self.constants.burn_bps);
                board.stacks.remove(&(*cube, target.clone()));
                let balance = board.balances.entry(identity.to_string()).or_default();
                *balance = balance.saturating_add(payout);
                merge_into(board, *cube, identity, rem_units, rem_reapers, self.block);
                push_event(
                    board,
                    self.block,
                    *cube,
                    EventKind::Killed {
                        attacker: identity.to_string(),
                        defender: target,
                        bounty,
                        remaining_units: Some(rem_units),
                        remaining_reapers: Some(rem_reapers),
                    },
                );
                Ok(())
            }
        }
    }

    fn valid_cube(&self, cube: CubeId) -> Result<(), SimRejection> {
        self.grid
            .check(cube)
            .map(|_| ())
            .map_err(|_| SimRejection::InvalidCube(cube))
    }
}

fn charge(board: &mut Board, identity: &str, cost: Amount) -> Result<(), SimRejection> {
    let available = board.balances.get(identity).copied().unwrap_or(0);
    if available < cost {
        return Err(SimRejection::InsufficientBalance {
            needed: cost,
            available,
        });
    }
    let allowance = board.allowances.get(identity).copied().unwrap_or(0);
    if allowance < cost {
        return Err(SimRejection::InsufficientAllowance {
            needed: cost,
            allowance,
        });
    }
    board.balances.insert(identity.to_string(), available - cost);
    if allowance != Amount::MAX {
        board.allowances.insert(identity.to_string(), allowance - cost);
    }
    Ok(())
}

fn withdraw(
    board: &mut Board,
    cube: CubeId,
    identity: &str,
    units: Units,
    reapers: Units,
) -> Result<(), SimRejection> {
    let key = (cube, identity.to_string());
    let stack = board
        .stacks
        .get_mut(&key)
        .ok_or(SimRejection::InsufficientUnits { cube })?;
    if stack.units < units || stack.reapers < reapers {
        return Err(SimRejection::InsufficientUnits { cube });
    }
    stack.units -= units;
    stack.reapers -= reapers;
    if stack.units == 0 && stack.reapers == 0 {
        board.stacks.remove(&key);
    }
    Ok(())
}

/// Units add; age resets only if the occupant had nothing on the cube.
fn merge_into(
    board: &mut Board,
    cube: CubeId,
    identity: &str,
    units: Units,
    reapers: Units,
    block: u64,
) {
    if units == 0 && reapers == 0 {
        return;
    }
    let stack = board
        .stacks
        .entry((cube, identity.to_string()))
        .or_insert(SimStack {
            units: 0,
            reapers: 0,
            spawn_block: block,
        });
    stack.units = stack.units.saturating_add(units);
    stack.reapers = stack.reapers.saturating_add(reapers);
}

fn push_event(board: &mut Board, block: u64, cube: CubeId, kind: EventKind) {
    board.next_event += 1;
    board.events.push(LedgerEvent {
        id: format!("{}-{}", block, board.next_event),
        block,
        cube,
        kind,
    });
}

impl LedgerReader for SimLedger {
    fn batch_read(&self, cubes: &[CubeId]) -> Result<Vec<CubeOccupancy>, LedgerError> {
        self.check_read()?;
        let mut out = Vec::with_capacity(cubes.len());
        for &cube in cubes {
            self.grid
                .check(cube)
                .map_err(|e| LedgerError::Rpc {
                    code: -32602,
                    message: e.to_string(),
                })?;
            let stacks = self
                .board
                .stacks
                .iter()
                .filter(|((c, _), _)| *c == cube)
                .map(|((_, occupant), stack)| self.record_for(occupant, stack))
                .collect();
            out.push(CubeOccupancy { cube, stacks });
        }
        Ok(out)
    }

    fn cost_per_unit(&self) -> Result<Amount, LedgerError> {
        Ok(self.constants.cost_per_unit)
    }

    fn burn_bps(&self) -> Result<u32, LedgerError> {
        Ok(self.constants.burn_bps)
    }

    fn balance_of(&self, identity: &str) -> Result<Amount, LedgerError> {
        self.check_read()?;
        Ok(self.balance(identity))
    }

    fn allowance_of(&self, identity: &str) -> Result<Amount, LedgerError> {
        self.check_read()?;
        Ok(self
            .board
            .allowances
            .get(&normalize_identity(identity))
            .copied()
            .unwrap_or(0))
    }
}

impl LedgerWriter for SimLedger {
    fn submit(
        &mut self,
        identity: &str,
        actions: &[EncodedAction],
    ) -> Result<SubmitReceipt, LedgerError> {
        let identity = normalize_identity(identity);
        self.sequence += 1;
        let reference = self.submission_ref(&identity, actions);
        self.submissions.push((identity.clone(), actions.to_vec()));

        if actions.is_empty() {
            return Ok(SubmitReceipt {
                accepted: false,
                reference,
                reason: Some(SimRejection::EmptyBatch.to_string()),
            });
        }

        let finality = match self.execute(&identity, actions) {
            Ok(board) => {
                self.board = board;
                Finality {
                    confirmed: true,
                    reason: None,
                }
            }
            Err(rejection) => Finality {
                confirmed: false,
                reason: Some(format!("reverted: {}", rejection)),
            },
        };
        self.block += 1;
        self.receipts.insert(reference.clone(), finality);
        Ok(SubmitReceipt {
            accepted: true,
            reference,
            reason: None,
        })
    }

    fn await_finality(&mut self, reference: &SubmissionRef) -> Result<Finality, LedgerError> {
        self.receipts
            .get(reference)
            .cloned()
            .ok_or_else(|| LedgerError::Unavailable(format!("unknown submission {}", reference)))
    }
}

impl EventFeed for SimLedger {
    fn recent_events(&self, first: usize) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.check_read()?;
        Ok(self.board.events.iter().rev().take(first).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: &str = "0xaaaa";
    const THEM: &str = "0xbbbb";

    fn ledger() -> SimLedger {
        let mut sim = SimLedger::with_defaults();
        sim.fund(ME, 1_000_000);
        sim.set_allowance(ME, Amount::MAX);
        sim
    }

    fn confirm(sim: &mut SimLedger, who: &str, actions: &[EncodedAction]) -> Finality {
        let receipt = sim.submit(who, actions).unwrap();
        assert!(receipt.accepted);
        sim.await_finality(&receipt.reference).unwrap()
    }

    #[test]
    fn reinforce_creates_then_merges_without_resetting_age() {
        let mut sim = ledger();
        let f = confirm(&mut sim, ME, &[EncodedAction::Reinforce { cube: 5, amount: 100 }]);
        assert!(f.confirmed);
        sim.advance_blocks(10);
        confirm(&mut sim, ME, &[EncodedAction::Reinforce { cube: 5, amount: 50 }]);

        let stack = sim.stack(5, ME).unwrap();
        assert_eq!(stack.units, 150);
        assert_eq!(stack.spawn_age, 12);
        assert_eq!(sim.balance(ME), 1_000_000 - 150 * 20);
    }

    #[test]
    fn failing_action_reverts_the_whole_batch() {
        let mut sim = ledger();
        let f = confirm(
            &mut sim,
            ME,
            &[
                EncodedAction::Reinforce { cube: 5, amount: 100 },
                EncodedAction::Engage {
                    target: THEM.into(),
                    cube: 5,
                    units: 99,
                    reapers: 0,
                },
            ],
        );
        assert!(!f.confirmed);
        assert!(f.reason.unwrap().contains("no defender"));
        assert!(sim.stack(5, ME).is_none());
        assert_eq!(sim.balance(ME), 1_000_000);
    }

    #[test]
    fn engage_needs_ten_percent_edge() {
        let mut sim = ledger();
        sim.place(9, THEM, 100, 0);
        sim.place(9, ME, 200, 0);
        let f = confirm(
            &mut sim,
            ME,
            &[EncodedAction::Engage {
                target: THEM.into(),
                cube: 9,
                units: 110,
                reapers: 0,
            }],
        );
        assert!(f.confirmed);
        // 110 is not > 100 × 1.1: committed force lost, defender intact.
        assert_eq!(sim.stack(9, ME).unwrap().units, 90);
        assert_eq!(sim.stack(9, THEM).unwrap().units, 100);
    }

    #[test]
    fn winning_engage_pays_net_bounty_and_emits_event() {
        let mut sim = ledger();
        sim.place(9, THEM, 10, 0);
        sim.place(9, ME, 1_000, 0);
        let before = sim.balance(ME);
        confirm(
            &mut sim,
            ME,
            &[EncodedAction::Engage {
                target: THEM.into(),
                cube: 9,
                units: 999,
                reapers: 0,
            }],
        );
        assert!(sim.stack(9, THEM).is_none());
        assert_eq!(sim.balance(ME) - before, 6_217);

        let events = sim.recent_events(5).unwrap();
        match &events[0].kind {
            EventKind::Killed {
                attacker, defender, bounty, ..
            } => {
                assert_eq!(attacker, ME);
                assert_eq!(defender, THEM);
                assert_eq!(*bounty, 6_660);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn approve_must_travel_alone() {
        let mut sim = ledger();
        let f = confirm(
            &mut sim,
            ME,
            &[
                EncodedAction::Approve { amount: 10 },
                EncodedAction::Reinforce { cube: 1, amount: 1 },
            ],
        );
        assert!(!f.confirmed);
        let f = confirm(&mut sim, ME, &[EncodedAction::Approve { amount: 10 }]);
        assert!(f.confirmed);
        assert_eq!(sim.allowance_of(ME).unwrap(), 10);
    }

    #[test]
    fn transfer_requires_adjacency() {
        let mut sim = ledger();
        sim.place(1, ME, 10, 0);
        let f = confirm(
            &mut sim,
            ME,
            &[EncodedAction::Transfer {
                from: 1,
                to: 3,
                units: 5,
                reapers: 0,
            }],
        );
        assert!(!f.confirmed);
        let f = confirm(
            &mut sim,
            ME,
            &[EncodedAction::Transfer {
                from: 1,
                to: 2,
                units: 5,
                reapers: 0,
            }],
        );
        assert!(f.confirmed);
        assert_eq!(sim.stack(2, ME).unwrap().units, 5);
        assert_eq!(sim.stack(1, ME).unwrap().units, 5);
    }

    #[test]
    fn reads_keep_input_order_and_can_be_made_to_fail() {
        let sim = {
            let mut sim = ledger();
            sim.place(3, THEM, 1, 0);
            sim.place(1, ME, 2, 0);
            sim
        };
        let view = sim.batch_read(&[3, 2, 1]).unwrap();
        let cubes: Vec<_> = view.iter().map(|c| c.cube).collect();
        assert_eq!(cubes, vec![3, 2, 1]);
        assert!(view[1].stacks.is_empty());

        sim.fail_next_reads(1);
        assert!(sim.batch_read(&[1]).is_err());
        assert!(sim.batch_read(&[1]).is_ok());
    }

    #[test]
    fn submission_refs_are_hex_sha256() {
        let mut sim = ledger();
        let r = sim
            .submit(ME, &[EncodedAction::Reinforce { cube: 1, amount: 1 }])
            .unwrap();
        assert_eq!(r.reference.0.len(), 64);
        assert!(r.reference.0.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
