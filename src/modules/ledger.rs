//! Boundary between the engine and the authoritative ledger.
//!
//! The engine never mutates game state itself: it reads occupancy through
//! [`LedgerReader`], submits intent through [`LedgerWriter`] and learns about
//! other agents' combat through [`EventFeed`]. Signing, broadcast and
//! confirmation mechanics all live behind these traits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::modules::economy::{Amount, Economy, Power, Units};
use crate::modules::grid::CubeId;

/// Ledger address of an agent, compared case-insensitively.
pub type Identity = String;

pub fn normalize_identity(raw: &str) -> Identity {
    raw.trim().to_lowercase()
}

pub fn same_identity(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// One occupant's presence on a cube.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackRecord {
    pub occupant: Identity,
    #[serde(with = "quantity")]
    pub units: Units,
    #[serde(with = "quantity")]
    pub reapers: Units,
    /// Blocks since the stack was last reset.
    #[serde(alias = "age", with = "quantity")]
    pub spawn_age: u64,
    #[serde(default, with = "quantity::option", skip_serializing_if = "Option::is_none")]
    pub pending_bounty: Option<Amount>,
}

impl StackRecord {
    pub fn is_empty(&self) -> bool {
        self.units == 0 && self.reapers == 0
    }

    pub fn power(&self, economy: &Economy) -> Power {
        economy.power(self.units, self.reapers)
    }

    pub fn gross_bounty(&self, economy: &Economy) -> Amount {
        economy.gross_bounty(self.units, self.spawn_age, self.pending_bounty)
    }
}

/// Full occupancy list of one cube as returned by a batched read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeOccupancy {
    pub cube: CubeId,
    pub stacks: Vec<StackRecord>,
}

/// State-changing call accepted by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncodedAction {
    Reinforce {
        cube: CubeId,
        #[serde(with = "quantity")]
        amount: Units,
    },
    Transfer {
        from: CubeId,
        to: CubeId,
        #[serde(with = "quantity")]
        units: Units,
        #[serde(with = "quantity")]
        reapers: Units,
    },
    Engage {
        target: Identity,
        cube: CubeId,
        #[serde(with = "quantity")]
        units: Units,
        #[serde(with = "quantity")]
        reapers: Units,
    },
    Approve {
        #[serde(with = "quantity")]
        amount: Amount,
    },
}

impl EncodedAction {
    pub const fn label(&self) -> &'static str {
        match self {
            EncodedAction::Reinforce { .. } => "reinforce",
            EncodedAction::Transfer { .. } => "transfer",
            EncodedAction::Engage { .. } => "engage",
            EncodedAction::Approve { .. } => "approve",
        }
    }
}

impl fmt::Display for EncodedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodedAction::Reinforce { cube, amount } => {
                write!(f, "reinforce cube {} with {} units", cube, amount)
            }
            EncodedAction::Transfer {
                from,
                to,
                units,
                reapers,
            } => write!(
                f,
                "transfer {} units / {} reapers from cube {} to cube {}",
                units, reapers, from, to
            ),
            EncodedAction::Engage {
                target,
                cube,
                units,
                reapers,
            } => write!(
                f,
                "engage {} on cube {} with {} units / {} reapers",
                short_identity(target),
                cube,
                units,
                reapers
            ),
            EncodedAction::Approve { amount } => write!(f, "approve allowance {}", amount),
        }
    }
}

pub fn short_identity(identity: &str) -> &str {
    identity.get(..10).unwrap_or(identity)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionRef(pub String);

impl fmt::Display for SubmissionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub accepted: bool,
    #[serde(rename = "ref")]
    pub reference: SubmissionRef,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finality {
    pub confirmed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Externally observed ledger event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Stable unique id (suitable for de-duplication).
    pub id: String,
    pub block: u64,
    pub cube: CubeId,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Killed {
        attacker: Identity,
        defender: Identity,
        #[serde(with = "quantity")]
        bounty: Amount,
        /// Attacker survivors left on the cube, when the feed reports them.
        #[serde(default, with = "quantity::option")]
        remaining_units: Option<Units>,
        #[serde(default, with = "quantity::option")]
        remaining_reapers: Option<Units>,
    },
    Reinforced {
        agent: Identity,
        #[serde(with = "quantity")]
        units: Units,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerError {
    Transport(String),
    Rpc { code: i64, message: String },
    Decode(String),
    Unavailable(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Transport(msg) => write!(f, "transport error: {}", msg),
            LedgerError::Rpc { code, message } => write!(f, "rpc error {}: {}", code, message),
            LedgerError::Decode(msg) => write!(f, "decode error: {}", msg),
            LedgerError::Unavailable(msg) => write!(f, "unavailable: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Read-only queries. Implementations must present `batch_read` as one
/// logical call and return entries in input order.
pub trait LedgerReader {
    fn batch_read(&self, cubes: &[CubeId]) -> Result<Vec<CubeOccupancy>, LedgerError>;
    fn cost_per_unit(&self) -> Result<Amount, LedgerError>;
    fn burn_bps(&self) -> Result<u32, LedgerError>;
    fn balance_of(&self, identity: &str) -> Result<Amount, LedgerError>;
    fn allowance_of(&self, identity: &str) -> Result<Amount, LedgerError>;
}

/// Atomic batch submission. Submissions from one identity are strictly sequential.
pub trait LedgerWriter {
    fn submit(
        &mut self,
        identity: &str,
        actions: &[EncodedAction],
    ) -> Result<SubmitReceipt, LedgerError>;
    fn await_finality(&mut self, reference: &SubmissionRef) -> Result<Finality, LedgerError>;
}

/// Recent events, newest first, up to `first` entries.
pub trait EventFeed {
    fn recent_events(&self, first: usize) -> Result<Vec<LedgerEvent>, LedgerError>;
}

/// Everything the execution loop needs from the outside world.
pub trait Ledger: LedgerReader + LedgerWriter + EventFeed {}

impl<T: LedgerReader + LedgerWriter + EventFeed> Ledger for T {}

/// Integer quantities travel as decimal (or `0x` hex) strings because 18-decimal
/// token amounts overflow JSON numbers; plain numbers are accepted on input.
pub(crate) mod quantity {
    use std::fmt::Display;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<T: Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(d: D) -> Result<T, D::Error>
    where
        T: TryFrom<u128>,
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(d)?;
        let raw = parse(&value).map_err(D::Error::custom)?;
        T::try_from(raw).map_err(|_| D::Error::custom(format!("quantity {} overflows", raw)))
    }

    pub fn parse(value: &Value) -> Result<u128, String> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(u128::from)
                .ok_or_else(|| format!("quantity {} is not a non-negative integer", n)),
            Value::String(s) => {
                let s = s.trim();
                match s.strip_prefix("0x") {
                    Some(hex) => u128::from_str_radix(hex, 16),
                    None => s.parse::<u128>(),
                }
                .map_err(|_| format!("invalid quantity '{}'", s))
            }
            other => Err(format!("expected quantity, found {}", other)),
        }
    }

    pub mod option {
        use std::fmt::Display;

        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};
        use serde_json::Value;

        pub fn serialize<T: Display, S: Serializer>(
            value: &Option<T>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => s.collect_str(v),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, T, D>(d: D) -> Result<Option<T>, D::Error>
        where
            T: TryFrom<u128>,
            D: Deserializer<'de>,
        {
            let value = Value::deserialize(d)?;
            if value.is_null() {
                return Ok(None);
            }
            let raw = super::parse(&value).map_err(D::Error::custom)?;
            T::try_from(raw)
                .map(Some)
                .map_err(|_| D::Error::custom(format!("quantity {} overflows", raw)))
        }
    }
}
