use std::fmt;

use crate::modules::economy::{Amount, Power, Roi};
use crate::modules::grid::{CubeId, GridError};
use crate::modules::ledger::LedgerError;

/// Failures that abandon the current cycle. The loop logs them and moves on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleError {
    TransientReadFailure(LedgerError),
    RejectedSubmission { reason: String },
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::TransientReadFailure(err) => write!(f, "transient read failure: {}", err),
            CycleError::RejectedSubmission { reason } => {
                write!(f, "submission rejected: {}", reason)
            }
        }
    }
}

impl std::error::Error for CycleError {}

/// Policy decisions not to act. Values, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    InsufficientBalance { needed: Amount, available: Amount },
    InsufficientAllowance { needed: Amount, allowance: Amount },
    TargetVanished { cube: CubeId },
    PowerCeilingExceeded { cube: CubeId, power: Power, ceiling: Power },
    BelowRoiThreshold { cube: CubeId, roi: Roi },
    Unprofitable { cube: CubeId, net_bounty: Amount, cost: Amount },
    /// Our available force cannot reach the required force.
    Outgunned { cube: CubeId, force: Power, required: Power },
    PendingQueueFull { capacity: usize },
    GasCeilingExceeded { dropped: String },
    NoCandidate,
}

impl SkipReason {
    pub const fn label(&self) -> &'static str {
        match self {
            SkipReason::InsufficientBalance { .. } => "insufficient_balance",
            SkipReason::InsufficientAllowance { .. } => "insufficient_allowance",
            SkipReason::TargetVanished { .. } => "target_vanished",
            SkipReason::PowerCeilingExceeded { .. } => "power_ceiling_exceeded",
            SkipReason::BelowRoiThreshold { .. } => "below_roi_threshold",
            SkipReason::Unprofitable { .. } => "unprofitable",
            SkipReason::Outgunned { .. } => "outgunned",
            SkipReason::PendingQueueFull { .. } => "pending_queue_full",
            SkipReason::GasCeilingExceeded { .. } => "gas_ceiling_exceeded",
            SkipReason::NoCandidate => "no_candidate",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientBalance { needed, available } => write!(
                f,
                "insufficient balance: need {}, have {}",
                needed, available
            ),
            SkipReason::InsufficientAllowance { needed, allowance } => write!(
                f,
                "insufficient allowance: need {}, approved {}",
                needed, allowance
            ),
            SkipReason::TargetVanished { cube } => write!(f, "target on cube {} vanished", cube),
            SkipReason::PowerCeilingExceeded {
                cube,
                power,
                ceiling,
            } => write!(
                f,
                "target on cube {} has power {} above ceiling {}",
                cube, power, ceiling
            ),
            SkipReason::BelowRoiThreshold { cube, roi } => {
                write!(f, "cube {} roi {} below threshold", cube, roi)
            }
            SkipReason::Unprofitable {
                cube,
                net_bounty,
                cost,
            } => write!(
                f,
                "cube {} unprofitable: net bounty {} <= cost {}",
                cube, net_bounty, cost
            ),
            SkipReason::Outgunned {
                cube,
                force,
                required,
            } => write!(
                f,
                "cube {}: available force {} below required {}",
                cube, force, required
            ),
            SkipReason::PendingQueueFull { capacity } => {
                write!(f, "pending intent queue full ({})", capacity)
            }
            SkipReason::GasCeilingExceeded { dropped } => {
                write!(f, "gas ceiling reached, dropped {}", dropped)
            }
            SkipReason::NoCandidate => write!(f, "no candidate this cycle"),
        }
    }
}

/// Unrecoverable setup problems; the process exits before the loop starts.
#[derive(Debug)]
pub enum ConfigError {
    MissingIdentity,
    MissingEndpoint(&'static str),
    ZeroCostPerUnit,
    InvalidGrid(GridError),
    InvalidCube { field: &'static str, source: GridError },
    Invalid(String),
    Constants(LedgerError),
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingIdentity => write!(f, "identity is not configured"),
            ConfigError::MissingEndpoint(name) => write!(f, "missing endpoint: {}", name),
            ConfigError::ZeroCostPerUnit => write!(f, "ledger reported a zero cost per unit"),
            ConfigError::InvalidGrid(err) => write!(f, "invalid grid: {}", err),
            ConfigError::InvalidCube { field, source } => write!(f, "{}: {}", field, source),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::Constants(err) => write!(f, "failed to read ledger constants: {}", err),
            ConfigError::Io(err) => write!(f, "config io: {}", err),
            ConfigError::Parse(err) => write!(f, "config parse: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl From<GridError> for ConfigError {
    fn from(err: GridError) -> Self {
        ConfigError::InvalidGrid(err)
    }
}
