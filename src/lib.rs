pub mod modules;

pub use modules::batch::{ComposedBatch, compose, order_actions};
pub use modules::config::{
    AftershockConfig, AgentConfig, BatchConfig, FortressConfig, NetworkConfig, PredatorConfig,
    RunnerConfig, SeederConfig, SniperConfig, StrategyConfig, load_config, save_config,
};
pub use modules::economy::{
    Amount, Economy, EconomyParams, LedgerConstants, Multiplier, Power, Roi, Units,
};
pub use modules::engine::{
    CycleOutcome, CycleReport, ExecutionLoop, LoopPhase, LoopState, PendingIntent,
    ProcessedEventSet,
};
pub use modules::error::{ConfigError, CycleError, SkipReason};
pub use modules::grid::{Coordinate, CubeId, Grid, GridError};
pub use modules::ledger::{
    CubeOccupancy, EncodedAction, EventFeed, EventKind, Finality, Identity, Ledger, LedgerError,
    LedgerEvent, LedgerReader, LedgerWriter, StackRecord, SubmissionRef, SubmitReceipt,
};
pub use modules::rpc::RpcLedger;
pub use modules::scanner::{WorldScanner, WorldView};
pub use modules::sim::SimLedger;
pub use modules::state::{self, RuntimeState, Status};
pub use modules::stats::{ActionStats, ActionStatsStore, load_action_stats};
pub use modules::strategy::{
    ActionGroup, DecisionContext, Plan, ProposedAction, Strategy, StrategyKind, build_strategy,
};
pub use modules::subgraph::SubgraphFeed;
