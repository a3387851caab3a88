pub mod batch;
pub mod config;
pub mod economy;
pub mod engine;
pub mod error;
pub mod grid;
pub mod ledger;
pub mod rpc;
pub mod scanner;
pub mod sim;
pub mod state;
pub mod stats;
pub mod strategy;
pub mod subgraph;
