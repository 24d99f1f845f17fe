//! Incremental contract deployment: linking, change detection, the
//! deployment ledger and the deployer that drives them.

pub mod artifacts;
pub mod deployer;
pub mod graph;
pub mod ledger;
pub mod linker;

pub use artifacts::{AbiItem, AbiItemKind, AbiParam, CompiledContract, SourceKind};
pub use deployer::{
    ContractState, DeployedContract, Deployer, DeploymentPlan, DeploymentReport, RedeployReason,
};
pub use graph::{DependencyGraph, NodeId};
pub use ledger::{ContractEntry, DeploymentLedger, DeploymentRecord, LedgerDocument, NetworkEntry};
pub use linker::{LinkDef, hash_address_independent, link, parse_link_defs};
