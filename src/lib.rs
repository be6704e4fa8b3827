//! rigview: fleet monitor for mining-rig daemons.
//!
//! Talks the cgminer line-oriented TCP API to a fleet of rigs, discovers
//! rigs over UDP multicast, and assembles the replies into report pages:
//! joined sections, filtered and grouped rows, derived fields and totals.
//!
//! ## Architecture
//!
//! - **protocol**: command table, reply codec with stateful escaping, and
//!   the per-call TCP client
//! - **discovery**: UDP multicast probe for rigs on the local network
//! - **join**: stitches sections from two commands together per rig
//! - **query**: where/having predicates, the derived-field expression
//!   engine and the group/aggregate pipeline
//! - **page**: page specifications and report-row assembly with totals
//! - **poller**: bounded concurrent polling across the fleet

pub mod config;
pub mod discovery;
pub mod error;
pub mod join;
pub mod page;
pub mod poller;
pub mod protocol;
pub mod query;
pub mod types;

// Re-export the types a monitor frontend needs
pub use config::MonitorConfig;
pub use error::{DiscoveryError, PageError, ProtocolError};
pub use page::{Page, PageDef, PageOutput};
pub use poller::{Fleet, PageRun, PollError};
pub use protocol::{Command, Report, RigClient};
pub use types::{Record, ReportRow, RigAddress, Section};
