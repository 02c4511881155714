//! Meridian Driver - the graph engine contract.
//!
//! The routing layer reaches each shard's graph engine only through the
//! traits in this crate. A deterministic in-memory backend is provided for
//! tests and for running a node without real engines.
//!
//! # Design Principles
//!
//! - **Trait seam**: `DriverFactory`, `GraphDriver` and `GraphSession` hide the engine
//! - **Scoped sessions**: Every session is opened for one access mode and closed by its owner
//! - **All-or-nothing apply**: A change batch is either fully applied or not at all
//! - **Fault injection**: The simulated backend can fail any call on demand

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod driver;
mod error;
mod simulated;
mod value;

pub use driver::{DriverFactory, GraphDriver, GraphSession};
pub use error::{DriverError, DriverResult};
pub use simulated::{
    ExecutedStatement, SimulatedDriver, SimulatedDriverFactory, SimulatedFaultConfig,
    SimulatedGraph,
};
pub use value::{ChangeEntry, QueryParams, QueryResult, Record, ResultSummary};
