//! MapReduce coordinator and worker over tarpc.
//!
//! The coordinator owns the task state machine and the worker directory and
//! hands out Map tasks, then Reduce tasks once every Map task succeeded.
//! Workers heartbeat in the background, partition Map output into
//! hash buckets under their own working directory, and read every worker's
//! buckets back at Reduce time. `runtime` runs the same job inside one
//! process instead.

pub mod app;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod partition;
pub mod registry;
pub mod rpc;
pub mod runtime;
pub mod store;
pub mod task;
pub mod worker;

pub use app::{KeyValue, MapFn, MapReduceApp, ReduceFn};
pub use error::{Error, Result};
