pub mod artifacts;
pub mod config;
pub mod device;
pub mod error;
pub mod exec;
pub mod flow;
pub mod idb;
pub mod io;
pub mod maestro;
pub mod paths;
pub mod prereq;
pub mod run;
pub mod simctl;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{CommandError, LoopError, Result};
