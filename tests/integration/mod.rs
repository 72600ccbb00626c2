//! Integration tests for the testgen crate.
//!
//! Process-level tests stand in for the external tool with small shell
//! scripts, so they only run on unix.

mod common;

#[cfg(unix)]
mod batch_run;
#[cfg(unix)]
mod cancellation;
mod cli;
#[cfg(unix)]
mod liveness;
