pub mod bootstrap;
pub mod calltable;
pub mod cli;
pub mod error;
pub mod executor;
pub mod fuzzer;
pub mod gate;
pub mod proc;
pub mod pollster;
pub mod program;
pub mod queue;
pub mod rpc;
pub mod signal;
pub mod state;
pub mod stats;

pub use error::{Error, Result};
