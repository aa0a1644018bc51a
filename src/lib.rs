//! A teaching simulator for process execution: a small assembly-like
//! instruction set, pluggable memory allocators and CPU schedulers, and a
//! driver that runs one or more CPUs over a shared main memory.

pub mod config;
pub mod error;
pub mod io;
pub mod isa;
pub mod kernel;

pub use error::{Result, SimError};
