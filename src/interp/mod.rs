//! Interpreter module
//!
//! The CPU and its banked memory.

pub mod banks;
pub mod dispatch;

pub use banks::{MemoryBanks, GLOBAL_SIZE, LOCAL_SIZE, MEMORY_SIZE};
pub use dispatch::{Cpu, ExecError};
