//! Memory banks
//!
//! The CPU's addressable storage: three fixed-size word arrays selected by
//! the bank id of a `PUSH`/`POP` record. The virtual `CONSTANT`/`IN`/`OUT`
//! banks have no storage here; the CPU intercepts them before ever calling
//! [`MemoryBanks::get`]/[`MemoryBanks::set`].

use super::dispatch::ExecError;
use crate::ir::Bank;
use crate::Word;

pub const LOCAL_SIZE: usize = 128;
pub const GLOBAL_SIZE: usize = 128;
pub const MEMORY_SIZE: usize = 1024;

/// The concrete banks, zero-initialized.
pub struct MemoryBanks {
    local: [Word; LOCAL_SIZE],
    global: [Word; GLOBAL_SIZE],
    memory: [Word; MEMORY_SIZE],
}

impl MemoryBanks {
    pub fn new() -> Self {
        Self {
            local: [0; LOCAL_SIZE],
            global: [0; GLOBAL_SIZE],
            memory: [0; MEMORY_SIZE],
        }
    }

    fn cells(&self, bank: Bank) -> Result<&[Word], ExecError> {
        match bank {
            Bank::Local => Ok(&self.local),
            Bank::Global => Ok(&self.global),
            Bank::Memory => Ok(&self.memory),
            _ => Err(ExecError::InvalidBank { id: bank as i32 }),
        }
    }

    fn cells_mut(&mut self, bank: Bank) -> Result<&mut [Word], ExecError> {
        match bank {
            Bank::Local => Ok(&mut self.local),
            Bank::Global => Ok(&mut self.global),
            Bank::Memory => Ok(&mut self.memory),
            _ => Err(ExecError::InvalidBank { id: bank as i32 }),
        }
    }

    /// Reads a cell. Fails for virtual banks and out-of-range offsets.
    pub fn get(&self, bank: Bank, offset: i64) -> Result<Word, ExecError> {
        let cells = self.cells(bank)?;
        usize::try_from(offset)
            .ok()
            .and_then(|i| cells.get(i).copied())
            .ok_or(ExecError::BankOffset {
                bank: bank.name(),
                offset,
            })
    }

    /// Writes a cell. Fails for virtual banks and out-of-range offsets.
    pub fn set(&mut self, bank: Bank, offset: i64, value: Word) -> Result<(), ExecError> {
        let cells = self.cells_mut(bank)?;
        let cell = usize::try_from(offset)
            .ok()
            .and_then(|i| cells.get_mut(i))
            .ok_or(ExecError::BankOffset {
                bank: bank.name(),
                offset,
            })?;
        *cell = value;
        Ok(())
    }
}

impl Default for MemoryBanks {
    fn default() -> Self {
        Self::new()
    }
}
