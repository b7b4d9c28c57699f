//! Build-time device parameters.
//!
//! These mirror what would be elaboration-time parameters in hardware:
//! core count, threads per block, and the physical channel count of each
//! memory. Address and data widths are fixed by the types — 8-bit data and
//! addresses for data memory, 16-bit instruction words, 8-bit program
//! addresses — so both memories hold 256 cells.

use thiserror::Error;

/// Data memory size in bytes (8-bit addresses).
pub const DATA_MEM_SIZE: usize = 256;

/// Program memory size in 16-bit words (8-bit addresses).
pub const PROGRAM_MEM_SIZE: usize = 256;

/// Invalid device parameter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("device needs at least one core")]
    ZeroCores,

    #[error("threads per block must be in 1..=255, got {0}")]
    BadThreadsPerBlock(usize),

    #[error("{memory} memory needs at least one channel")]
    ZeroChannels { memory: &'static str },

    #[error("memory latency must be at least one cycle")]
    ZeroLatency,
}

/// Device build parameters.
///
/// The default is the reference build: 2 cores of 4 threads each, one
/// program-memory channel, four data-memory channels, single-cycle
/// memory latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceParams {
    /// Number of execution cores.
    pub num_cores: usize,
    /// Lanes per thread block (also the blockDim special-register value).
    pub threads_per_block: usize,
    /// Physical channels into program memory.
    pub program_mem_channels: usize,
    /// Physical channels into data memory.
    pub data_mem_channels: usize,
    /// Cycles from request acceptance to response validity, for both
    /// memories.
    pub memory_latency: u32,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            num_cores: 2,
            threads_per_block: 4,
            program_mem_channels: 1,
            data_mem_channels: 4,
            memory_latency: 1,
        }
    }
}

impl DeviceParams {
    /// Check that the parameter set describes a buildable device.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.num_cores == 0 {
            return Err(ParamsError::ZeroCores);
        }
        if self.threads_per_block == 0 || self.threads_per_block > 255 {
            return Err(ParamsError::BadThreadsPerBlock(self.threads_per_block));
        }
        if self.program_mem_channels == 0 {
            return Err(ParamsError::ZeroChannels { memory: "program" });
        }
        if self.data_mem_channels == 0 {
            return Err(ParamsError::ZeroChannels { memory: "data" });
        }
        if self.memory_latency == 0 {
            return Err(ParamsError::ZeroLatency);
        }
        Ok(())
    }
}
