//! The accelerator device model.
//!
//! This module provides the synchronously clocked device: the dispatcher
//! that partitions a kernel launch into thread blocks, the lock-step
//! execution cores, the channel arbiters in front of each memory, and the
//! top-level [`Gpu`] that clocks them together.
//!
//! # Example
//!
//! ```
//! use simt_emu::device::DeviceParams;
//! use simt_emu::emu::Gpu;
//! use simt_emu::isa::assemble;
//!
//! let mut gpu = Gpu::new(DeviceParams::default()).unwrap();
//! let program = assemble("CONST R0, #7\nCONST R1, #3\nSTR R1, R0\nRET\n").unwrap();
//! gpu.program_mem_mut().load(0, &program);
//!
//! gpu.configure(4).unwrap();
//! gpu.launch().unwrap();
//! gpu.run_to_done(1_000).unwrap();
//! assert_eq!(gpu.data_mem().read(3), 7);
//! ```

pub mod alu;
pub mod arbiter;
pub mod core;
pub mod dispatcher;
pub mod gpu;
pub mod regfile;

pub use self::arbiter::{ArbiterStats, ChannelArbiter};
pub use self::core::{Core, CoreState, LaneRequest};
pub use self::dispatcher::{Block, Dispatcher, LaunchError};
pub use self::gpu::{Gpu, RunError, RunStats};
pub use self::regfile::LaneRegisters;
