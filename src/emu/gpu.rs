//! Top-level device model.
//!
//! Wires the dispatcher, the cores, the two channel arbiters and the two
//! external memories into one synchronously clocked device:
//!
//! ```text
//!            +------------+   control register / start / done
//!   host --> | Dispatcher |----------------------------------+
//!            +-----+------+                                  |
//!                  | blocks                                  |
//!          +-------+-------+                                 |
//!          v               v                                 v
//!      +--------+     +--------+        fetch           +---------+
//!      | Core 0 | ... | Core N |----> arbiter --------> | program |
//!      +--------+     +--------+   (1..K channels)      | memory  |
//!          |               |                            +---------+
//!          +-------+-------+            data            +---------+
//!                  +-----------------> arbiter -------> |  data   |
//!                    per-lane ld/st (1..M channels)     | memory  |
//!                                                       +---------+
//! ```
//!
//! One [`Gpu::step`] is one global clock edge. Within a cycle the phases
//! run in a fixed order: block dispatch, memory response delivery, core
//! state advance, retirement and done aggregation, request arbitration
//! and acceptance, memory latency tick. Requests stay asserted until
//! accepted; a channel stays bound to its requester until the response is
//! delivered back. Stalls therefore come only from channel contention and
//! memory latency, never from lost requests.
//!
//! The host surface mirrors the hardware wires: `reset`, a thread-count
//! control register write, a `start` pulse and a level-held `done`. The
//! wire-level entry points ignore malformed operations with a warning
//! (the device has no error signal); the typed `configure`/`launch` pair
//! reports them as [`LaunchError`].

use log::{debug, warn};
use smallvec::SmallVec;
use thiserror::Error;

use super::arbiter::{ArbiterStats, ChannelArbiter};
use super::core::{Core, LaneRequest};
use super::dispatcher::{Dispatcher, LaunchError};
use crate::device::memory::MemoryModel;
use crate::device::params::{DeviceParams, ParamsError, DATA_MEM_SIZE, PROGRAM_MEM_SIZE};

/// Failure to finish a kernel inside a cycle budget.
///
/// The device itself has no failure modes; a kernel that never reaches
/// `done` (a stall bug, or a program with no RET) surfaces as an
/// exhausted budget.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("kernel did not complete within {0} cycles")]
    CycleBudget(u64),
}

/// Execution counters, aggregated over the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    /// Clock edges since reset.
    pub cycles: u64,
    /// Instructions retired across all cores.
    pub instructions: u64,
    /// Blocks run to completion across all cores.
    pub blocks_completed: u64,
    /// Instruction-side arbiter counters.
    pub fetch: ArbiterStats,
    /// Data-side arbiter counters.
    pub data: ArbiterStats,
}

/// The accelerator device.
pub struct Gpu {
    params: DeviceParams,
    dispatcher: Dispatcher,
    cores: Vec<Core>,
    fetch_arbiter: ChannelArbiter,
    data_arbiter: ChannelArbiter,
    program_mem: MemoryModel<u16>,
    data_mem: MemoryModel<u8>,
    cycle: u64,
}

impl Gpu {
    /// Build a device from validated parameters.
    pub fn new(params: DeviceParams) -> Result<Self, ParamsError> {
        params.validate()?;
        let cores = (0..params.num_cores)
            .map(|id| Core::new(id, params.threads_per_block))
            .collect();
        Ok(Self {
            dispatcher: Dispatcher::new(params.threads_per_block),
            cores,
            fetch_arbiter: ChannelArbiter::new(params.program_mem_channels),
            data_arbiter: ChannelArbiter::new(params.data_mem_channels),
            program_mem: MemoryModel::new(
                PROGRAM_MEM_SIZE,
                params.program_mem_channels,
                params.memory_latency,
            ),
            data_mem: MemoryModel::new(
                DATA_MEM_SIZE,
                params.data_mem_channels,
                params.memory_latency,
            ),
            cycle: 0,
            params,
        })
    }

    pub fn params(&self) -> &DeviceParams {
        &self.params
    }

    /// Synchronous reset: every stateful component returns to its initial
    /// state and any in-flight launch is aborted. Memory contents are
    /// outside the reset domain and survive.
    pub fn reset(&mut self) {
        debug!("device reset");
        self.dispatcher.reset();
        for core in &mut self.cores {
            core.reset();
        }
        self.fetch_arbiter.reset();
        self.data_arbiter.reset();
        self.program_mem.reset();
        self.data_mem.reset();
        self.cycle = 0;
    }

    /// Latch the thread count for the next launch.
    pub fn configure(&mut self, thread_count: u8) -> Result<(), LaunchError> {
        self.dispatcher.configure(thread_count)
    }

    /// Begin the configured launch.
    pub fn launch(&mut self) -> Result<(), LaunchError> {
        self.dispatcher.launch()
    }

    /// Wire-level control register write. Ignored (with a warning) while
    /// a launch is active or for a zero value; the active launch is never
    /// disturbed.
    pub fn write_thread_count(&mut self, thread_count: u8) {
        if let Err(err) = self.configure(thread_count) {
            warn!("control register write ignored: {}", err);
        }
    }

    /// Wire-level start pulse. Ignored (with a warning) if nothing is
    /// configured or a launch is already active.
    pub fn start(&mut self) {
        if let Err(err) = self.launch() {
            warn!("start pulse ignored: {}", err);
        }
    }

    /// Level-held completion flag: high from the cycle the last block
    /// retires until the next reset or launch.
    pub fn done(&self) -> bool {
        self.dispatcher.is_done()
    }

    /// Clock edges since reset.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn program_mem(&self) -> &MemoryModel<u16> {
        &self.program_mem
    }

    pub fn program_mem_mut(&mut self) -> &mut MemoryModel<u16> {
        &mut self.program_mem
    }

    pub fn data_mem(&self) -> &MemoryModel<u8> {
        &self.data_mem
    }

    pub fn data_mem_mut(&mut self) -> &mut MemoryModel<u8> {
        &mut self.data_mem
    }

    /// Execution counters since reset.
    pub fn stats(&self) -> RunStats {
        RunStats {
            cycles: self.cycle,
            instructions: self.cores.iter().map(Core::instructions_retired).sum(),
            blocks_completed: self.cores.iter().map(Core::blocks_completed).sum(),
            fetch: self.fetch_arbiter.stats(),
            data: self.data_arbiter.stats(),
        }
    }

    /// Advance the whole device by one clock edge.
    pub fn step(&mut self) {
        self.dispatcher.poll(&mut self.cores);

        self.deliver_fetch_responses();
        self.deliver_data_responses();

        for core in &mut self.cores {
            core.step();
        }

        for core in &mut self.cores {
            if let Some(block_id) = core.take_retired() {
                self.dispatcher.block_retired(block_id);
            }
        }
        self.dispatcher.update_done(&self.cores);

        self.issue_fetch_requests();
        self.issue_data_requests();

        self.program_mem.tick();
        self.data_mem.tick();
        self.cycle += 1;
    }

    /// Step until `done` or the cycle budget runs out. Returns the number
    /// of cycles stepped.
    pub fn run(&mut self, max_cycles: u64) -> u64 {
        let mut stepped = 0;
        while stepped < max_cycles && !self.done() {
            self.step();
            stepped += 1;
        }
        stepped
    }

    /// Step until `done`, failing if the budget is exhausted first.
    pub fn run_to_done(&mut self, max_cycles: u64) -> Result<u64, RunError> {
        let stepped = self.run(max_cycles);
        if self.done() {
            Ok(stepped)
        } else {
            Err(RunError::CycleBudget(max_cycles))
        }
    }

    fn deliver_fetch_responses(&mut self) {
        for channel in 0..self.fetch_arbiter.num_channels() {
            if let Some(core_id) = self.fetch_arbiter.requester_on(channel) {
                if let Some(word) = self.program_mem.take_read_response(channel) {
                    self.cores[core_id].complete_fetch(word);
                    self.fetch_arbiter.release(channel);
                }
            }
        }
    }

    fn deliver_data_responses(&mut self) {
        let lanes_per_core = self.params.threads_per_block;
        for channel in 0..self.data_arbiter.num_channels() {
            if let Some(requester) = self.data_arbiter.requester_on(channel) {
                let core_id = requester / lanes_per_core;
                let lane = requester % lanes_per_core;
                if let Some(value) = self.data_mem.take_read_response(channel) {
                    self.cores[core_id].complete_lane_read(lane, value);
                    self.data_arbiter.release(channel);
                } else if self.data_mem.take_write_ack(channel) {
                    self.cores[core_id].complete_lane_write(lane);
                    self.data_arbiter.release(channel);
                }
            }
        }
    }

    fn issue_fetch_requests(&mut self) {
        let pending: SmallVec<[(usize, u8); 4]> = self
            .cores
            .iter()
            .enumerate()
            .filter(|(id, _)| self.fetch_arbiter.channel_of(*id).is_none())
            .filter_map(|(id, core)| core.fetch_request().map(|pc| (id, pc)))
            .collect();

        let ids: SmallVec<[usize; 4]> = pending.iter().map(|(id, _)| *id).collect();
        for (channel, requester) in self.fetch_arbiter.arbitrate(&ids) {
            if let Some((_, pc)) = pending.iter().find(|(id, _)| *id == requester) {
                let accepted = self.program_mem.accept_read(channel, *pc);
                debug_assert!(accepted, "granted fetch channel must be ready");
            }
        }
    }

    fn issue_data_requests(&mut self) {
        let lanes_per_core = self.params.threads_per_block;
        let mut pending: SmallVec<[(usize, LaneRequest); 8]> = SmallVec::new();
        for (core_id, core) in self.cores.iter().enumerate() {
            for (lane, request) in core.lane_requests() {
                let requester = core_id * lanes_per_core + lane;
                if self.data_arbiter.channel_of(requester).is_none() {
                    pending.push((requester, request));
                }
            }
        }

        let ids: SmallVec<[usize; 8]> = pending.iter().map(|(id, _)| *id).collect();
        for (channel, requester) in self.data_arbiter.arbitrate(&ids) {
            if let Some((_, request)) = pending.iter().find(|(id, _)| *id == requester) {
                let accepted = match *request {
                    LaneRequest::Read { addr } => self.data_mem.accept_read(channel, addr),
                    LaneRequest::Write { addr, value } => {
                        self.data_mem.accept_write(channel, addr, value)
                    }
                };
                debug_assert!(accepted, "granted data channel must be ready");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::asm::assemble;

    fn gpu() -> Gpu {
        Gpu::new(DeviceParams::default()).expect("reference parameters are valid")
    }

    fn load_asm(gpu: &mut Gpu, source: &str) {
        let words = assemble(source).expect("fixture assembles");
        assert!(gpu.program_mem_mut().load(0, &words));
    }

    // Every lane stores its global index i = blockIdx*blockDim+threadIdx
    // to address 32+i.
    const STORE_INDEX: &str = "\
        MUL R0, %blockIdx, %blockDim\n\
        ADD R0, R0, %threadIdx\n\
        CONST R1, #32\n\
        ADD R1, R1, R0\n\
        STR R1, R0\n\
        RET\n";

    #[test]
    fn test_store_index_kernel() {
        let mut g = gpu();
        load_asm(&mut g, STORE_INDEX);
        g.configure(8).unwrap();
        g.launch().unwrap();

        let cycles = g.run_to_done(1_000).unwrap();
        assert!(g.done());
        assert!(cycles > 0);
        assert_eq!(
            g.data_mem().read_range(32, 8),
            vec![0, 1, 2, 3, 4, 5, 6, 7]
        );

        let stats = g.stats();
        assert_eq!(stats.blocks_completed, 2);
        // 6 instructions per block.
        assert_eq!(stats.instructions, 12);
    }

    #[test]
    fn test_done_not_asserted_early() {
        let mut g = gpu();
        load_asm(&mut g, STORE_INDEX);
        g.configure(8).unwrap();
        g.launch().unwrap();

        g.step();
        assert!(!g.done());
    }

    #[test]
    fn test_wire_writes_ignored_while_active() {
        let mut g = gpu();
        load_asm(&mut g, STORE_INDEX);
        g.write_thread_count(8);
        g.start();
        g.step();

        // Mid-launch register write and start pulse are both ignored.
        g.write_thread_count(3);
        g.start();
        assert_eq!(g.dispatcher.configured_thread_count(), Some(8));
        assert_eq!(g.dispatcher.block_count(), 2);

        g.run_to_done(1_000).unwrap();
        assert_eq!(
            g.data_mem().read_range(32, 8),
            vec![0, 1, 2, 3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn test_start_without_configure_is_inert() {
        let mut g = gpu();
        g.start();
        assert!(!g.dispatcher.is_active());
        g.step();
        assert!(!g.done());
    }

    #[test]
    fn test_reset_during_launch() {
        let mut g = gpu();
        load_asm(&mut g, STORE_INDEX);
        g.configure(8).unwrap();
        g.launch().unwrap();
        for _ in 0..5 {
            g.step();
        }

        g.reset();
        assert!(!g.done());
        assert_eq!(g.cycle(), 0);

        // Fresh configure + launch completes with no residual state.
        g.configure(4).unwrap();
        g.launch().unwrap();
        g.run_to_done(1_000).unwrap();
        assert_eq!(g.data_mem().read_range(32, 4), vec![0, 1, 2, 3]);
        assert_eq!(g.stats().blocks_completed, 1);
    }

    #[test]
    fn test_cycle_budget_error() {
        let mut g = gpu();
        // Program memory is all zeros: NOPs forever, no RET.
        g.configure(1).unwrap();
        g.launch().unwrap();
        assert_eq!(g.run_to_done(500), Err(RunError::CycleBudget(500)));
        assert!(!g.done());
    }

    #[test]
    fn test_single_program_channel_serializes_fetches() {
        let mut g = gpu();
        load_asm(&mut g, STORE_INDEX);
        g.configure(8).unwrap();
        g.launch().unwrap();
        g.run_to_done(1_000).unwrap();

        let stats = g.stats();
        // Both cores fetched through one channel; someone had to wait.
        assert!(stats.fetch.deferred > 0);
        assert_eq!(stats.fetch.grants, 12);
    }

    #[test]
    fn test_higher_latency_same_results() {
        let params = DeviceParams {
            memory_latency: 4,
            ..DeviceParams::default()
        };
        let mut g = Gpu::new(params).unwrap();
        load_asm(&mut g, STORE_INDEX);
        g.configure(8).unwrap();
        g.launch().unwrap();

        let slow_cycles = g.run_to_done(5_000).unwrap();
        assert_eq!(
            g.data_mem().read_range(32, 8),
            vec![0, 1, 2, 3, 4, 5, 6, 7]
        );

        let mut fast = gpu();
        load_asm(&mut fast, STORE_INDEX);
        fast.configure(8).unwrap();
        fast.launch().unwrap();
        let fast_cycles = fast.run_to_done(5_000).unwrap();
        assert!(slow_cycles > fast_cycles);
    }

    #[test]
    fn test_relaunch_after_done() {
        let mut g = gpu();
        load_asm(&mut g, STORE_INDEX);
        g.configure(8).unwrap();
        g.launch().unwrap();
        g.run_to_done(1_000).unwrap();

        // Done clears on the next launch; the latch is reused.
        g.launch().unwrap();
        assert!(!g.done());
        g.run_to_done(1_000).unwrap();
        assert!(g.done());
        assert_eq!(g.stats().blocks_completed, 4);
    }

    #[test]
    fn test_rejected_params() {
        let params = DeviceParams {
            num_cores: 0,
            ..DeviceParams::default()
        };
        assert!(Gpu::new(params).is_err());
    }
}
