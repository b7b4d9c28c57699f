//! Test support: kernel fixtures and an end-to-end run harness.
//!
//! [`KernelRunner`] wraps the assemble → load → configure → launch →
//! run-to-done sequence so integration tests read as scenarios. The
//! reference kernel here is element-wise vector addition:
//! `C[i] = A[i] + B[i]` with A at addresses 0..8, B at 8..16 and C at
//! 16..24.

use crate::device::params::DeviceParams;
use crate::emu::gpu::{Gpu, RunError, RunStats};
use crate::isa::asm::{assemble, AsmError};

/// Element-wise vector addition over eight elements.
///
/// Each lane computes its global index, loads one element of A and one of
/// B, and stores the sum into C.
pub const VECADD_KERNEL: &str = "\
    ; i = blockIdx * blockDim + threadIdx
    MUL R3, %blockIdx, %blockDim
    ADD R3, R3, %threadIdx
    CONST R0, #0          ; A base
    CONST R1, #8          ; B base
    CONST R2, #16         ; C base
    ADD R4, R0, R3
    LDR R4, R4            ; A[i]
    ADD R5, R1, R3
    LDR R5, R5            ; B[i]
    ADD R6, R4, R5
    ADD R7, R2, R3
    STR R7, R6            ; C[i] = A[i] + B[i]
    RET
";

/// End-to-end harness around a [`Gpu`].
pub struct KernelRunner {
    gpu: Gpu,
    max_cycles: u64,
}

impl KernelRunner {
    /// Harness over the reference device build.
    pub fn new() -> Self {
        Self::with_params(DeviceParams::default())
    }

    /// Harness over a custom device build.
    ///
    /// Panics on invalid parameters; harness callers pass fixed builds.
    pub fn with_params(params: DeviceParams) -> Self {
        let gpu = match Gpu::new(params) {
            Ok(gpu) => gpu,
            Err(err) => panic!("invalid harness device parameters: {}", err),
        };
        Self {
            gpu,
            max_cycles: 100_000,
        }
    }

    /// Override the cycle budget.
    pub fn max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Assemble `source` and load it at program address 0.
    pub fn load_program(&mut self, source: &str) -> Result<(), AsmError> {
        let words = assemble(source)?;
        self.gpu.program_mem_mut().load(0, &words);
        Ok(())
    }

    /// Load data-memory contents at `base`.
    pub fn load_data(&mut self, base: u8, values: &[u8]) {
        self.gpu.data_mem_mut().load(base, values);
    }

    /// Configure, launch and run `threads` to completion.
    pub fn run(&mut self, threads: u8) -> Result<RunStats, RunError> {
        // Harness programs are fixtures; a rejected configure/launch is a
        // broken test, not a scenario.
        if let Err(err) = self.gpu.configure(threads) {
            panic!("harness configure failed: {}", err);
        }
        if let Err(err) = self.gpu.launch() {
            panic!("harness launch failed: {}", err);
        }
        self.gpu.run_to_done(self.max_cycles)?;
        Ok(self.gpu.stats())
    }

    /// Inspect final data-memory contents.
    pub fn data(&self, base: u8, len: usize) -> Vec<u8> {
        self.gpu.data_mem().read_range(base, len)
    }

    /// Access the device directly.
    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut Gpu {
        &mut self.gpu
    }
}

impl Default for KernelRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vecadd_runner() -> KernelRunner {
        let mut runner = KernelRunner::new();
        runner.load_program(VECADD_KERNEL).expect("kernel assembles");
        runner.load_data(0, &[0, 1, 2, 3, 4, 5, 6, 7]); // A
        runner.load_data(8, &[0, 1, 2, 3, 4, 5, 6, 7]); // B
        runner
    }

    #[test]
    fn test_vecadd_reference_result() {
        let mut runner = vecadd_runner();
        let stats = runner.run(8).unwrap();

        assert_eq!(runner.data(16, 8), vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert_eq!(stats.blocks_completed, 2);
        // 13 instructions per block, both blocks fully retired.
        assert_eq!(stats.instructions, 26);
    }

    #[test]
    fn test_vecadd_inputs_untouched() {
        let mut runner = vecadd_runner();
        runner.run(8).unwrap();
        assert_eq!(runner.data(0, 8), vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(runner.data(8, 8), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_partial_final_block() {
        let mut runner = vecadd_runner();
        let stats = runner.run(6).unwrap();

        // Six lanes ran; the clipped block's inactive lanes wrote nothing.
        assert_eq!(runner.data(16, 6), vec![0, 2, 4, 6, 8, 10]);
        assert_eq!(runner.data(22, 2), vec![0, 0]);
        assert_eq!(stats.blocks_completed, 2);
        // 13 instructions per block regardless of lane count.
        assert_eq!(stats.instructions, 26);
    }

    #[test]
    fn test_single_partial_block() {
        let mut runner = vecadd_runner();
        let stats = runner.run(3).unwrap();

        assert_eq!(runner.data(16, 3), vec![0, 2, 4]);
        assert_eq!(runner.data(19, 5), vec![0, 0, 0, 0, 0]);
        assert_eq!(stats.blocks_completed, 1);
    }

    #[test]
    fn test_more_blocks_than_cores() {
        // Single-core build: the two blocks run back-to-back.
        let mut runner = KernelRunner::with_params(DeviceParams {
            num_cores: 1,
            ..DeviceParams::default()
        });
        runner.load_program(VECADD_KERNEL).unwrap();
        runner.load_data(0, &[0, 1, 2, 3, 4, 5, 6, 7]);
        runner.load_data(8, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let stats = runner.run(8).unwrap();

        assert_eq!(runner.data(16, 8), vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert_eq!(stats.blocks_completed, 2);
    }

    #[test]
    fn test_every_block_runs_exactly_once() {
        // 13 threads over 4-lane blocks: blocks 0..4, the last clipped to
        // one lane. The store-index kernel makes each lane mark its
        // global index, so every cell proves its block ran exactly once.
        let mut runner = KernelRunner::new();
        runner
            .load_program(
                "MUL R0, %blockIdx, %blockDim\n\
                 ADD R0, R0, %threadIdx\n\
                 CONST R1, #64\n\
                 ADD R1, R1, R0\n\
                 CONST R2, #1\n\
                 LDR R3, R1\n\
                 ADD R3, R3, R2\n\
                 STR R1, R3\n\
                 RET\n",
            )
            .unwrap();
        let stats = runner.run(13).unwrap();

        // Each touched cell incremented exactly once.
        assert_eq!(runner.data(64, 13), vec![1; 13]);
        assert_eq!(runner.data(77, 3), vec![0, 0, 0]);
        assert_eq!(stats.blocks_completed, 4);
    }

    #[test]
    fn test_contended_data_channels() {
        // One data channel for eight concurrently loading lanes: heavy
        // contention, same final results.
        let mut runner = KernelRunner::with_params(DeviceParams {
            data_mem_channels: 1,
            ..DeviceParams::default()
        });
        runner.load_program(VECADD_KERNEL).unwrap();
        runner.load_data(0, &[0, 1, 2, 3, 4, 5, 6, 7]);
        runner.load_data(8, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let stats = runner.run(8).unwrap();

        assert_eq!(runner.data(16, 8), vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert!(stats.data.deferred > 0);
    }

    #[test]
    fn test_latency_stretches_runtime_not_results() {
        let mut slow = KernelRunner::with_params(DeviceParams {
            memory_latency: 5,
            ..DeviceParams::default()
        });
        slow.load_program(VECADD_KERNEL).unwrap();
        slow.load_data(0, &[0, 1, 2, 3, 4, 5, 6, 7]);
        slow.load_data(8, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let slow_stats = slow.run(8).unwrap();

        let mut fast = vecadd_runner();
        let fast_stats = fast.run(8).unwrap();

        assert_eq!(slow.data(16, 8), fast.data(16, 8));
        assert!(slow_stats.cycles > fast_stats.cycles);
    }
}
