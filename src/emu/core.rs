//! Per-core lock-step execution pipeline.
//!
//! A core runs one thread block at a time. All lanes of the block share a
//! single program counter and execute the same instruction every cycle —
//! there is no divergence support, only a per-lane active mask (lanes past
//! a clipped final block's thread count start inactive and never issue
//! memory requests).
//!
//! Pipeline states:
//!
//! ```text
//! Idle -> Fetching -> Decoding -> Executing -+-> Fetching (next word)
//!  ^                                         |
//!  +--------------- RET ---------------------+
//! ```
//!
//! Fetching and memory-operand execution are the only multi-cycle states:
//! the core holds its request(s) pending until the shared arbiter and the
//! external memory deliver every response, re-offering identical requests
//! each cycle. ALU instructions complete for all active lanes in a single
//! Executing cycle.

use log::trace;
use smallvec::SmallVec;

use super::alu::{self, AluOp};
use super::dispatcher::Block;
use super::regfile::LaneRegisters;
use crate::isa::instruction::Instruction;

/// Pipeline state of a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    /// No block assigned.
    Idle,
    /// Instruction read in flight (or waiting for a channel).
    Fetching,
    /// Splitting the fetched word into fields.
    Decoding,
    /// Executing the decoded instruction, possibly stalled on memory.
    Executing,
}

/// A data-memory request one lane holds pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneRequest {
    Read { addr: u8 },
    Write { addr: u8, value: u8 },
}

/// Per-lane progress through a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneMem {
    Idle,
    ReadPending { addr: u8 },
    ReadDone { value: u8 },
    WritePending { addr: u8, value: u8 },
    WriteAcked,
}

/// One SIMD lane: active flag, registers, and memory-access progress.
#[derive(Debug, Clone)]
pub struct Lane {
    /// Whether this lane participates in the current block.
    pub active: bool,
    /// The lane's register file.
    pub regs: LaneRegisters,
    mem: LaneMem,
}

impl Lane {
    fn inactive() -> Self {
        Self {
            active: false,
            regs: LaneRegisters::new(0, 0, 0),
            mem: LaneMem::Idle,
        }
    }
}

/// One execution core.
#[derive(Debug)]
pub struct Core {
    id: usize,
    threads_per_block: usize,
    state: CoreState,
    block: Option<Block>,
    pc: u8,
    fetched: Option<u16>,
    current: Option<Instruction>,
    lanes: Vec<Lane>,
    retired: Option<u8>,
    instructions: u64,
    blocks_completed: u64,
}

impl Core {
    /// Create an idle core with `threads_per_block` lanes.
    pub fn new(id: usize, threads_per_block: usize) -> Self {
        Self {
            id,
            threads_per_block,
            state: CoreState::Idle,
            block: None,
            pc: 0,
            fetched: None,
            current: None,
            lanes: vec![Lane::inactive(); threads_per_block],
            retired: None,
            instructions: 0,
            blocks_completed: 0,
        }
    }

    /// Return every register and pipeline latch to its power-on value.
    pub fn reset(&mut self) {
        self.state = CoreState::Idle;
        self.block = None;
        self.pc = 0;
        self.fetched = None;
        self.current = None;
        for lane in &mut self.lanes {
            *lane = Lane::inactive();
        }
        self.retired = None;
        self.instructions = 0;
        self.blocks_completed = 0;
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> CoreState {
        self.state
    }

    pub fn pc(&self) -> u8 {
        self.pc
    }

    pub fn is_idle(&self) -> bool {
        self.state == CoreState::Idle
    }

    /// The block currently assigned, if any.
    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    /// The core's lanes, for inspection.
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Instructions retired since reset, across all blocks.
    pub fn instructions_retired(&self) -> u64 {
        self.instructions
    }

    /// Blocks run to completion since reset.
    pub fn blocks_completed(&self) -> u64 {
        self.blocks_completed
    }

    /// Begin executing `block`. The lane identities (blockIdx, blockDim,
    /// threadIdx) are fixed here and stay constant until the block
    /// retires; lanes at or past the block's thread count stay inactive.
    pub fn assign(&mut self, block: Block) {
        debug_assert!(self.is_idle(), "assign to a running core");
        self.pc = 0;
        self.fetched = None;
        self.current = None;
        for (i, lane) in self.lanes.iter_mut().enumerate() {
            lane.active = i < block.thread_count as usize;
            lane.regs = LaneRegisters::new(block.id, self.threads_per_block as u8, i as u8);
            lane.mem = LaneMem::Idle;
        }
        trace!(
            "core {}: assigned block {} ({} thread(s))",
            self.id,
            block.id,
            block.thread_count
        );
        self.block = Some(block);
        self.state = CoreState::Fetching;
    }

    /// The instruction-memory read this core is asserting, if any.
    ///
    /// Stable across cycles until the response arrives.
    pub fn fetch_request(&self) -> Option<u8> {
        if self.state == CoreState::Fetching && self.fetched.is_none() {
            Some(self.pc)
        } else {
            None
        }
    }

    /// Deliver the instruction-memory response.
    pub fn complete_fetch(&mut self, word: u16) {
        debug_assert_eq!(self.state, CoreState::Fetching);
        self.fetched = Some(word);
    }

    /// The data-memory requests the lanes are asserting this cycle, as
    /// `(lane_index, request)` pairs in ascending lane order. Inactive
    /// lanes never appear.
    pub fn lane_requests(&self) -> SmallVec<[(usize, LaneRequest); 4]> {
        let mut requests = SmallVec::new();
        for (i, lane) in self.lanes.iter().enumerate() {
            match lane.mem {
                LaneMem::ReadPending { addr } => requests.push((i, LaneRequest::Read { addr })),
                LaneMem::WritePending { addr, value } => {
                    requests.push((i, LaneRequest::Write { addr, value }))
                }
                _ => {}
            }
        }
        requests
    }

    /// Deliver a data-memory read response to one lane.
    pub fn complete_lane_read(&mut self, lane: usize, value: u8) {
        debug_assert!(matches!(self.lanes[lane].mem, LaneMem::ReadPending { .. }));
        self.lanes[lane].mem = LaneMem::ReadDone { value };
    }

    /// Deliver a data-memory write acknowledgement to one lane.
    pub fn complete_lane_write(&mut self, lane: usize) {
        debug_assert!(matches!(self.lanes[lane].mem, LaneMem::WritePending { .. }));
        self.lanes[lane].mem = LaneMem::WriteAcked;
    }

    /// Report the block retired this cycle, if any. Clears on read.
    pub fn take_retired(&mut self) -> Option<u8> {
        self.retired.take()
    }

    /// Advance the pipeline by one clock edge.
    pub fn step(&mut self) {
        match self.state {
            CoreState::Idle => {}
            CoreState::Fetching => {
                if self.fetched.is_some() {
                    self.state = CoreState::Decoding;
                }
            }
            CoreState::Decoding => {
                if let Some(word) = self.fetched.take() {
                    let inst = Instruction::decode(word);
                    trace!("core {}: pc {:>3} decode {}", self.id, self.pc, inst);
                    // Memory addresses resolve at decode; the requests go
                    // out over the following Executing cycles.
                    match inst {
                        Instruction::Ldr { rs, .. } => {
                            for lane in self.lanes.iter_mut().filter(|l| l.active) {
                                lane.mem = LaneMem::ReadPending {
                                    addr: lane.regs.read(rs),
                                };
                            }
                        }
                        Instruction::Str { rs, rt } => {
                            for lane in self.lanes.iter_mut().filter(|l| l.active) {
                                lane.mem = LaneMem::WritePending {
                                    addr: lane.regs.read(rs),
                                    value: lane.regs.read(rt),
                                };
                            }
                        }
                        _ => {}
                    }
                    self.current = Some(inst);
                    self.state = CoreState::Executing;
                }
            }
            CoreState::Executing => self.execute(),
        }
    }

    fn execute(&mut self) {
        let inst = match self.current {
            Some(inst) => inst,
            None => return,
        };

        match inst {
            Instruction::Nop | Instruction::Reserved { .. } => self.finish_instruction(),

            Instruction::Add { rd, rs, rt } => {
                self.alu_writeback(AluOp::Add, rd, rs, rt);
                self.finish_instruction();
            }
            Instruction::Mul { rd, rs, rt } => {
                self.alu_writeback(AluOp::Mul, rd, rs, rt);
                self.finish_instruction();
            }
            Instruction::Const { rd, imm } => {
                for lane in self.lanes.iter_mut().filter(|l| l.active) {
                    lane.regs.write(rd, imm);
                }
                self.finish_instruction();
            }

            Instruction::Ldr { rd, .. } => {
                let all_done = self
                    .lanes
                    .iter()
                    .filter(|l| l.active)
                    .all(|l| matches!(l.mem, LaneMem::ReadDone { .. }));
                if all_done {
                    for lane in self.lanes.iter_mut().filter(|l| l.active) {
                        if let LaneMem::ReadDone { value } = lane.mem {
                            lane.regs.write(rd, value);
                        }
                        lane.mem = LaneMem::Idle;
                    }
                    self.finish_instruction();
                }
            }
            Instruction::Str { .. } => {
                let all_acked = self
                    .lanes
                    .iter()
                    .filter(|l| l.active)
                    .all(|l| l.mem == LaneMem::WriteAcked);
                if all_acked {
                    for lane in self.lanes.iter_mut().filter(|l| l.active) {
                        lane.mem = LaneMem::Idle;
                    }
                    self.finish_instruction();
                }
            }

            Instruction::Ret => {
                for lane in &mut self.lanes {
                    lane.active = false;
                    lane.mem = LaneMem::Idle;
                }
                if let Some(block) = self.block.take() {
                    trace!("core {}: block {} retired", self.id, block.id);
                    self.retired = Some(block.id);
                }
                self.instructions += 1;
                self.blocks_completed += 1;
                self.current = None;
                self.state = CoreState::Idle;
            }
        }
    }

    fn alu_writeback(&mut self, op: AluOp, rd: u8, rs: u8, rt: u8) {
        for lane in self.lanes.iter_mut().filter(|l| l.active) {
            let a = lane.regs.read(rs);
            let b = lane.regs.read(rt);
            lane.regs.write(rd, alu::execute(op, a, b));
        }
    }

    fn finish_instruction(&mut self) {
        self.current = None;
        self.pc = self.pc.wrapping_add(1);
        self.instructions += 1;
        self.state = CoreState::Fetching;
    }
}
