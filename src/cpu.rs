use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::eval::EvalContext;
use crate::event::StopEvent;
use crate::memory::GuestMemory;
use crate::registers::RegisterFile;
use crate::watchpoint::WatchpointManager;
use crate::{SWord, Word};

// auipc t0,0; sb zero,16(t0); lbu a0,16(t0); ebreak; data
pub const DEFAULT_IMAGE: [Word; 5] = [0x0000_0297, 0x0002_8823, 0x0102_c503, 0x0010_0073, 0xdead_beef];

const EBREAK: Word = 0x0010_0073;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecState {
    Running,
    Stopped,
    Ended,
    Aborted,
}

enum Step {
    Retired,
    Ebreak,
}

pub struct Cpu {
    pub regs: RegisterFile,
    pub memory: GuestMemory,
    state: ExecState,
    interrupt: Arc<AtomicBool>,
}

fn imm_i(inst: Word) -> Word {
    ((inst as SWord) >> 20) as Word
}

fn imm_s(inst: Word) -> Word {
    (((inst as SWord) >> 25) << 5) as Word | ((inst >> 7) & 0x1f)
}

fn imm_b(inst: Word) -> Word {
    let sign = ((inst as SWord) >> 31) as Word;
    (sign << 12) | (((inst >> 7) & 1) << 11) | (((inst >> 25) & 0x3f) << 5) | (((inst >> 8) & 0xf) << 1)
}

fn imm_u(inst: Word) -> Word {
    inst & 0xffff_f000
}

fn imm_j(inst: Word) -> Word {
    let sign = ((inst as SWord) >> 31) as Word;
    (sign << 20) | (inst & 0x000f_f000) | (((inst >> 20) & 1) << 11) | (((inst >> 21) & 0x3ff) << 1)
}

fn sign_extend(value: Word, bits: u32) -> Word {
    (((value << (32 - bits)) as SWord) >> (32 - bits)) as Word
}

fn invalid_instruction(pc: Word, inst: Word) -> anyhow::Error {
    anyhow!("invalid instruction {:#010x} at pc = {:#010x}", inst, pc)
}

impl Cpu {
    pub fn new(memory: GuestMemory) -> Cpu {
        Cpu {
            regs: RegisterFile::new(memory.base()),
            memory,
            state: ExecState::Stopped,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting this flag stops a running `exec` before the next instruction.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn context(&self) -> EvalContext<'_> {
        EvalContext { registers: &self.regs, memory: &self.memory }
    }

    fn step(&mut self) -> Result<Step> {
        let pc = self.regs.pc;
        let inst = self.memory.read(pc, 4)?;
        debug!(pc, inst, "execute");

        let rd = ((inst >> 7) & 0x1f) as usize;
        let funct3 = (inst >> 12) & 0x7;
        let funct7 = inst >> 25;
        let src1 = self.regs.read(((inst >> 15) & 0x1f) as usize);
        let src2 = self.regs.read(((inst >> 20) & 0x1f) as usize);
        let mut next_pc = pc.wrapping_add(4);

        match inst & 0x7f {
            0x37 => self.regs.write(rd, imm_u(inst)),
            0x17 => self.regs.write(rd, pc.wrapping_add(imm_u(inst))),
            0x6f => {
                self.regs.write(rd, next_pc);
                next_pc = pc.wrapping_add(imm_j(inst));
            }
            0x67 if funct3 == 0 => {
                let target = src1.wrapping_add(imm_i(inst)) & !1;
                self.regs.write(rd, next_pc);
                next_pc = target;
            }
            0x63 => {
                let taken = match funct3 {
                    0 => src1 == src2,
                    1 => src1 != src2,
                    4 => (src1 as SWord) < (src2 as SWord),
                    5 => (src1 as SWord) >= (src2 as SWord),
                    6 => src1 < src2,
                    7 => src1 >= src2,
                    _ => return Err(invalid_instruction(pc, inst)),
                };
                if taken {
                    next_pc = pc.wrapping_add(imm_b(inst));
                }
            }
            0x03 => {
                let addr = src1.wrapping_add(imm_i(inst));
                let value = match funct3 {
                    0 => sign_extend(self.memory.read(addr, 1)?, 8),
                    1 => sign_extend(self.memory.read(addr, 2)?, 16),
                    2 => self.memory.read(addr, 4)?,
                    4 => self.memory.read(addr, 1)?,
                    5 => self.memory.read(addr, 2)?,
                    _ => return Err(invalid_instruction(pc, inst)),
                };
                self.regs.write(rd, value);
            }
            0x23 => {
                let addr = src1.wrapping_add(imm_s(inst));
                let len = match funct3 {
                    0 => 1,
                    1 => 2,
                    2 => 4,
                    _ => return Err(invalid_instruction(pc, inst)),
                };
                self.memory.write(addr, len, src2)?;
            }
            0x13 => {
                let imm = imm_i(inst);
                let shamt = imm & 0x1f;
                let value = match (funct3, funct7) {
                    (0, _) => src1.wrapping_add(imm),
                    (2, _) => ((src1 as SWord) < (imm as SWord)) as Word,
                    (3, _) => (src1 < imm) as Word,
                    (4, _) => src1 ^ imm,
                    (6, _) => src1 | imm,
                    (7, _) => src1 & imm,
                    (1, 0x00) => src1 << shamt,
                    (5, 0x00) => src1 >> shamt,
                    (5, 0x20) => ((src1 as SWord) >> shamt) as Word,
                    _ => return Err(invalid_instruction(pc, inst)),
                };
                self.regs.write(rd, value);
            }
            0x33 => {
                let shamt = src2 & 0x1f;
                let value = match (funct3, funct7) {
                    (0, 0x00) => src1.wrapping_add(src2),
                    (0, 0x20) => src1.wrapping_sub(src2),
                    (1, 0x00) => src1 << shamt,
                    (2, 0x00) => ((src1 as SWord) < (src2 as SWord)) as Word,
                    (3, 0x00) => (src1 < src2) as Word,
                    (4, 0x00) => src1 ^ src2,
                    (5, 0x00) => src1 >> shamt,
                    (5, 0x20) => ((src1 as SWord) >> shamt) as Word,
                    (6, 0x00) => src1 | src2,
                    (7, 0x00) => src1 & src2,
                    _ => return Err(invalid_instruction(pc, inst)),
                };
                self.regs.write(rd, value);
            }
            0x73 if inst == EBREAK => return Ok(Step::Ebreak),
            _ => return Err(invalid_instruction(pc, inst)),
        }

        self.regs.pc = next_pc;
        Ok(Step::Retired)
    }

    /// Runs up to `steps` instructions (`None` runs until something stops the machine),
    /// re-checking every watchpoint after each retired instruction.
    pub fn exec(&mut self, steps: Option<u64>, watchpoints: &mut WatchpointManager) -> StopEvent {
        match self.state {
            ExecState::Ended | ExecState::Aborted => return StopEvent::AlreadyEnded,
            _ => self.state = ExecState::Running,
        }
        self.interrupt.store(false, Ordering::SeqCst);

        let mut executed: u64 = 0;
        let event = loop {
            if steps.map_or(false, |n| executed >= n) {
                break StopEvent::StepsDone;
            }
            if self.interrupt.swap(false, Ordering::SeqCst) {
                break StopEvent::Interrupted;
            }

            let pc = self.regs.pc;
            match self.step() {
                Ok(Step::Retired) => {}
                Ok(Step::Ebreak) => {
                    self.state = ExecState::Ended;
                    return StopEvent::Trap { pc, code: self.regs.read(10) };
                }
                Err(e) => {
                    self.state = ExecState::Aborted;
                    return StopEvent::Abort { pc, reason: e.to_string() };
                }
            }
            executed += 1;

            let report = watchpoints.check_all(&self.context());
            for invalid in &report.invalid {
                warn!(id = invalid.id, expr = invalid.expr.as_str(), error = %invalid.error, "Invalid expression");
            }
            if report.triggered() {
                break StopEvent::Watchpoint(report.hits);
            }
        };

        self.state = ExecState::Stopped;
        event
    }
}
