//! The fetch-decode-execute-writeback loop and timer/interrupt
//! arbitration, tying together [`crate::decode`], [`crate::csr`],
//! [`crate::rv32a`], and [`crate::trap`] into the single [`step`] entry
//! point.

use crate::csr;
use crate::decode::{
    decode_btype, decode_itype, decode_jtype, decode_rtype, decode_stype, decode_utype, funct3,
    funct5, opcode, sign_extend, Rtype,
};
use crate::memory::{self, GuestMemory, HostBus, StoreOutcome, Wordsize};
use crate::opcodes::*;
use crate::rv32a;
use crate::state::{ProcessorState, MIE_MTIE, MIP_MTIP, PRIV_USER};
use crate::trap::{self, Trap};

/// The three outcomes a `step` call can produce, given their own type
/// rather than left as a bare `u32` so callers can't mix up a
/// termination code with a plain retirement count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Budget exhausted or a trap was delivered; nothing further to report.
    Continued,
    /// The hart entered (or remained in) wait-for-interrupt with no
    /// instruction retired this call.
    WaitingForInterrupt,
    /// A store reached the SYSCON address; carries the stored value for
    /// the host to interpret as a termination code.
    SystemControl(u32),
}

/// Advance `state` by at most `count` instructions against `ram`,
/// routing MMIO and CSR-extension hooks through `bus`. `elapsed_us` is
/// added to the architectural timer before anything else happens.
/// `v_proc_address` is opaque to the engine; it is forwarded verbatim
/// to `bus` so a host serving several guests can tell them apart.
pub fn step(
    state: &mut ProcessorState,
    ram: &mut GuestMemory,
    bus: &mut impl HostBus,
    v_proc_address: u32,
    elapsed_us: u32,
    count: u32,
) -> StepOutcome {
    arbitrate_timer(state, elapsed_us);
    if state.wfi() {
        return StepOutcome::WaitingForInterrupt;
    }

    let mut retired = 0u32;
    if timer_interrupt_pending(state) {
        let new_pc = trap::deliver(state, Trap::TimerInterrupt, state.pc);
        state.pc = new_pc;
        state.increment_cycle();
        retired += 1;
    }

    while retired < count {
        match execute_one(state, ram, bus, v_proc_address) {
            Retirement::Continue => {}
            Retirement::EnterWfi => {
                retired += 1;
                return StepOutcome::WaitingForInterrupt;
            }
            Retirement::SystemControl(code) => {
                retired += 1;
                return StepOutcome::SystemControl(code);
            }
        }
        retired += 1;
    }
    StepOutcome::Continued
}

/// Advance the 64-bit timer and latch or clear the
/// timer-interrupt-pending bit.
fn arbitrate_timer(state: &mut ProcessorState, elapsed_us: u32) {
    let timer = state.timer().wrapping_add(u64::from(elapsed_us));
    state.set_timer(timer);

    let fire = timer > state.timermatch() && state.timermatch() != 0;
    if fire {
        state.set_wfi(false);
        state.mip |= MIP_MTIP;
    } else {
        state.mip &= !MIP_MTIP;
    }
}

/// Whether a timer interrupt is pending, enabled, and globally
/// unmasked.
fn timer_interrupt_pending(state: &ProcessorState) -> bool {
    state.mip & MIP_MTIP != 0 && state.mie & MIE_MTIE != 0 && state.mie_enabled()
}

/// What happened to the instruction budget after one retirement.
enum Retirement {
    Continue,
    EnterWfi,
    SystemControl(u32),
}

/// Fetch, decode, execute, and write back exactly one instruction (or
/// the trap it raises).
fn execute_one(
    state: &mut ProcessorState,
    ram: &mut GuestMemory,
    bus: &mut impl HostBus,
    v_proc_address: u32,
) -> Retirement {
    let pc = state.pc;
    let ofs = pc.wrapping_sub(ram.base());

    if !ram.offset_in_bounds(ofs) {
        return retire_trap(state, Trap::InstructionAccessFault, pc);
    }
    if ofs & 3 != 0 {
        return retire_trap(state, Trap::InstructionAddressMisaligned, pc);
    }
    let ir = ram.read_ram(ofs, Wordsize::Word);

    match dispatch(state, ram, bus, v_proc_address, ir, pc) {
        Outcome::Writeback { rd, rval, next_pc } => {
            state.regs.write(rd, rval);
            state.pc = next_pc;
            state.increment_cycle();
            Retirement::Continue
        }
        Outcome::NoWriteback { next_pc } => {
            state.pc = next_pc;
            state.increment_cycle();
            Retirement::Continue
        }
        Outcome::Wfi { next_pc } => {
            state.set_mie(true);
            state.set_wfi(true);
            state.pc = next_pc;
            state.increment_cycle();
            Retirement::EnterWfi
        }
        Outcome::SystemControl(code) => {
            state.pc = pc.wrapping_add(4);
            state.increment_cycle();
            Retirement::SystemControl(code)
        }
        Outcome::Trap(trap) => retire_trap(state, trap, pc),
    }
}

fn retire_trap(state: &mut ProcessorState, trap: Trap, faulting_pc: u32) -> Retirement {
    let new_pc = trap::deliver(state, trap, faulting_pc);
    state.pc = new_pc;
    state.increment_cycle();
    Retirement::Continue
}

/// The result of decoding and executing one instruction, before the
/// register writeback / `pc` update common to every opcode is applied.
enum Outcome {
    Writeback { rd: u32, rval: u32, next_pc: u32 },
    NoWriteback { next_pc: u32 },
    Wfi { next_pc: u32 },
    SystemControl(u32),
    Trap(Trap),
}

fn dispatch(
    state: &mut ProcessorState,
    ram: &mut GuestMemory,
    bus: &mut impl HostBus,
    v_proc_address: u32,
    ir: u32,
    pc: u32,
) -> Outcome {
    match opcode(ir) {
        OP_LUI => {
            let u = decode_utype(ir);
            Outcome::Writeback {
                rd: u.rd,
                rval: u.imm,
                next_pc: pc.wrapping_add(4),
            }
        }
        OP_AUIPC => {
            let u = decode_utype(ir);
            Outcome::Writeback {
                rd: u.rd,
                rval: pc.wrapping_add(u.imm),
                next_pc: pc.wrapping_add(4),
            }
        }
        OP_JAL => {
            let j = decode_jtype(ir);
            let offset = sign_extend(j.imm, 21);
            Outcome::Writeback {
                rd: j.rd,
                rval: pc.wrapping_add(4),
                next_pc: pc.wrapping_add(offset),
            }
        }
        OP_JALR => {
            let i = decode_itype(ir);
            let base = state.regs.read(i.rs1);
            let target = base.wrapping_add(sign_extend(i.imm, 12)) & !1;
            Outcome::Writeback {
                rd: i.rd,
                rval: pc.wrapping_add(4),
                next_pc: target,
            }
        }
        OP_BRANCH => execute_branch(state, ir, pc),
        OP_LOAD => execute_load(state, ram, bus, v_proc_address, ir, pc),
        OP_STORE => execute_store(state, ram, bus, v_proc_address, ir, pc),
        OP_IMM => execute_op_imm(state, ir, pc),
        OP_OP => execute_op(state, ir, pc),
        OP_FENCE => Outcome::NoWriteback {
            next_pc: pc.wrapping_add(4),
        },
        OP_AMO => execute_amo(state, ram, ir, pc),
        OP_SYSTEM => execute_system(state, bus, ir, pc),
        _ => Outcome::Trap(Trap::IllegalInstruction),
    }
}

fn execute_branch(state: &ProcessorState, ir: u32, pc: u32) -> Outcome {
    let b = decode_btype(ir);
    let a = state.regs.read(b.rs1);
    let c = state.regs.read(b.rs2);
    let taken = match funct3(ir) {
        FUNCT3_BEQ => a == c,
        FUNCT3_BNE => a != c,
        FUNCT3_BLT => (a as i32) < (c as i32),
        FUNCT3_BGE => (a as i32) >= (c as i32),
        FUNCT3_BLTU => a < c,
        FUNCT3_BGEU => a >= c,
        _ => return Outcome::Trap(Trap::IllegalInstruction),
    };
    let next_pc = if taken {
        pc.wrapping_add(sign_extend(b.imm, 13))
    } else {
        pc.wrapping_add(4)
    };
    Outcome::NoWriteback { next_pc }
}

fn execute_load(
    state: &mut ProcessorState,
    ram: &mut GuestMemory,
    bus: &mut impl HostBus,
    v_proc_address: u32,
    ir: u32,
    pc: u32,
) -> Outcome {
    let i = decode_itype(ir);
    let width = match funct3(ir) {
        FUNCT3_B | FUNCT3_BU => Wordsize::Byte,
        FUNCT3_H | FUNCT3_HU => Wordsize::Halfword,
        FUNCT3_W => Wordsize::Word,
        _ => return Outcome::Trap(Trap::IllegalInstruction),
    };
    let ea = state
        .regs
        .read(i.rs1)
        .wrapping_add(sign_extend(i.imm, 12));

    let raw = match memory::load(state, ram, bus, v_proc_address, ea, width) {
        Ok(value) => value,
        Err(fault) => return Outcome::Trap(Trap::LoadAccessFault { addr: fault.addr }),
    };
    let rval = match funct3(ir) {
        FUNCT3_B => sign_extend(raw, 8),
        FUNCT3_H => sign_extend(raw, 16),
        _ => raw,
    };
    Outcome::Writeback {
        rd: i.rd,
        rval,
        next_pc: pc.wrapping_add(4),
    }
}

fn execute_store(
    state: &mut ProcessorState,
    ram: &mut GuestMemory,
    bus: &mut impl HostBus,
    v_proc_address: u32,
    ir: u32,
    pc: u32,
) -> Outcome {
    let s = decode_stype(ir);
    let width = match funct3(ir) {
        FUNCT3_B => Wordsize::Byte,
        FUNCT3_H => Wordsize::Halfword,
        FUNCT3_W => Wordsize::Word,
        _ => return Outcome::Trap(Trap::IllegalInstruction),
    };
    let ea = state
        .regs
        .read(s.rs1)
        .wrapping_add(sign_extend(s.imm, 12));
    let value = state.regs.read(s.rs2);

    match memory::store(state, ram, bus, v_proc_address, ea, value, width) {
        Ok(StoreOutcome::Completed) => Outcome::NoWriteback {
            next_pc: pc.wrapping_add(4),
        },
        Ok(StoreOutcome::SystemControl(code)) => Outcome::SystemControl(code),
        Err(fault) => Outcome::Trap(Trap::StoreAccessFault { addr: fault.addr }),
    }
}

/// ADD/SUB, SLL, SLT, SLTU, XOR, SRL/SRA, OR, AND over two already
/// sign-extended-as-needed 32-bit operands. Shared between OP-IMM and
/// OP; `alt` selects SUB over ADD and SRA over SRL.
fn alu(funct3: u32, a: u32, b: u32, alt: bool) -> u32 {
    match funct3 {
        FUNCT3_ADD_SUB => {
            if alt {
                a.wrapping_sub(b)
            } else {
                a.wrapping_add(b)
            }
        }
        FUNCT3_SLL => a.wrapping_shl(b & 0x1f),
        FUNCT3_SLT => ((a as i32) < (b as i32)) as u32,
        FUNCT3_SLTU => (a < b) as u32,
        FUNCT3_XOR => a ^ b,
        FUNCT3_SRL_SRA => {
            if alt {
                ((a as i32) >> (b & 0x1f)) as u32
            } else {
                a.wrapping_shr(b & 0x1f)
            }
        }
        FUNCT3_OR => a | b,
        FUNCT3_AND => a & b,
        _ => unreachable!("funct3 is a 3-bit field; all eight values are handled above"),
    }
}

fn execute_op_imm(state: &ProcessorState, ir: u32, pc: u32) -> Outcome {
    let i = decode_itype(ir);
    let a = state.regs.read(i.rs1);
    let imm = sign_extend(i.imm, 12);
    let f3 = funct3(ir);
    // OP-IMM has no SUBI: bit 30 only changes SRLI into SRAI, matching
    // the standard immediate-shift encoding; ADDI always adds.
    let alt = f3 == FUNCT3_SRL_SRA && (ir & BIT30_ALT != 0);
    Outcome::Writeback {
        rd: i.rd,
        rval: alu(f3, a, imm, alt),
        next_pc: pc.wrapping_add(4),
    }
}

fn execute_op(state: &ProcessorState, ir: u32, pc: u32) -> Outcome {
    let r = decode_rtype(ir);
    let a = state.regs.read(r.rs1);
    let b = state.regs.read(r.rs2);
    let f3 = funct3(ir);
    let rval = if ir & BIT25_MULDIV != 0 {
        muldiv(f3, a, b)
    } else {
        alu(f3, a, b, ir & BIT30_ALT != 0)
    };
    Outcome::Writeback {
        rd: r.rd,
        rval,
        next_pc: pc.wrapping_add(4),
    }
}

/// RV32M: MUL/MULH/MULHSU/MULHU/DIV/DIVU/REM/REMU with the
/// architectural division-by-zero and signed-overflow results.
fn muldiv(funct3: u32, a: u32, b: u32) -> u32 {
    match funct3 {
        FUNCT3_MUL => a.wrapping_mul(b),
        FUNCT3_MULH => (((a as i32 as i64).wrapping_mul(b as i32 as i64)) >> 32) as u32,
        FUNCT3_MULHSU => (((a as i32 as i64).wrapping_mul(b as u64 as i64)) >> 32) as u32,
        FUNCT3_MULHU => (((a as u64).wrapping_mul(b as u64)) >> 32) as u32,
        FUNCT3_DIV => {
            let (a, b) = (a as i32, b as i32);
            if b == 0 {
                0xffff_ffff
            } else if a == i32::MIN && b == -1 {
                a as u32
            } else {
                a.wrapping_div(b) as u32
            }
        }
        FUNCT3_DIVU => {
            if b == 0 {
                0xffff_ffff
            } else {
                a / b
            }
        }
        FUNCT3_REM => {
            let (a, b) = (a as i32, b as i32);
            if b == 0 {
                a as u32
            } else if a == i32::MIN && b == -1 {
                0
            } else {
                a.wrapping_rem(b) as u32
            }
        }
        FUNCT3_REMU => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
        _ => unreachable!("funct3 is a 3-bit field; all eight values are handled above"),
    }
}

fn execute_amo(state: &mut ProcessorState, ram: &mut GuestMemory, ir: u32, pc: u32) -> Outcome {
    if !rv32a::is_known_funct5(funct5(ir)) {
        return Outcome::Trap(Trap::IllegalInstruction);
    }
    let Rtype { rd: rd_idx, .. } = decode_rtype(ir);
    match rv32a::execute(state, ram, ir) {
        Ok(rval) => Outcome::Writeback {
            rd: rd_idx,
            rval,
            next_pc: pc.wrapping_add(4),
        },
        Err(fault) => Outcome::Trap(Trap::StoreAccessFault { addr: fault.addr }),
    }
}

fn execute_system(state: &mut ProcessorState, bus: &mut impl HostBus, ir: u32, pc: u32) -> Outcome {
    match funct3(ir) {
        FUNCT3_PRIV => execute_priv(state, ir, pc),
        FUNCT3_CSRRW | FUNCT3_CSRRS | FUNCT3_CSRRC | FUNCT3_CSRRWI | FUNCT3_CSRRSI
        | FUNCT3_CSRRCI => execute_zicsr(state, bus, ir, pc),
        _ => Outcome::Trap(Trap::IllegalInstruction),
    }
}

fn execute_priv(state: &mut ProcessorState, ir: u32, pc: u32) -> Outcome {
    let csrno = ir >> 20;
    match csrno {
        PRIV_ECALL => Outcome::Trap(if state.privilege() == PRIV_USER {
            Trap::EnvironmentCallFromUMode
        } else {
            Trap::EnvironmentCallFromMMode
        }),
        PRIV_EBREAK => Outcome::Trap(Trap::Breakpoint),
        PRIV_MRET => {
            let prior_mpie = state.mpie();
            let prior_mpp = state.mpp();
            state.set_mie(prior_mpie);
            state.mstatus |= crate::state::MSTATUS_MPIE;
            state.mstatus &= !(0x3 << 11);
            state.set_privilege(prior_mpp);
            Outcome::NoWriteback { next_pc: state.mepc }
        }
        PRIV_WFI => Outcome::Wfi {
            next_pc: pc.wrapping_add(4),
        },
        _ => Outcome::Trap(Trap::IllegalInstruction),
    }
}

fn execute_zicsr(state: &mut ProcessorState, bus: &mut impl HostBus, ir: u32, pc: u32) -> Outcome {
    let i = decode_itype(ir);
    let csrno = i.imm as u16;
    let old = csr::read(state, bus, csrno);
    let src = match funct3(ir) {
        FUNCT3_CSRRW | FUNCT3_CSRRS | FUNCT3_CSRRC => state.regs.read(i.rs1),
        _ => i.rs1,
    };
    let new_value = match funct3(ir) {
        FUNCT3_CSRRW | FUNCT3_CSRRWI => src,
        FUNCT3_CSRRS | FUNCT3_CSRRSI => old | src,
        _ => old & !src,
    };
    csr::write(state, bus, csrno, new_value);
    Outcome::Writeback {
        rd: i.rd,
        rval: old,
        next_pc: pc.wrapping_add(4),
    }
}
