//! Trap causes and the unified trap-delivery epilogue.
//!
//! The reference engine internally biases cause codes by one so a zero
//! value can mean "no trap", then undoes the bias in its delivery
//! epilogue. This implementation centralizes on architectural cause
//! values throughout instead, since dispatch here already returns a
//! distinct `Trap` variant rather than overloading a plain integer.

use crate::state::{ProcessorState, MSTATUS_MPIE, PRIV_MACHINE};

/// A synchronous exception or the one asynchronous interrupt this engine
/// recognizes (the machine timer interrupt). Collapsed into a single enum
/// since this engine never needs to pattern-match "any interrupt"
/// separately from "any exception".
#[derive(Debug, Clone, Copy)]
pub enum Trap {
    InstructionAddressMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadAccessFault { addr: u32 },
    StoreAccessFault { addr: u32 },
    EnvironmentCallFromUMode,
    EnvironmentCallFromMMode,
    TimerInterrupt,
}

impl Trap {
    /// The value to store in `mcause`, interrupt bit included.
    pub fn mcause(&self) -> u32 {
        match self {
            Trap::InstructionAddressMisaligned => 0,
            Trap::InstructionAccessFault => 1,
            Trap::IllegalInstruction => 2,
            Trap::Breakpoint => 3,
            Trap::LoadAccessFault { .. } => 5,
            Trap::StoreAccessFault { .. } => 7,
            Trap::EnvironmentCallFromUMode => 8,
            Trap::EnvironmentCallFromMMode => 11,
            Trap::TimerInterrupt => 0x8000_0007,
        }
    }

    /// The value to store in `mtval`: the faulting address for an
    /// access fault, the faulting `pc` for every other synchronous
    /// exception, and zero for the timer interrupt.
    fn mtval(&self, faulting_pc: u32) -> u32 {
        match self {
            Trap::LoadAccessFault { addr } | Trap::StoreAccessFault { addr } => *addr,
            Trap::TimerInterrupt => 0,
            _ => faulting_pc,
        }
    }
}

/// Deliver `trap`, occurring while `pc` held `faulting_pc`. Mutates CSR
/// and privilege state and returns the new `pc` (`mtvec`), already final
/// — the caller does not add anything further to it, unlike the
/// reference engine's shared `+4` writeback trick.
pub fn deliver(state: &mut ProcessorState, trap: Trap, faulting_pc: u32) -> u32 {
    state.mcause = trap.mcause();
    state.mtval = trap.mtval(faulting_pc);
    state.mepc = faulting_pc;

    let prior_mie = state.mie_enabled();
    let prior_priv = state.privilege();

    // Rebuilt from scratch, not masked: any other mstatus bit a guest set
    // is dropped on trap entry rather than surviving untouched.
    state.mstatus = (if prior_mie { MSTATUS_MPIE } else { 0 }) | (prior_priv << 11);
    state.set_privilege(PRIV_MACHINE);

    state.mtvec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MSTATUS_MIE;

    #[test]
    fn illegal_instruction_sets_mcause_mtval_mepc_and_redirects_pc() {
        let mut state = ProcessorState::default();
        state.mtvec = 0x8000_1000;
        state.mstatus |= MSTATUS_MIE;
        state.set_privilege(PRIV_MACHINE);

        let new_pc = deliver(&mut state, Trap::IllegalInstruction, 0x8000_0040);
        assert_eq!(new_pc, 0x8000_1000);
        assert_eq!(state.mcause, 2);
        assert_eq!(state.mtval, 0x8000_0040);
        assert_eq!(state.mepc, 0x8000_0040);
        assert!(!state.mie_enabled());
        assert!(state.mpie());
        assert_eq!(state.privilege(), PRIV_MACHINE);
    }

    #[test]
    fn access_fault_reports_address_in_mtval() {
        let mut state = ProcessorState::default();
        deliver(
            &mut state,
            Trap::StoreAccessFault { addr: 0x2000_0000 },
            0x8000_0010,
        );
        assert_eq!(state.mtval, 0x2000_0000);
        assert_eq!(state.mcause, 7);
    }

    #[test]
    fn timer_interrupt_sets_top_bit_and_zero_mtval() {
        let mut state = ProcessorState::default();
        let new_pc = deliver(&mut state, Trap::TimerInterrupt, 0x8000_0100);
        assert_eq!(state.mcause, 0x8000_0007);
        assert_eq!(state.mtval, 0);
        assert_eq!(state.mepc, 0x8000_0100);
        assert_eq!(new_pc, state.mtvec);
    }

    #[test]
    fn trap_entry_clears_unrelated_mstatus_bits() {
        let mut state = ProcessorState::default();
        state.mstatus |= MSTATUS_MIE | (1 << 20);
        state.set_privilege(PRIV_MACHINE);

        deliver(&mut state, Trap::IllegalInstruction, 0x8000_0040);
        assert_eq!(state.mstatus, MSTATUS_MPIE | (PRIV_MACHINE << 11));
    }
}
