//! RV32A: word-width atomic memory operations.
//!
//! Unlike LOAD/STORE, the effective address here comes straight from
//! `rs1` with no immediate, and the only valid target is RAM: the
//! reference engine never routes an atomic through the MMIO bus, so an
//! atomic aimed at an address that would otherwise be a valid MMIO
//! access still faults with cause 7 (store/AMO access fault).

use crate::decode::{decode_rtype, funct5, Rtype};
use crate::memory::{GuestMemory, Wordsize};
use crate::opcodes::*;
use crate::state::ProcessorState;

/// A RAM-only access fault from an atomic; always maps to cause 7
/// regardless of whether the operation was a load (LR) or a store.
#[derive(Debug, Clone, Copy)]
pub struct AmoAccessFault {
    pub addr: u32,
}

/// Execute the RV32A instruction in `ir` against RAM. Returns the value
/// to write back to `rd`.
pub fn execute(
    state: &mut ProcessorState,
    ram: &mut GuestMemory,
    ir: u32,
) -> Result<u32, AmoAccessFault> {
    let Rtype { rs1, rs2, .. } = decode_rtype(ir);
    let addr = state.regs.read(rs1);
    let rs2_value = state.regs.read(rs2);

    let ofs = addr.wrapping_sub(ram.base());
    if !ram.offset_in_bounds(ofs) {
        return Err(AmoAccessFault { addr });
    }
    let loaded = ram.read_ram(ofs, Wordsize::Word);

    let op = funct5(ir);
    let (rval, store_value) = match op {
        AMO_LR => {
            state.set_reservation(addr >> 3);
            (loaded, None)
        }
        AMO_SC => {
            let reservation_ok = state.reservation() == addr >> 3;
            let store = if reservation_ok { Some(rs2_value) } else { None };
            ((!reservation_ok) as u32, store)
        }
        AMO_SWAP => (loaded, Some(rs2_value)),
        AMO_ADD => (loaded, Some(loaded.wrapping_add(rs2_value))),
        AMO_XOR => (loaded, Some(loaded ^ rs2_value)),
        AMO_AND => (loaded, Some(loaded & rs2_value)),
        AMO_OR => (loaded, Some(loaded | rs2_value)),
        AMO_MIN => (loaded, Some(amo_min(loaded, rs2_value))),
        AMO_MAX => (loaded, Some(amo_max(loaded, rs2_value))),
        AMO_MINU => (loaded, Some(loaded.min(rs2_value))),
        AMO_MAXU => (loaded, Some(loaded.max(rs2_value))),
        _ => unreachable!("caller must reject unknown funct5 via is_known_funct5 before dispatch"),
    };

    if let Some(value) = store_value {
        ram.write_ram(ofs, value, Wordsize::Word);
    }

    Ok(rval)
}

fn amo_min(a: u32, b: u32) -> u32 {
    if (a as i32) < (b as i32) {
        a
    } else {
        b
    }
}

fn amo_max(a: u32, b: u32) -> u32 {
    if (a as i32) > (b as i32) {
        a
    } else {
        b
    }
}

/// Whether `funct5` identifies a supported RV32A operation; anything
/// else is an illegal instruction.
pub fn is_known_funct5(funct5: u32) -> bool {
    matches!(
        funct5,
        AMO_LR | AMO_SC | AMO_SWAP | AMO_ADD | AMO_XOR | AMO_AND | AMO_OR | AMO_MIN | AMO_MAX
            | AMO_MINU | AMO_MAXU
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{rd, rs1, rs2};

    fn encode_amo(funct5: u32, rs1: u32, rs2: u32, rd: u32) -> u32 {
        (funct5 << 27) | (rs2 << 20) | (rs1 << 15) | (0b010 << 12) | (rd << 7) | OP_AMO
    }

    #[test]
    fn lr_sets_reservation_and_does_not_store() {
        let mut state = ProcessorState::default();
        let mut ram = GuestMemory::new(0x8000_0000, 4096).unwrap();
        ram.write_ram(0, 0x1111_1111, Wordsize::Word);
        state.regs.write(1, 0x8000_0000);

        let ir = encode_amo(AMO_LR, 1, 0, 5);
        let rval = execute(&mut state, &mut ram, ir).unwrap();
        assert_eq!(rval, 0x1111_1111);
        assert_eq!(state.reservation(), 0x8000_0000 >> 3);
        assert_eq!(ram.read_ram(0, Wordsize::Word), 0x1111_1111);
    }

    #[test]
    fn sc_succeeds_immediately_after_matching_lr() {
        let mut state = ProcessorState::default();
        let mut ram = GuestMemory::new(0x8000_0000, 4096).unwrap();
        state.regs.write(1, 0x8000_0000);
        state.regs.write(2, 0xdead_beef);

        execute(&mut state, &mut ram, encode_amo(AMO_LR, 1, 0, 5)).unwrap();
        let rval = execute(&mut state, &mut ram, encode_amo(AMO_SC, 1, 2, 5)).unwrap();
        assert_eq!(rval, 0);
        assert_eq!(ram.read_ram(0, Wordsize::Word), 0xdead_beef);
    }

    #[test]
    fn sc_to_different_address_fails_without_modifying_memory() {
        let mut state = ProcessorState::default();
        let mut ram = GuestMemory::new(0x8000_0000, 4096).unwrap();
        state.regs.write(1, 0x8000_0000);
        state.regs.write(2, 0xdead_beef);
        execute(&mut state, &mut ram, encode_amo(AMO_LR, 1, 0, 5)).unwrap();

        state.regs.write(1, 0x8000_0008);
        let rval = execute(&mut state, &mut ram, encode_amo(AMO_SC, 1, 2, 5)).unwrap();
        assert_eq!(rval, 1);
        assert_eq!(ram.read_ram(8, Wordsize::Word), 0);
    }

    #[test]
    fn amoadd_returns_preimage_and_stores_sum() {
        let mut state = ProcessorState::default();
        let mut ram = GuestMemory::new(0x8000_0000, 4096).unwrap();
        ram.write_ram(0, 10, Wordsize::Word);
        state.regs.write(1, 0x8000_0000);
        state.regs.write(2, 5);

        let rval = execute(&mut state, &mut ram, encode_amo(AMO_ADD, 1, 2, 3)).unwrap();
        assert_eq!(rval, 10);
        assert_eq!(ram.read_ram(0, Wordsize::Word), 15);
    }

    #[test]
    fn out_of_ram_target_faults() {
        let mut state = ProcessorState::default();
        let mut ram = GuestMemory::new(0x8000_0000, 4096).unwrap();
        state.regs.write(1, 0x1000_0000); // in the MMIO window, not RAM
        let err = execute(&mut state, &mut ram, encode_amo(AMO_SWAP, 1, 0, 3)).unwrap_err();
        assert_eq!(err.addr, 0x1000_0000);
    }

    #[test]
    fn decode_helpers_agree_with_encoding() {
        let ir = encode_amo(AMO_ADD, 3, 4, 5);
        assert_eq!(rs1(ir), 3);
        assert_eq!(rs2(ir), 4);
        assert_eq!(rd(ir), 5);
    }
}
