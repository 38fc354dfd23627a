//! RV32IMA opcode and funct3/funct7/funct5 constants.
//!
//! Bit patterns as given in the unprivileged ISA manual. Collected here
//! rather than inlined so the dispatch tables in [`crate::step`] and the
//! per-family execution modules read as a match on names, not magic
//! numbers.

pub const OP_LUI: u32 = 0b011_0111;
pub const OP_AUIPC: u32 = 0b001_0111;
pub const OP_JAL: u32 = 0b110_1111;
pub const OP_JALR: u32 = 0b110_0111;
pub const OP_BRANCH: u32 = 0b110_0011;
pub const OP_LOAD: u32 = 0b000_0011;
pub const OP_STORE: u32 = 0b010_0011;
pub const OP_IMM: u32 = 0b001_0011;
pub const OP_OP: u32 = 0b011_0011;
pub const OP_FENCE: u32 = 0b000_1111;
pub const OP_AMO: u32 = 0b010_1111;
pub const OP_SYSTEM: u32 = 0b111_0011;

// BRANCH funct3
pub const FUNCT3_BEQ: u32 = 0b000;
pub const FUNCT3_BNE: u32 = 0b001;
pub const FUNCT3_BLT: u32 = 0b100;
pub const FUNCT3_BGE: u32 = 0b101;
pub const FUNCT3_BLTU: u32 = 0b110;
pub const FUNCT3_BGEU: u32 = 0b111;

// LOAD/STORE funct3 (width + signedness)
pub const FUNCT3_B: u32 = 0b000;
pub const FUNCT3_H: u32 = 0b001;
pub const FUNCT3_W: u32 = 0b010;
pub const FUNCT3_BU: u32 = 0b100;
pub const FUNCT3_HU: u32 = 0b101;

// OP-IMM / OP funct3
pub const FUNCT3_ADD_SUB: u32 = 0b000;
pub const FUNCT3_SLL: u32 = 0b001;
pub const FUNCT3_SLT: u32 = 0b010;
pub const FUNCT3_SLTU: u32 = 0b011;
pub const FUNCT3_XOR: u32 = 0b100;
pub const FUNCT3_SRL_SRA: u32 = 0b101;
pub const FUNCT3_OR: u32 = 0b110;
pub const FUNCT3_AND: u32 = 0b111;

// RV32M funct3 (OP opcode, bit 25 of the instruction set)
pub const FUNCT3_MUL: u32 = 0b000;
pub const FUNCT3_MULH: u32 = 0b001;
pub const FUNCT3_MULHSU: u32 = 0b010;
pub const FUNCT3_MULHU: u32 = 0b011;
pub const FUNCT3_DIV: u32 = 0b100;
pub const FUNCT3_DIVU: u32 = 0b101;
pub const FUNCT3_REM: u32 = 0b110;
pub const FUNCT3_REMU: u32 = 0b111;

/// Bit 30 of OP-family instructions selects SUB over ADD, and SRA over SRL.
pub const BIT30_ALT: u32 = 1 << 30;
/// Bit 25 of OP-family instructions selects the RV32M extension.
pub const BIT25_MULDIV: u32 = 1 << 25;

// SYSTEM funct3 (Zicsr, or privileged/trap when 0 or 4)
pub const FUNCT3_PRIV: u32 = 0b000;
pub const FUNCT3_CSRRW: u32 = 0b001;
pub const FUNCT3_CSRRS: u32 = 0b010;
pub const FUNCT3_CSRRC: u32 = 0b011;
pub const FUNCT3_CSRRWI: u32 = 0b101;
pub const FUNCT3_CSRRSI: u32 = 0b110;
pub const FUNCT3_CSRRCI: u32 = 0b111;

// SYSTEM csrno for privileged instructions (funct3 == 0)
pub const PRIV_ECALL: u32 = 0x000;
pub const PRIV_EBREAK: u32 = 0x001;
pub const PRIV_MRET: u32 = 0x302;
pub const PRIV_WFI: u32 = 0x105;

// RV32A funct5 (bits 27..31 of the instruction)
pub const AMO_ADD: u32 = 0b00000;
pub const AMO_SWAP: u32 = 0b00001;
pub const AMO_LR: u32 = 0b00010;
pub const AMO_SC: u32 = 0b00011;
pub const AMO_XOR: u32 = 0b00100;
pub const AMO_OR: u32 = 0b01000;
pub const AMO_AND: u32 = 0b01100;
pub const AMO_MIN: u32 = 0b10000;
pub const AMO_MAX: u32 = 0b10100;
pub const AMO_MINU: u32 = 0b11000;
pub const AMO_MAXU: u32 = 0b11100;
