use lazy_static::lazy_static;
use std::fmt;

/// The eight registers (and `(HL)`) addressable by the regular 3-bit operand
/// field, in official-opcode-table order: B C D E H L (HL) A.
pub const REG8_NAMES: [&str; 8] = ["B", "C", "D", "E", "H", "L", "(HL)", "A"];

/// The four condition codes addressable by the 2-bit condition field.
pub const CC_NAMES: [&str; 4] = ["NZ", "Z", "NC", "C"];

lazy_static! {
    /// Mnemonics for the eight regularly-tabulated 8-bit ALU operations,
    /// keyed by the `y` field of `0x80-0xBF` (and, shared encoding, `0xC6`
    /// block immediates).
    pub static ref ALU_NAMES: [&'static str; 8] =
        ["ADD", "ADC", "SUB", "SBC", "AND", "XOR", "OR", "CP"];

    /// Mnemonics for the eight regularly-tabulated CB-prefixed rotate/shift
    /// operations, keyed by the `y` field of `0xCB00-0xCB3F`.
    pub static ref CB_ROT_NAMES: [&'static str; 8] =
        ["RLC", "RRC", "RL", "RR", "SLA", "SRA", "SWAP", "SRL"];
}

/// Decomposition of an opcode byte into the standard `xxyyyzzz` bit fields
/// used by Z80/SM83 opcode tables.
#[derive(Clone, Copy, Debug)]
pub struct Fields {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub p: u8,
    pub q: u8,
}

impl Fields {
    pub fn decompose(op: u8) -> Self {
        Fields {
            x: (op >> 6) & 0x03,
            y: (op >> 3) & 0x07,
            z: op & 0x07,
            p: (op >> 4) & 0x03,
            q: (op >> 3) & 0x01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// One of the eleven opcodes the hardware does not define
    /// (0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD).
    UnofficialOpcode(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnofficialOpcode(op) => {
                write!(f, "opcode {:#04x} has no defined behavior", op)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

pub fn is_unofficial(op: u8) -> bool {
    matches!(
        op,
        0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD
    )
}
