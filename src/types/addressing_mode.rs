use enum_iterator::Sequence;

/// 6502 addressing modes, named after the bus access pattern rather than the
/// mnemonic suffix convention (`Abs` not `ABS`) to match `strum`-derived
/// `Display` output used by the disassembler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Sequence)]
pub enum AddressingMode {
    Implicit,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
}

impl AddressingMode {
    /// Total instruction length in bytes, including the opcode byte.
    pub fn instruction_length(self) -> u8 {
        use AddressingMode::*;
        match self {
            Implicit | Accumulator => 1,
            Immediate | ZeroPage | ZeroPageX | ZeroPageY | Relative | IndirectX | IndirectY => 2,
            Absolute | AbsoluteX | AbsoluteY | Indirect => 3,
        }
    }

    pub fn operand_byte_count(self) -> u8 {
        self.instruction_length() - 1
    }

    pub fn is_indexed_x(self) -> bool {
        matches!(self, AddressingMode::ZeroPageX | AddressingMode::AbsoluteX | AddressingMode::IndirectX)
    }

    pub fn is_indexed_y(self) -> bool {
        matches!(self, AddressingMode::ZeroPageY | AddressingMode::AbsoluteY | AddressingMode::IndirectY)
    }
}
