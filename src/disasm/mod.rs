pub mod tables;
pub mod format;
pub mod driver;

pub use driver::disassemble;
pub use tables::{opcode_info, OpcodeInfo, OPCODES};
