mod registers;

pub use registers::{Registers, StatusFlags};

use crate::disasm::tables::{opcode_info, OpcodeInfo};
use crate::io::{BinaryReader, BinaryWriter};
use crate::memory::MemoryView;
use crate::types::AddressingMode;

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// Per-cycle NMI edge-detection bookkeeping. `nmi` is the raw input line
/// (driven by the PPU each cycle); `nmi_detected` latches one cycle after
/// a 1->0 edge; `do_nmi` rises one cycle after `nmi_detected` and, if still
/// set when the next opcode fetch would happen, hijacks it. `did_nmi`
/// records that this particular edge has already been serviced so a long
/// vblank doesn't retrigger.
#[derive(Clone, Copy, Debug, Default)]
struct NmiLine {
    nmi: bool,
    nmi_detected: bool,
    do_nmi: bool,
    did_nmi: bool,
}

impl NmiLine {
    fn raise(&mut self) {
        if !self.nmi {
            self.nmi_detected = true;
        }
        self.nmi = true;
    }

    fn lower(&mut self) {
        self.nmi = false;
    }

    /// Advances the edge-detector by one instruction boundary. Returns
    /// whether the upcoming opcode fetch should be hijacked into the NMI
    /// vector fetch.
    fn tick(&mut self) -> bool {
        if self.nmi_detected && !self.did_nmi {
            self.do_nmi = true;
            self.nmi_detected = false;
        }
        if self.do_nmi {
            self.do_nmi = false;
            self.did_nmi = true;
            return true;
        }
        if !self.nmi {
            self.did_nmi = false;
        }
        false
    }
}

/// A stepped-down stand-in for the literal per-cycle microcode table: real
/// hardware retires one micro-op per bus cycle, but every micro-op for a
/// given opcode always fires together and is never individually observable
/// from outside the core, so `step` decodes and executes one instruction at
/// a time and reports the cycle count the real micro-op sequence would have
/// taken. `istep`/`opcode`/`intermediate`/`eaddr` are kept as plain fields
/// (rather than a `ops_pointer`/`ops_base` cursor into a literal op table)
/// since nothing outside this module inspects mid-instruction state.
#[derive(Clone, Copy, Debug)]
pub struct Cpu {
    pub registers: Registers,
    nmi_line: NmiLine,
    istep: u64,
    opcode: u8,
    intermediate: u8,
    eaddr: u16,
    pub cycle_count: u64,
    crashed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Executed { cycles: u8 },
    Crashed,
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu {
            registers: Registers::power_on(),
            nmi_line: NmiLine::default(),
            istep: 0,
            opcode: 0,
            intermediate: 0,
            eaddr: 0,
            cycle_count: 0,
            crashed: false,
        }
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    /// Count of instructions retired since power-on, exposed for the
    /// `istep` identifier in watch/breakpoint conditions.
    pub fn istep(&self) -> u64 {
        self.istep
    }

    /// Loads the reset vector and sets flag bit 5, per the power-on/reset
    /// sequence; the stack pointer decrement-by-3 hardware quirk isn't
    /// modeled since nothing reads `S` before the first instruction.
    pub fn reset(&mut self, memory: &mut dyn MemoryView) {
        let low = memory.read(RESET_VECTOR);
        let high = memory.read(RESET_VECTOR + 1);
        self.registers.pc = u16::from_le_bytes([low, high]);
        self.registers.p.set_unused(true);
        self.registers.p.set_interrupt_disable(true);
        self.crashed = false;
        self.nmi_line = NmiLine::default();
    }

    pub fn raise_nmi(&mut self) {
        self.nmi_line.raise();
    }

    pub fn lower_nmi(&mut self) {
        self.nmi_line.lower();
    }

    /// Executes one instruction (or services a pending NMI in place of the
    /// next opcode fetch) and returns the cycle count it consumed.
    pub fn step(&mut self, memory: &mut dyn MemoryView) -> StepOutcome {
        if self.crashed {
            return StepOutcome::Crashed;
        }

        if self.nmi_line.tick() {
            self.service_interrupt(memory, NMI_VECTOR, false);
            self.istep += 1;
            self.cycle_count += 7;
            return StepOutcome::Executed { cycles: 7 };
        }

        let pc = self.registers.pc;
        self.opcode = memory.read(pc);
        let info = opcode_info(self.opcode);
        if info.mnemonic == "KIL" {
            self.crashed = true;
            return StepOutcome::Crashed;
        }

        let operand_addr = pc.wrapping_add(1);
        let next_pc = pc.wrapping_add(info.mode.instruction_length() as u16);
        self.registers.pc = next_pc;
        let (eaddr, page_crossed) = self.resolve_address(memory, info.mode, operand_addr);
        self.eaddr = eaddr;
        let extra_cycles = self.execute(memory, info, operand_addr);
        let oops = if page_crossed && takes_page_cross_penalty(info.mnemonic) { 1 } else { 0 };
        let cycles = info.cycles + extra_cycles + oops;
        self.istep += 1;
        self.cycle_count += cycles as u64;
        StepOutcome::Executed { cycles }
    }

    fn service_interrupt(&mut self, memory: &mut dyn MemoryView, vector: u16, set_break: bool) {
        self.push_u16(memory, self.registers.pc);
        let mut p = self.registers.p;
        p.set_break_flag(set_break);
        p.set_unused(true);
        self.push(memory, p.into_bytes()[0]);
        self.registers.p.set_interrupt_disable(true);
        let low = memory.read(vector);
        let high = memory.read(vector + 1);
        self.registers.pc = u16::from_le_bytes([low, high]);
    }

    fn push(&mut self, memory: &mut dyn MemoryView, value: u8) {
        memory.write(0x0100 + self.registers.s as u16, value);
        self.registers.s = self.registers.s.wrapping_sub(1);
    }

    fn pop(&mut self, memory: &mut dyn MemoryView) -> u8 {
        self.registers.s = self.registers.s.wrapping_add(1);
        memory.read(0x0100 + self.registers.s as u16)
    }

    fn push_u16(&mut self, memory: &mut dyn MemoryView, value: u16) {
        let [low, high] = value.to_le_bytes();
        self.push(memory, high);
        self.push(memory, low);
    }

    fn pop_u16(&mut self, memory: &mut dyn MemoryView) -> u16 {
        let low = self.pop(memory);
        let high = self.pop(memory);
        u16::from_le_bytes([low, high])
    }

    /// Computes the effective address for `mode` given the operand bytes
    /// starting at `operand_addr`, plus whether indexing carried into the
    /// address high byte (the "oops" condition: the CPU's first read goes
    /// to the wrong page and must be retried, costing one cycle). For
    /// `Immediate`/`Implicit`/`Accumulator` the address is unused by
    /// `execute`, which reads the operand a different way for those modes.
    fn resolve_address(&mut self, memory: &mut dyn MemoryView, mode: AddressingMode, operand_addr: u16) -> (u16, bool) {
        use AddressingMode::*;
        match mode {
            Implicit | Accumulator | Immediate => (0, false),
            ZeroPage => (memory.read(operand_addr) as u16, false),
            ZeroPageX => ((memory.read(operand_addr).wrapping_add(self.registers.x)) as u16, false),
            ZeroPageY => ((memory.read(operand_addr).wrapping_add(self.registers.y)) as u16, false),
            Relative => (operand_addr.wrapping_add(1).wrapping_add((memory.read(operand_addr) as i8) as u16), false),
            Absolute => (u16::from_le_bytes([memory.read(operand_addr), memory.read(operand_addr + 1)]), false),
            AbsoluteX => {
                let base = u16::from_le_bytes([memory.read(operand_addr), memory.read(operand_addr + 1)]);
                let effective = base.wrapping_add(self.registers.x as u16);
                (effective, page_crossed(base, effective))
            }
            AbsoluteY => {
                let base = u16::from_le_bytes([memory.read(operand_addr), memory.read(operand_addr + 1)]);
                let effective = base.wrapping_add(self.registers.y as u16);
                (effective, page_crossed(base, effective))
            }
            Indirect => {
                let ptr = u16::from_le_bytes([memory.read(operand_addr), memory.read(operand_addr + 1)]);
                let low = memory.read(ptr);
                let high = memory.read((ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF));
                (u16::from_le_bytes([low, high]), false)
            }
            IndirectX => {
                let zp = memory.read(operand_addr).wrapping_add(self.registers.x);
                let low = memory.read(zp as u16);
                let high = memory.read(zp.wrapping_add(1) as u16);
                (u16::from_le_bytes([low, high]), false)
            }
            IndirectY => {
                let zp = memory.read(operand_addr);
                let low = memory.read(zp as u16);
                let high = memory.read(zp.wrapping_add(1) as u16);
                let base = u16::from_le_bytes([low, high]);
                let effective = base.wrapping_add(self.registers.y as u16);
                (effective, page_crossed(base, effective))
            }
        }
    }

    fn execute(&mut self, memory: &mut dyn MemoryView, info: OpcodeInfo, operand_addr: u16) -> u8 {
        use AddressingMode::*;
        let immediate_or_mem = |cpu: &mut Cpu, memory: &mut dyn MemoryView| -> u8 {
            if info.mode == Immediate { memory.read(operand_addr) } else { memory.read(cpu.eaddr) }
        };

        match info.mnemonic {
            "LDA" => { self.registers.a = immediate_or_mem(self, memory); self.registers.p.set_nz(self.registers.a); }
            "LDX" => { self.registers.x = immediate_or_mem(self, memory); self.registers.p.set_nz(self.registers.x); }
            "LDY" => { self.registers.y = immediate_or_mem(self, memory); self.registers.p.set_nz(self.registers.y); }
            "LAX" => {
                let value = immediate_or_mem(self, memory);
                self.registers.a = value;
                self.registers.x = value;
                self.registers.p.set_nz(value);
            }
            "STA" => memory.write(self.eaddr, self.registers.a),
            "STX" => memory.write(self.eaddr, self.registers.x),
            "STY" => memory.write(self.eaddr, self.registers.y),
            "SAX" => memory.write(self.eaddr, self.registers.a & self.registers.x),
            "TAX" => { self.registers.x = self.registers.a; self.registers.p.set_nz(self.registers.x); }
            "TAY" => { self.registers.y = self.registers.a; self.registers.p.set_nz(self.registers.y); }
            "TXA" => { self.registers.a = self.registers.x; self.registers.p.set_nz(self.registers.a); }
            "TYA" => { self.registers.a = self.registers.y; self.registers.p.set_nz(self.registers.a); }
            "TSX" => { self.registers.x = self.registers.s; self.registers.p.set_nz(self.registers.x); }
            "TXS" => self.registers.s = self.registers.x,
            "PHA" => self.push(memory, self.registers.a),
            "PHP" => {
                let mut p = self.registers.p;
                p.set_break_flag(true);
                p.set_unused(true);
                self.push(memory, p.into_bytes()[0]);
            }
            "PLA" => { self.registers.a = self.pop(memory); self.registers.p.set_nz(self.registers.a); }
            "PLP" => {
                let byte = self.pop(memory);
                self.registers.p = StatusFlags::from_bytes([byte]);
                self.registers.p.set_unused(true);
            }
            "AND" => { self.registers.a &= immediate_or_mem(self, memory); self.registers.p.set_nz(self.registers.a); }
            "ORA" => { self.registers.a |= immediate_or_mem(self, memory); self.registers.p.set_nz(self.registers.a); }
            "EOR" => { self.registers.a ^= immediate_or_mem(self, memory); self.registers.p.set_nz(self.registers.a); }
            "BIT" => {
                let value = immediate_or_mem(self, memory);
                self.registers.p.set_zero(self.registers.a & value == 0);
                self.registers.p.set_overflow(value & 0x40 != 0);
                self.registers.p.set_negative(value & 0x80 != 0);
            }
            "ADC" => { let value = immediate_or_mem(self, memory); self.adc(value); }
            "SBC" => { let value = immediate_or_mem(self, memory); self.adc(!value); }
            "CMP" => { let value = immediate_or_mem(self, memory); self.compare(self.registers.a, value); }
            "CPX" => { let value = immediate_or_mem(self, memory); self.compare(self.registers.x, value); }
            "CPY" => { let value = immediate_or_mem(self, memory); self.compare(self.registers.y, value); }
            "INX" => { self.registers.x = self.registers.x.wrapping_add(1); self.registers.p.set_nz(self.registers.x); }
            "INY" => { self.registers.y = self.registers.y.wrapping_add(1); self.registers.p.set_nz(self.registers.y); }
            "DEX" => { self.registers.x = self.registers.x.wrapping_sub(1); self.registers.p.set_nz(self.registers.x); }
            "DEY" => { self.registers.y = self.registers.y.wrapping_sub(1); self.registers.p.set_nz(self.registers.y); }
            "INC" => { let value = memory.read(self.eaddr).wrapping_add(1); memory.write(self.eaddr, value); self.registers.p.set_nz(value); }
            "DEC" => { let value = memory.read(self.eaddr).wrapping_sub(1); memory.write(self.eaddr, value); self.registers.p.set_nz(value); }
            "ASL" => self.shift(memory, info.mode, |_, v| { let carry = v & 0x80 != 0; (v << 1, carry) }),
            "LSR" => self.shift(memory, info.mode, |_, v| { let carry = v & 0x01 != 0; (v >> 1, carry) }),
            "ROL" => {
                let carry_in = self.registers.p.carry();
                self.shift(memory, info.mode, move |_, v| { let carry = v & 0x80 != 0; ((v << 1) | carry_in as u8, carry) })
            }
            "ROR" => {
                let carry_in = self.registers.p.carry();
                self.shift(memory, info.mode, move |_, v| { let carry = v & 0x01 != 0; ((v >> 1) | ((carry_in as u8) << 7), carry) })
            }
            "SLO" => {
                self.shift(memory, info.mode, |_, v| { let carry = v & 0x80 != 0; (v << 1, carry) });
                self.registers.a |= memory.read(self.eaddr);
                self.registers.p.set_nz(self.registers.a);
            }
            "RLA" => {
                let carry_in = self.registers.p.carry();
                self.shift(memory, info.mode, move |_, v| { let carry = v & 0x80 != 0; ((v << 1) | carry_in as u8, carry) });
                self.registers.a &= memory.read(self.eaddr);
                self.registers.p.set_nz(self.registers.a);
            }
            "SRE" => {
                self.shift(memory, info.mode, |_, v| { let carry = v & 0x01 != 0; (v >> 1, carry) });
                self.registers.a ^= memory.read(self.eaddr);
                self.registers.p.set_nz(self.registers.a);
            }
            "RRA" => {
                let carry_in = self.registers.p.carry();
                self.shift(memory, info.mode, move |_, v| { let carry = v & 0x01 != 0; ((v >> 1) | ((carry_in as u8) << 7), carry) });
                let value = memory.read(self.eaddr);
                self.adc(value);
            }
            "DCP" => {
                let value = memory.read(self.eaddr).wrapping_sub(1);
                memory.write(self.eaddr, value);
                self.compare(self.registers.a, value);
            }
            "ISC" => {
                let value = memory.read(self.eaddr).wrapping_add(1);
                memory.write(self.eaddr, value);
                self.adc(!value);
            }
            "ANC" => {
                self.registers.a &= immediate_or_mem(self, memory);
                self.registers.p.set_nz(self.registers.a);
                self.registers.p.set_carry(self.registers.a & 0x80 != 0);
            }
            "ALR" => {
                self.registers.a &= immediate_or_mem(self, memory);
                let carry = self.registers.a & 0x01 != 0;
                self.registers.a >>= 1;
                self.registers.p.set_carry(carry);
                self.registers.p.set_nz(self.registers.a);
            }
            "ARR" => {
                self.registers.a &= immediate_or_mem(self, memory);
                let carry_in = self.registers.p.carry();
                self.registers.a = (self.registers.a >> 1) | ((carry_in as u8) << 7);
                self.registers.p.set_nz(self.registers.a);
                self.registers.p.set_carry(self.registers.a & 0x40 != 0);
                self.registers.p.set_overflow((self.registers.a & 0x40 != 0) ^ (self.registers.a & 0x20 != 0));
            }
            "AXS" => {
                let value = immediate_or_mem(self, memory);
                let result = (self.registers.a & self.registers.x).wrapping_sub(value);
                self.registers.p.set_carry((self.registers.a & self.registers.x) >= value);
                self.registers.x = result;
                self.registers.p.set_nz(self.registers.x);
            }
            "JMP" => self.registers.pc = self.eaddr,
            "JSR" => {
                let return_addr = self.registers.pc.wrapping_sub(1);
                self.push_u16(memory, return_addr);
                self.registers.pc = self.eaddr;
            }
            "RTS" => { let addr = self.pop_u16(memory); self.registers.pc = addr.wrapping_add(1); }
            "RTI" => {
                let byte = self.pop(memory);
                self.registers.p = StatusFlags::from_bytes([byte]);
                self.registers.p.set_unused(true);
                self.registers.pc = self.pop_u16(memory);
            }
            "BRK" => {
                self.registers.pc = self.registers.pc.wrapping_add(1);
                self.service_interrupt(memory, IRQ_VECTOR, true);
            }
            "BPL" => return self.branch(!self.registers.p.negative()),
            "BMI" => return self.branch(self.registers.p.negative()),
            "BVC" => return self.branch(!self.registers.p.overflow()),
            "BVS" => return self.branch(self.registers.p.overflow()),
            "BCC" => return self.branch(!self.registers.p.carry()),
            "BCS" => return self.branch(self.registers.p.carry()),
            "BNE" => return self.branch(!self.registers.p.zero()),
            "BEQ" => return self.branch(self.registers.p.zero()),
            "CLC" => self.registers.p.set_carry(false),
            "SEC" => self.registers.p.set_carry(true),
            "CLI" => self.registers.p.set_interrupt_disable(false),
            "SEI" => self.registers.p.set_interrupt_disable(true),
            "CLV" => self.registers.p.set_overflow(false),
            "CLD" => self.registers.p.set_decimal(false),
            "SED" => self.registers.p.set_decimal(true),
            "NOP" => {}
            _ => {}
        }
        0
    }

    fn shift(&mut self, memory: &mut dyn MemoryView, mode: AddressingMode, op: impl FnOnce(&mut Cpu, u8) -> (u8, bool)) {
        let value = if mode == AddressingMode::Accumulator { self.registers.a } else { memory.read(self.eaddr) };
        let (result, carry) = op(self, value);
        self.registers.p.set_carry(carry);
        self.registers.p.set_nz(result);
        if mode == AddressingMode::Accumulator {
            self.registers.a = result;
        } else {
            memory.write(self.eaddr, result);
        }
    }

    fn adc(&mut self, value: u8) {
        let carry_in = self.registers.p.carry() as u16;
        let sum = self.registers.a as u16 + value as u16 + carry_in;
        let overflow = (!(self.registers.a ^ value) & (self.registers.a ^ sum as u8)) & 0x80 != 0;
        self.registers.p.set_carry(sum > 0xFF);
        self.registers.p.set_overflow(overflow);
        self.registers.a = sum as u8;
        self.registers.p.set_nz(self.registers.a);
    }

    fn compare(&mut self, lhs: u8, rhs: u8) {
        let result = lhs.wrapping_sub(rhs);
        self.registers.p.set_carry(lhs >= rhs);
        self.registers.p.set_nz(result);
    }

    /// A taken branch costs one extra cycle, two when the target lies in
    /// a different page than the instruction after the branch.
    fn branch(&mut self, taken: bool) -> u8 {
        if !taken {
            return 0;
        }
        let fall_through = self.registers.pc;
        self.registers.pc = self.eaddr;
        if fall_through & 0xFF00 != self.eaddr & 0xFF00 {
            2
        } else {
            1
        }
    }

    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.registers.a);
        writer.write_u8(self.registers.x);
        writer.write_u8(self.registers.y);
        writer.write_u8(self.registers.s);
        writer.write_u16(self.registers.pc);
        writer.write_u8(self.registers.p.into_bytes()[0]);
        writer.write_bool(self.nmi_line.nmi);
        writer.write_bool(self.nmi_line.nmi_detected);
        writer.write_bool(self.nmi_line.do_nmi);
        writer.write_bool(self.nmi_line.did_nmi);
        writer.write_varint(self.istep);
        writer.write_varint(self.cycle_count);
        writer.write_bool(self.crashed);
    }

    pub fn load(&mut self, reader: &mut BinaryReader) -> Result<(), String> {
        self.registers.a = reader.read_u8()?;
        self.registers.x = reader.read_u8()?;
        self.registers.y = reader.read_u8()?;
        self.registers.s = reader.read_u8()?;
        self.registers.pc = reader.read_u16()?;
        self.registers.p = StatusFlags::from_bytes([reader.read_u8()?]);
        self.nmi_line.nmi = reader.read_bool()?;
        self.nmi_line.nmi_detected = reader.read_bool()?;
        self.nmi_line.do_nmi = reader.read_bool()?;
        self.nmi_line.did_nmi = reader.read_bool()?;
        self.istep = reader.read_varint()?;
        self.cycle_count = reader.read_varint()?;
        self.crashed = reader.read_bool()?;
        Ok(())
    }
}

impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new()
    }
}

fn page_crossed(base: u16, effective: u16) -> bool {
    base & 0xFF00 != effective & 0xFF00
}

/// Whether `mnemonic` is a pure read, i.e. pays the "oops" cycle when an
/// indexed effective address crosses a page. Stores and read-modify-write
/// ops re-access the final address regardless, so their opcode-table
/// cycle counts already include the fixup and get no extra cycle.
fn takes_page_cross_penalty(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "LDA" | "LDX" | "LDY" | "EOR" | "AND" | "ORA" | "ADC" | "SBC" | "CMP" | "BIT" | "LAX" | "LAS" | "NOP"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::mapper::Nrom;
    use crate::memory::SystemView;
    use crate::types::NameTableMirroring;

    /// Builds a 32 KiB NROM system with `bytes` baked into PRG ROM at
    /// their CPU addresses. Writes through the bus can't patch ROM, so
    /// test programs have to be part of the image up front.
    fn system(bytes: &[(u16, u8)]) -> SystemView {
        let mut prg = vec![0u8; 32 * 1024];
        for &(address, value) in bytes {
            prg[address as usize - 0x8000] = value;
        }
        let mapper = Nrom::new(prg, vec![0u8; 8 * 1024], NameTableMirroring::Vertical);
        SystemView::new(Box::new(mapper))
    }

    #[test]
    fn reset_loads_the_vector_and_sets_unused_bit() {
        let mut memory = system(&[(0xFFFC, 0x00), (0xFFFD, 0x80)]);
        let mut cpu = Cpu::new();
        cpu.reset(&mut memory);
        assert_eq!(cpu.registers.pc, 0x8000);
        assert!(cpu.registers.p.unused());
    }

    #[test]
    fn lda_immediate_sets_accumulator_and_flags() {
        let mut memory = system(&[(0x8000, 0xA9), (0x8001, 0x00)]);
        let mut cpu = Cpu::new();
        cpu.registers.pc = 0x8000;
        let outcome = cpu.step(&mut memory);
        assert_eq!(cpu.registers.a, 0);
        assert!(cpu.registers.p.zero());
        assert_eq!(outcome, StepOutcome::Executed { cycles: 2 });
    }

    #[test]
    fn kil_opcode_crashes_the_core() {
        let mut memory = system(&[(0x8000, 0x02)]);
        let mut cpu = Cpu::new();
        cpu.registers.pc = 0x8000;
        assert_eq!(cpu.step(&mut memory), StepOutcome::Crashed);
        assert!(cpu.is_crashed());
        assert_eq!(cpu.step(&mut memory), StepOutcome::Crashed);
    }

    #[test]
    fn nmi_is_serviced_one_instruction_after_being_raised() {
        let mut memory = system(&[(0xFFFA, 0x00), (0xFFFB, 0x90), (0x8000, 0xEA)]);
        let mut cpu = Cpu::new();
        cpu.registers.pc = 0x8000;
        cpu.raise_nmi();
        cpu.step(&mut memory); // NOP executes, edge latches
        let outcome = cpu.step(&mut memory); // NMI services here
        assert_eq!(cpu.registers.pc, 0x9000);
        assert_eq!(outcome, StepOutcome::Executed { cycles: 7 });
    }

    #[test]
    fn branch_taken_jumps_to_relative_target() {
        let mut memory = system(&[(0x8000, 0xD0), (0x8001, 0x02)]); // BNE +2
        let mut cpu = Cpu::new();
        cpu.registers.pc = 0x8000;
        cpu.registers.p.set_zero(false);
        let outcome = cpu.step(&mut memory);
        assert_eq!(cpu.registers.pc, 0x8004);
        // Base 2 plus the taken-branch cycle, same page.
        assert_eq!(outcome, StepOutcome::Executed { cycles: 3 });
    }

    #[test]
    fn branch_to_another_page_costs_two_extra_cycles() {
        let mut memory = system(&[(0x80F0, 0xD0), (0x80F1, 0x7F)]); // BNE +127 -> $8171
        let mut cpu = Cpu::new();
        cpu.registers.pc = 0x80F0;
        cpu.registers.p.set_zero(false);
        let outcome = cpu.step(&mut memory);
        assert_eq!(cpu.registers.pc, 0x8171);
        assert_eq!(outcome, StepOutcome::Executed { cycles: 4 });
    }

    #[test]
    fn indexed_read_crossing_a_page_pays_the_oops_cycle() {
        // LDA $80FF,X with X = 1 crosses into $8100.
        let mut memory = system(&[(0x8000, 0xBD), (0x8001, 0xFF), (0x8002, 0x80)]);
        let mut cpu = Cpu::new();
        cpu.registers.pc = 0x8000;
        cpu.registers.x = 0x01;
        assert_eq!(cpu.step(&mut memory), StepOutcome::Executed { cycles: 5 });

        // Same instruction without the crossing stays at the table cost.
        let mut memory = system(&[(0x8000, 0xBD), (0x8001, 0x00), (0x8002, 0x80)]);
        let mut cpu = Cpu::new();
        cpu.registers.pc = 0x8000;
        cpu.registers.x = 0x01;
        assert_eq!(cpu.step(&mut memory), StepOutcome::Executed { cycles: 4 });
    }

    #[test]
    fn stores_never_pay_the_page_cross_penalty() {
        // STA $80FF,X with X = 1: the table's 5 cycles already cover the
        // address fixup.
        let mut memory = system(&[(0x8000, 0x9D), (0x8001, 0xFF), (0x8002, 0x80)]);
        let mut cpu = Cpu::new();
        cpu.registers.pc = 0x8000;
        cpu.registers.x = 0x01;
        assert_eq!(cpu.step(&mut memory), StepOutcome::Executed { cycles: 5 });
    }

    #[test]
    fn save_and_load_round_trips_registers() {
        let mut cpu = Cpu::new();
        cpu.registers.a = 0x42;
        cpu.registers.pc = 0x1234;
        let mut buf = Vec::new();
        {
            let mut writer = BinaryWriter::new(&mut buf);
            cpu.save(&mut writer);
        }
        let mut restored = Cpu::new();
        let mut cursor = &buf[..];
        let mut reader = BinaryReader::new(&mut cursor);
        restored.load(&mut reader).unwrap();
        assert_eq!(restored.registers.a, 0x42);
        assert_eq!(restored.registers.pc, 0x1234);
    }
}
