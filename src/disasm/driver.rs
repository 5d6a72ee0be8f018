use std::collections::{HashSet, VecDeque};

use super::format::{default_operand_expression, has_static_target, operand_value};
use super::tables::{is_jam, opcode_info};
use crate::memory::MemoryRegion;
use crate::symbol::{Label, SymbolTables};
use crate::types::{AddressingMode, GlobalMemoryLocation};

const BRANCH_MNEMONICS: [&str; 8] = ["BPL", "BMI", "BVC", "BVS", "BCC", "BCS", "BNE", "BEQ"];

/// Breadth-first disassembly starting at `start`, within a single PRG
/// bank's [`MemoryRegion`]: decode one instruction, mark its bytes `Code`,
/// attach a default operand expression (creating an auto-generated label
/// at the target when the addressing mode resolves to one), and queue
/// fall-through plus branch/jump successors. An inner path stops at
/// `RTS`/`RTI`, an indirect `JMP`, or an invalid opcode; the whole pass
/// ends when the queue drains. Returns the number of instructions decoded.
pub fn disassemble(region: &mut MemoryRegion, start: u32, bank: u16, tables: &mut SymbolTables) -> Result<usize, String> {
    let mut queue = VecDeque::from([start]);
    let mut visited = HashSet::new();
    let mut decoded = 0;

    while let Some(addr) = queue.pop_front() {
        if !visited.insert(addr) {
            continue;
        }
        let byte = match region.read_byte(addr) {
            Some(b) => b,
            None => continue,
        };
        let info = opcode_info(byte);
        if is_jam(byte) {
            continue;
        }

        let length = info.mode.instruction_length() as u32;
        let mut operand_bytes = Vec::new();
        for i in 1..length {
            operand_bytes.push(region.read_byte(addr + i).unwrap_or(0));
        }
        let value = operand_value(info.mode, &operand_bytes);

        if region.mark_as_code(addr, length as u8).is_err() {
            // already decoded (overlapping instruction stream); leave it alone.
            continue;
        }
        decoded += 1;

        let target_addr = resolve_target(info.mode, addr, length, value);
        let mut target_label = None;
        if has_static_target(info.mode) {
            if let Some(target_addr) = target_addr {
                // Addresses below the cartridge window (RAM, registers)
                // aren't bank-qualified; the pre-seeded register labels
                // live at bank 0.
                let target_bank = if target_addr < 0x6000 { 0 } else { bank };
                let location = GlobalMemoryLocation::prg(target_addr as u16, target_bank);
                if region.get_object(target_addr).is_some() {
                    let id = tables.labels.find_at(&location).unwrap_or_else(|| {
                        let mut label = Label::new(format!("L_{target_addr:04X}"), location);
                        label.auto_generated = true;
                        tables.labels.insert(label)
                    });
                    let _ = region.apply_label(target_addr, id);
                    target_label = Some(id);
                } else {
                    // Out-of-region target (another bank, a register): use
                    // an existing label if one is already defined there,
                    // but never invent one for memory this pass can't see.
                    target_label = tables.labels.find_at(&location);
                }
            }
        }

        let target_label = target_label
            .and_then(|id| tables.labels.get(id).map(|label| (id, label.name.clone())));
        let expression = default_operand_expression(info.mode, value, target_label, &tables.quick_expressions);
        region.set_operand_expression(addr, Some(expression)).map_err(|e| e.to_string())?;

        let is_terminal = matches!(info.mnemonic, "RTS" | "RTI")
            || (info.mnemonic == "JMP" && info.mode == AddressingMode::Indirect);
        if !is_terminal {
            queue.push_back(addr + length);
        }

        let is_control_flow = (matches!(info.mnemonic, "JMP" | "JSR") && info.mode == AddressingMode::Absolute)
            || (BRANCH_MNEMONICS.contains(&info.mnemonic) && info.mode == AddressingMode::Relative);
        if is_control_flow {
            if let Some(target_addr) = target_addr {
                queue.push_back(target_addr);
            }
        }
    }

    Ok(decoded)
}

fn resolve_target(mode: AddressingMode, addr: u32, length: u32, value: i64) -> Option<u32> {
    match mode {
        AddressingMode::Relative => Some((addr as i64 + length as i64 + value) as u32),
        AddressingMode::ZeroPage | AddressingMode::ZeroPageX | AddressingMode::ZeroPageY => Some(value as u32),
        AddressingMode::Absolute | AddressingMode::AbsoluteX | AddressingMode::AbsoluteY | AddressingMode::Indirect => Some(value as u32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_code_decodes_every_instruction() {
        // LDA #$01; STA $00; RTS
        let mut rom = vec![0xEAu8; 0x10];
        rom[0] = 0xA9;
        rom[1] = 0x01;
        rom[2] = 0x85;
        rom[3] = 0x00;
        rom[4] = 0x60;
        let mut region = MemoryRegion::initialize_from_data("PRG", 0x8000, rom);
        let mut tables = SymbolTables::default();
        let decoded = disassemble(&mut region, 0x8000, 0, &mut tables).unwrap();
        assert_eq!(decoded, 3);
    }

    #[test]
    fn a_branch_creates_a_label_at_its_target() {
        let mut rom = vec![0xEAu8; 0x20];
        rom[0] = 0xD0; // BNE
        rom[1] = 0x02; // +2 -> target = 0x8000 + 2 + 2 = 0x8004
        rom[4] = 0x60; // RTS at target
        let mut region = MemoryRegion::initialize_from_data("PRG", 0x8000, rom);
        let mut tables = SymbolTables::default();
        disassemble(&mut region, 0x8000, 0, &mut tables).unwrap();
        assert_eq!(tables.labels.len(), 1);
        let (object, _) = region.get_object(0x8004).unwrap();
        assert!(!object.labels.is_empty());
    }

    #[test]
    fn jam_opcode_stops_the_path_without_erroring() {
        let mut rom = vec![0u8; 0x10];
        rom[0] = 0x02; // KIL
        let mut region = MemoryRegion::initialize_from_data("PRG", 0x8000, rom);
        let mut tables = SymbolTables::default();
        let decoded = disassemble(&mut region, 0x8000, 0, &mut tables).unwrap();
        assert_eq!(decoded, 0);
    }
}
