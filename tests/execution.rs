use sprocket::cartridge::{Cartridge, HeaderDb};
use sprocket::instance::{BreakpointInfo, BreakpointKey, RunState, SystemInstance};
use sprocket::system::System;
use sprocket::types::GlobalMemoryLocation;

fn nrom_rom_with_code(code: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 16];
    rom[0..4].copy_from_slice(&[0x4E, 0x45, 0x53, 0x1A]);
    rom[4] = 1;
    rom[5] = 1;
    rom.extend(vec![0xEAu8; 16 * 1024]);
    rom.extend(vec![0u8; 8 * 1024]);
    let prg = 16;
    rom[prg..prg + code.len()].copy_from_slice(code);
    rom[prg + 0x3FFC] = 0x00; // reset vector -> $C000
    rom[prg + 0x3FFD] = 0xC0;
    rom
}

fn instance_for(rom: &[u8]) -> (System, SystemInstance) {
    let cartridge = Cartridge::load("test.nes".to_string(), rom, &HeaderDb::new()).unwrap();
    let system = System::new(cartridge).unwrap();
    let mut instance = SystemInstance::new(&system).unwrap();
    instance.reset();
    (system, instance)
}

/// A breakpoint at the reset entry with condition `a == $42` must stay
/// quiet while A holds any other value and fire once A matches.
#[test]
fn conditional_breakpoint_on_the_reset_entry() {
    let rom = nrom_rom_with_code(&[0xEA, 0x4C, 0x00, 0xC0]); // NOP; JMP $C000
    let (system, mut instance) = instance_for(&rom);
    let entry = system.entry_point().unwrap();

    let key = BreakpointKey::Address(entry.address);
    let mut breakpoint = BreakpointInfo::new(key);
    breakpoint.set_condition("a == $42", Some(&system.tables)).unwrap();
    instance.breakpoints.add(breakpoint);

    instance.cpu.registers.a = 0x41;
    instance.step_instruction();
    instance.step_instruction();
    assert!(instance.take_pending_break().is_none());

    instance.cpu.registers.a = 0x42;
    let mut fired = None;
    for _ in 0..4 {
        instance.step_instruction();
        if let Some(hit) = instance.take_pending_break() {
            fired = Some(hit);
            break;
        }
    }
    let hit = fired.expect("breakpoint must fire once A == $42");
    assert_eq!(hit.key, key);
    assert_eq!(instance.state(), RunState::Paused);
}

/// MMC1 PRG mode 3 (fix-high/swap-low): five serial writes of all-ones
/// select bank 15 at `$8000` while the last bank stays fixed at `$C000`.
#[test]
fn mmc1_selects_prg_bank_15_in_mode_3() {
    use sprocket::memory::mapper::CartridgeMapper as _;

    let mut rom = vec![0u8; 16];
    rom[0..4].copy_from_slice(&[0x4E, 0x45, 0x53, 0x1A]);
    rom[4] = 16; // sixteen 16 KiB PRG banks
    rom[5] = 0; // CHR RAM
    rom[6] = 0x10; // mapper 1 low nibble
    rom.extend(vec![0u8; 16 * 16 * 1024]);
    for bank in 0..16usize {
        rom[16 + bank * 16 * 1024] = 0xB0 | bank as u8; // distinctive byte 0 per bank
    }
    let cartridge = Cartridge::load("mmc1.nes".to_string(), &rom, &HeaderDb::new()).unwrap();
    let mut instance = SystemInstance::from_cartridge(&cartridge).unwrap();

    // Control = 0b01100: PRG mode 3, mirroring bits don't matter here.
    for bit in [0u8, 0, 1, 1, 0] {
        instance.bus.memory.mapper.write_prg(0x8000, bit);
    }
    // Select bank 15 ($FF with bit 7 clear would also work: only the low
    // bit of each write shifts in).
    for _ in 0..5 {
        instance.bus.memory.mapper.write_prg(0xE000, 0x7F);
    }

    assert_eq!(instance.bus.memory.mapper.read_prg(0x8000), 0xBF);
    assert_eq!(instance.bus.memory.mapper.prg_bank_for(0x8000).0, 15);
    assert_eq!(instance.bus.memory.mapper.prg_bank_for(0xC000).0, 15);
    assert_eq!(instance.bus.memory.mapper.read_prg(0xC000), 0xBF);
}

/// With rendering enabled, vblank rises exactly once per frame at
/// scanline 241 cycle 1 and falls at the pre-render line, and odd frames
/// are one PPU cycle shorter than even ones.
#[test]
fn vblank_and_odd_frame_timing() {
    use sprocket::memory::mapper::Nrom;
    use sprocket::memory::SystemView;
    use sprocket::ppu::Ppu;
    use sprocket::types::NameTableMirroring;

    let mapper = Nrom::new(vec![0u8; 32 * 1024], vec![0u8; 8 * 1024], NameTableMirroring::Vertical);
    let mut memory = SystemView::new(Box::new(mapper));
    let mut ppu = Ppu::new();
    ppu.write_register(1, 0x1E, &mut memory); // show background + sprites

    let mut rises = 0;
    let mut falls = 0;
    let mut was_active = ppu.vblank_active();
    let mut frame = ppu.frame();
    let mut frame_lengths = Vec::new();
    let mut ticks_in_frame = 0u32;
    while frame_lengths.len() < 3 {
        ppu.step(&mut memory);
        ticks_in_frame += 1;
        if ppu.frame() != frame {
            frame = ppu.frame();
            frame_lengths.push(ticks_in_frame);
            ticks_in_frame = 0;
        }
        let active = ppu.vblank_active();
        if active && !was_active {
            rises += 1;
            // The rise happens during the (241, 1) tick.
            assert_eq!((ppu.scanline(), ppu.cycle()), (241, 2));
        }
        if !active && was_active {
            falls += 1;
            assert_eq!((ppu.scanline(), ppu.cycle()), (261, 2));
        }
        was_active = active;
    }
    assert_eq!(rises, 3);
    assert_eq!(falls, 3);
    // Odd frames drop one idle cycle while rendering is on.
    assert!(frame_lengths.contains(&(341 * 262)));
    assert!(frame_lengths.contains(&(341 * 262 - 1)));
}

/// Stepping is deterministic: a machine restored from a mid-run save
/// state and stepped the remaining cycles matches the original run.
#[test]
fn mid_run_save_state_resumes_deterministically() {
    let rom = nrom_rom_with_code(&[0xE8, 0xC8, 0x69, 0x01, 0x4C, 0x00, 0xC0]); // INX; INY; ADC #$01; JMP
    let (_, mut original) = instance_for(&rom);

    for _ in 0..5_000 {
        original.step_cycle();
    }
    original.capture_save_state("halfway", 0);

    let (_, mut resumed) = instance_for(&rom);
    resumed.restore_save_state_from(&original.save_states[0]).unwrap();

    for _ in 0..5_000 {
        original.step_cycle();
        resumed.step_cycle();
    }
    assert_eq!(original.cpu.registers.a, resumed.cpu.registers.a);
    assert_eq!(original.cpu.registers.x, resumed.cpu.registers.x);
    assert_eq!(original.cpu.registers.y, resumed.cpu.registers.y);
    assert_eq!(original.cpu.registers.pc, resumed.cpu.registers.pc);
    assert_eq!(original.cpu.istep(), resumed.cpu.istep());
    assert_eq!(original.bus.ppu.frame(), resumed.bus.ppu.frame());
    assert_eq!(original.bus.ppu.scanline(), resumed.bus.ppu.scanline());
    assert_eq!(original.bus.ppu.cycle(), resumed.bus.ppu.cycle());
}

/// The quick-breakpoint bitmap and the keyed map must always agree on
/// which addresses carry at least one breakpoint.
#[test]
fn breakpoint_bitmap_matches_the_key_map() {
    let rom = nrom_rom_with_code(&[0xEA]);
    let (_, mut instance) = instance_for(&rom);
    let keys = [
        BreakpointKey::Address(0x0000),
        BreakpointKey::Address(0xC123),
        BreakpointKey::Banked(GlobalMemoryLocation::prg(0xFFFC, 0)),
    ];
    for key in keys {
        instance.breakpoints.add(BreakpointInfo::new(key));
    }
    instance.breakpoints.remove(BreakpointKey::Address(0xC123));

    for address in 0..=0xFFFFu16 {
        let in_map = instance
            .breakpoints
            .iter()
            .any(|info| info.key.address() == address);
        assert_eq!(instance.breakpoints.quick_check(address), in_map, "address {address:#06X}");
    }
}
