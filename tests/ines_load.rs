use sprocket::cartridge::{Cartridge, HeaderDb};
use sprocket::memory::{ListingItem, ObjectType};
use sprocket::system::System;
use sprocket::types::{GlobalMemoryLocation, NameTableMirroring};

/// The canonical 32 KiB PRG / 8 KiB CHR NROM header:
/// `4E 45 53 1A 02 01 00 00 ...`.
fn two_bank_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 16];
    rom[0..4].copy_from_slice(&[0x4E, 0x45, 0x53, 0x1A]);
    rom[4] = 2; // PRG chunks
    rom[5] = 1; // CHR chunks
    rom.extend(vec![0xEAu8; 2 * 16 * 1024]);
    rom.extend(vec![0u8; 8 * 1024]);
    rom
}

fn load_system(rom: &[u8]) -> System {
    let cartridge = Cartridge::load("test.nes".to_string(), rom, &HeaderDb::new()).unwrap();
    System::new(cartridge).unwrap()
}

#[test]
fn ines_header_creates_the_expected_regions() {
    let rom = two_bank_rom();
    let cartridge = Cartridge::load("test.nes".to_string(), &rom, &HeaderDb::new()).unwrap();
    assert_eq!(cartridge.mapper_number(), 0);
    assert_eq!(cartridge.name_table_mirroring(), NameTableMirroring::Horizontal);
    assert_eq!(cartridge.prg_rom().len(), 2 * 16 * 1024);
    assert_eq!(cartridge.chr_rom().len(), 8 * 1024);

    let system = System::new(cartridge).unwrap();
    // RAM, PPU registers, IO registers, two PRG banks, one CHR bank.
    assert_eq!(system.num_memory_regions(), 6);
}

#[test]
fn cpu_vectors_are_words_with_their_labels() {
    let system = load_system(&two_bank_rom());
    let last_bank = 1;
    assert_eq!(
        system.get_labels_at(GlobalMemoryLocation::prg(0xFFFC, last_bank)),
        vec!["_reset".to_string()]
    );
    for vector in [0xFFFA, 0xFFFC, 0xFFFE] {
        let (object, offset) = system.get_object(GlobalMemoryLocation::prg(vector, last_bank)).unwrap();
        assert_eq!(object.object_type, ObjectType::Word);
        assert_eq!(offset, 0);
    }
}

#[test]
fn default_disassembly_reaches_the_ppucont_register_label() {
    let mut rom = two_bank_rom();
    let prg = 16 + 16 * 1024; // second (last) bank, based at $C000
    rom[prg] = 0xA9; // LDA #$01
    rom[prg + 1] = 0x01;
    rom[prg + 2] = 0x8D; // STA $2000
    rom[prg + 3] = 0x00;
    rom[prg + 4] = 0x20;
    rom[prg + 5] = 0x60; // RTS
    rom[prg + 0x3FFC] = 0x00; // reset vector -> $C000
    rom[prg + 0x3FFD] = 0xC0;

    let mut system = load_system(&rom);
    let entry = system.entry_point().unwrap();
    assert_eq!(entry, GlobalMemoryLocation::prg(0xC000, 1));
    system.disassemble_from(entry).unwrap();

    let (lda, _) = system.get_object(GlobalMemoryLocation::prg(0xC000, 1)).unwrap();
    assert_eq!(lda.object_type, ObjectType::Code { size: 2 });
    assert_eq!(
        sprocket::expr::print::print(lda.operand_expression.as_ref().unwrap()),
        "#$1"
    );

    let (sta, _) = system.get_object(GlobalMemoryLocation::prg(0xC002, 1)).unwrap();
    assert_eq!(sta.object_type, ObjectType::Code { size: 3 });
    assert_eq!(
        sprocket::expr::print::print(sta.operand_expression.as_ref().unwrap()),
        "PPUCONT"
    );
    assert_eq!(
        system.get_labels_at(GlobalMemoryLocation::prg(0x2000, 0)),
        vec!["PPUCONT".to_string()]
    );
}

/// The listing row computed by the O(log N) tree walk must agree with a
/// plain forward iteration over every row.
#[test]
fn listing_row_lookup_agrees_with_forward_iteration() {
    let mut system = load_system(&{
        let mut rom = two_bank_rom();
        let prg = 16 + 16 * 1024;
        rom[prg + 0x3FFC] = 0x00;
        rom[prg + 0x3FFD] = 0xC0;
        rom
    });
    system.disassemble_from(system.entry_point().unwrap()).unwrap();

    let region = &system.regions.prg_banks[1];
    let rows: Vec<(u32, ListingItem)> = region.listing_items_from_row(0).collect();
    for probe in [0xC000u32, 0xC001, 0xC010, 0xFFFA, 0xFFFC] {
        let expected = rows
            .iter()
            .position(|&(addr, item)| addr == object_start(region, probe) && item == ListingItem::Data)
            .unwrap();
        assert_eq!(region.get_listing_row_for_address(probe).unwrap(), expected, "address {probe:#06X}");
    }
}

fn object_start(region: &sprocket::memory::MemoryRegion, addr: u32) -> u32 {
    let (_, offset) = region.get_object(addr).unwrap();
    addr - offset
}
