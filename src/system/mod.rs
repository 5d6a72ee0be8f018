pub mod apu_io;
pub mod signal;

pub use apu_io::ApuIo;
pub use signal::{SignalBus, SystemSignal};

use crate::cartridge::Cartridge;
use crate::disasm::disassemble;
use crate::expr::{evaluate, explore, fixup, references_of, EvalContext, FixupMode, Node, StateKind};
use crate::io::{BinaryReader, BinaryWriter, SaveFileLayout};
use crate::memory::{CommentSlot, MemoryObject, MemoryRegion, ObjectType};
use crate::refgraph::{Referent, Referrer};
use crate::symbol::{Define, DefineId, EnumElementId, EnumId, Label, LabelId, SymbolTables};
use crate::types::{AddressingMode, GlobalMemoryLocation};

use log::info;

/// Current System-block version. Version 1 (pre-enum-size, inline object
/// bytes) is still loadable; see [`SaveFileLayout::from_version`].
const SAVE_FILE_VERSION: u64 = 2;
const PRG_BANK_SIZE: usize = 16 * 1024;
const CHR_BANK_SIZE: usize = 8 * 1024;

/// The standard register names seeded at system creation, matching the
/// convention most 6502 disassembly listings use for the PPU and APU/IO
/// windows.
const DEFAULT_REGISTER_LABELS: &[(u16, &str)] = &[
    (0x2000, "PPUCONT"),
    (0x2001, "PPUMASK"),
    (0x2002, "PPUSTAT"),
    (0x2003, "OAMADDR"),
    (0x2004, "OAMDATA"),
    (0x2005, "PPUSCRL"),
    (0x2006, "PPUADDR"),
    (0x2007, "PPUDATA"),
    (0x4000, "SQ1_VOL"),
    (0x4001, "SQ1_SWEEP"),
    (0x4002, "SQ1_LO"),
    (0x4003, "SQ1_HI"),
    (0x4004, "SQ2_VOL"),
    (0x4005, "SQ2_SWEEP"),
    (0x4006, "SQ2_LO"),
    (0x4007, "SQ2_HI"),
    (0x4008, "TRI_LINEAR"),
    (0x400A, "TRI_LO"),
    (0x400B, "TRI_HI"),
    (0x400C, "NOISE_VOL"),
    (0x400E, "NOISE_HI"),
    (0x400F, "NOISE_LO"),
    (0x4010, "DMC_FREQ"),
    (0x4011, "DMC_RAW"),
    (0x4012, "DMC_START"),
    (0x4013, "DMC_LEN"),
    (0x4014, "OAMDMA"),
    (0x4015, "SND_CHN"),
    (0x4016, "JOY1"),
    (0x4017, "JOY2"),
];

/// Every memory region of the program database: internal RAM, the two
/// register windows, and one region per PRG/CHR ROM bank. Grouped into
/// one struct (rather than fields on [`System`] directly) so region
/// lookups borrow only this field, leaving the symbol tables free for a
/// simultaneous mutable borrow.
#[derive(Debug)]
pub struct RegionSet {
    pub cpu_ram: MemoryRegion,
    pub ppu_registers: MemoryRegion,
    pub io_registers: MemoryRegion,
    pub prg_banks: Vec<MemoryRegion>,
    pub chr_banks: Vec<MemoryRegion>,
}

impl RegionSet {
    fn from_cartridge(cartridge: &Cartridge) -> RegionSet {
        let prg_chunks: Vec<&[u8]> = cartridge.prg_rom().chunks(PRG_BANK_SIZE).collect();
        let bank_count = prg_chunks.len();
        let prg_banks = prg_chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                // The last bank holds the vectors and sits at $C000; every
                // other bank is a switchable $8000 window.
                let base = if i + 1 == bank_count { 0xC000 } else { 0x8000 };
                MemoryRegion::initialize_from_data(format!("PRG{}", i), base, chunk.to_vec())
            })
            .collect();
        let chr_banks = cartridge
            .chr_rom()
            .chunks(CHR_BANK_SIZE)
            .enumerate()
            .map(|(i, chunk)| MemoryRegion::initialize_from_data(format!("CHR{}", i), 0x0000, chunk.to_vec()))
            .collect();
        RegionSet {
            cpu_ram: MemoryRegion::initialize_empty("RAM", 0x0000, 0x0800),
            ppu_registers: MemoryRegion::initialize_empty("PPUREGS", 0x2000, 0x0008),
            io_registers: MemoryRegion::initialize_empty("IOREGS", 0x4000, 0x0020),
            prg_banks,
            chr_banks,
        }
    }

    pub fn count(&self) -> usize {
        3 + self.prg_banks.len() + self.chr_banks.len()
    }

    /// Resolves a location to its owning region and the absolute address
    /// within it, folding the CPU bus mirrors (RAM every `$0800`, PPU
    /// registers every 8 bytes) down to the canonical region addresses.
    pub fn get(&self, location: &GlobalMemoryLocation) -> Option<(&MemoryRegion, u32)> {
        let (region, address) = match self.locate(location)? {
            (RegionSlot::CpuRam, a) => (&self.cpu_ram, a),
            (RegionSlot::PpuRegisters, a) => (&self.ppu_registers, a),
            (RegionSlot::IoRegisters, a) => (&self.io_registers, a),
            (RegionSlot::Prg(i), a) => (self.prg_banks.get(i)?, a),
            (RegionSlot::Chr(i), a) => (self.chr_banks.get(i)?, a),
        };
        Some((region, address))
    }

    pub fn get_mut(&mut self, location: &GlobalMemoryLocation) -> Option<(&mut MemoryRegion, u32)> {
        let (slot, address) = self.locate(location)?;
        let region = match slot {
            RegionSlot::CpuRam => &mut self.cpu_ram,
            RegionSlot::PpuRegisters => &mut self.ppu_registers,
            RegionSlot::IoRegisters => &mut self.io_registers,
            RegionSlot::Prg(i) => self.prg_banks.get_mut(i)?,
            RegionSlot::Chr(i) => self.chr_banks.get_mut(i)?,
        };
        Some((region, address))
    }

    fn locate(&self, location: &GlobalMemoryLocation) -> Option<(RegionSlot, u32)> {
        if location.is_chr {
            let index = location.chr_rom_bank as usize;
            if index >= self.chr_banks.len() || location.address as u32 >= self.chr_banks[index].size {
                return None;
            }
            return Some((RegionSlot::Chr(index), location.address as u32));
        }
        let address = location.address as u32;
        match address {
            0x0000..=0x1FFF => Some((RegionSlot::CpuRam, address % 0x0800)),
            0x2000..=0x3FFF => Some((RegionSlot::PpuRegisters, 0x2000 + (address - 0x2000) % 8)),
            0x4000..=0x401F => Some((RegionSlot::IoRegisters, address)),
            0x4020..=0x5FFF => None,
            _ => {
                let index = location.prg_rom_bank as usize;
                let region = self.prg_banks.get(index)?;
                if address >= region.base_address && address < region.base_address + region.size {
                    Some((RegionSlot::Prg(index), address))
                } else {
                    None
                }
            }
        }
    }

    /// The canonical (mirror-folded, bank-normalized) identity of a
    /// location, used as the reference-graph key so `$0805` and `$0005`
    /// are one referrer, not two.
    pub fn canonical(&self, location: &GlobalMemoryLocation) -> Option<GlobalMemoryLocation> {
        let (slot, address) = self.locate(location)?;
        Some(match slot {
            RegionSlot::Chr(i) => GlobalMemoryLocation::chr(address as u16, i as u16),
            RegionSlot::Prg(i) => GlobalMemoryLocation::prg(address as u16, i as u16),
            _ => GlobalMemoryLocation::prg(address as u16, 0),
        })
    }
}

#[derive(Clone, Copy)]
enum RegionSlot {
    CpuRam,
    PpuRegisters,
    IoRegisters,
    Prg(usize),
    Chr(usize),
}

/// Evaluates expressions against the static program database: labels
/// resolve to their address, defines to their (cached) value, enum
/// elements to their value. There is no live CPU here, so the state
/// identifiers all read zero; instance-side evaluation supplies them.
pub struct SystemEvalContext<'a> {
    pub tables: &'a SymbolTables,
}

impl EvalContext for SystemEvalContext<'_> {
    fn label_address(&self, id: LabelId) -> Option<i64> {
        self.tables.labels.get(id).map(|label| label.location.address as i64)
    }

    fn define_value(&self, id: DefineId) -> Option<i64> {
        self.tables.defines.get(id)?.value(self).ok()
    }

    fn enum_element_value(&self, id: EnumElementId) -> Option<i64> {
        self.tables.enums.element_value(id)
    }

    fn state_value(&self, _kind: StateKind) -> i64 {
        0
    }
}

/// The static program database for one loaded cartridge: regions of typed
/// memory objects, the symbol tables, the reference graph, and the signal
/// bus hosts subscribe to. Execution state lives in
/// [`crate::instance::SystemInstance`]s created over this database.
#[derive(Debug)]
pub struct System {
    pub cartridge: Cartridge,
    pub regions: RegionSet,
    pub tables: SymbolTables,
    pub signals: SignalBus,
}

impl System {
    pub fn new(cartridge: Cartridge) -> Result<System, String> {
        if cartridge.prg_rom().is_empty() {
            return Err("cartridge has no PRG ROM".to_string());
        }
        let regions = RegionSet::from_cartridge(&cartridge);
        let mut system = System { cartridge, regions, tables: SymbolTables::default(), signals: SignalBus::default() };
        system.create_default_labels()?;
        Ok(system)
    }

    fn create_default_labels(&mut self) -> Result<(), String> {
        let last_bank = (self.regions.prg_banks.len() - 1) as u16;
        for vector in [0xFFFAu16, 0xFFFC, 0xFFFE] {
            self.mark_as_words(GlobalMemoryLocation::prg(vector, last_bank))?;
        }
        self.create_label(GlobalMemoryLocation::prg(0xFFFA, last_bank), "_nmi", false)?;
        self.create_label(GlobalMemoryLocation::prg(0xFFFC, last_bank), "_reset", false)?;
        self.create_label(GlobalMemoryLocation::prg(0xFFFE, last_bank), "_irqbrk", false)?;
        for &(address, name) in DEFAULT_REGISTER_LABELS {
            self.create_label(GlobalMemoryLocation::prg(address, 0), name, false)?;
        }
        Ok(())
    }

    pub fn num_memory_regions(&self) -> usize {
        self.regions.count()
    }

    /// The address execution starts at after reset: the word stored at
    /// the `$FFFC` vector. A target below `$C000` is assumed to live in
    /// the initially-selected low bank (bank 0).
    pub fn entry_point(&self) -> Result<GlobalMemoryLocation, String> {
        let last_bank = (self.regions.prg_banks.len() - 1) as u16;
        let low = self.read_byte(GlobalMemoryLocation::prg(0xFFFC, last_bank)).ok_or("reset vector is unreadable")?;
        let high = self.read_byte(GlobalMemoryLocation::prg(0xFFFD, last_bank)).ok_or("reset vector is unreadable")?;
        let target = u16::from_le_bytes([low, high]);
        let bank = if target >= 0xC000 || self.regions.prg_banks.len() == 1 { last_bank } else { 0 };
        Ok(GlobalMemoryLocation::prg(target, bank))
    }

    pub fn read_byte(&self, location: GlobalMemoryLocation) -> Option<u8> {
        let (region, address) = self.regions.get(&location)?;
        region.read_byte(address)
    }

    pub fn get_object(&self, location: GlobalMemoryLocation) -> Option<(&MemoryObject, u32)> {
        let (region, address) = self.regions.get(&location)?;
        region.get_object(address)
    }

    pub fn get_labels_at(&self, location: GlobalMemoryLocation) -> Vec<String> {
        let Some((object, _)) = self.get_object(location) else {
            return Vec::new();
        };
        object
            .labels
            .iter()
            .filter_map(|&id| self.tables.labels.get(id).map(|label| label.name.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Labels

    pub fn create_label(
        &mut self,
        location: GlobalMemoryLocation,
        name: impl Into<String>,
        user_created: bool,
    ) -> Result<LabelId, String> {
        let name = name.into();
        if name.is_empty() {
            return Err("label name cannot be empty".to_string());
        }
        let canonical = self.regions.canonical(&location).ok_or("no memory region at that address")?;
        let mut label = Label::new(name, canonical);
        label.auto_generated = !user_created;
        let id = self.tables.labels.insert(label);
        let (region, address) = self.regions.get_mut(&canonical).expect("canonical location must resolve");
        region.apply_label(address, id).map_err(|e| e.to_string())?;
        self.signals.emit(SystemSignal::LabelCreated(id, user_created));
        Ok(id)
    }

    pub fn delete_label(&mut self, id: LabelId) -> Result<(), String> {
        if self.tables.references.has_referrers(Referent::Label(id)) {
            return Err("label is referenced by other expressions".to_string());
        }
        let label = self.tables.labels.get(id).ok_or("no such label")?.clone();
        let nth = self.label_nth(id).unwrap_or(0);
        if let Some((region, address)) = self.regions.get_mut(&label.location) {
            region.delete_label(address, id).map_err(|e| e.to_string())?;
        }
        self.tables.labels.remove(id);
        self.signals.emit(SystemSignal::LabelDeleted(label.name, nth));
        Ok(())
    }

    /// Position of `id` among the labels sharing its name, i.e. the `nth`
    /// an expression leaf would use to pick it.
    pub fn label_nth(&self, id: LabelId) -> Option<u32> {
        let name = &self.tables.labels.get(id)?.name;
        let mut nth = 0;
        while let Some(candidate) = self.tables.labels.find_nth_by_name(name, nth) {
            if candidate == id {
                return Some(nth);
            }
            nth += 1;
        }
        None
    }

    // ------------------------------------------------------------------
    // Defines

    pub fn create_define(&mut self, name: impl Into<String>, source: &str) -> Result<DefineId, String> {
        let name = name.into();
        if self.tables.defines.find_by_name(&name).is_some() {
            return Err(format!("define '{}' already exists", name));
        }
        let mut expression = crate::expr::parse(source)?;
        fixup(&mut expression, &mut self.tables, FixupMode::ResolveExisting)?;
        require_fully_resolved(&expression)?;
        require_no_addressing_markers(&expression)?;
        let references = references_of(&expression);
        let id = self.tables.defines.insert(Define::new(name, expression));
        self.tables
            .references
            .set_references(Referrer::Define(id), references.into_iter().map(Referent::from).collect());
        self.signals.emit(SystemSignal::DefineCreated(id));
        Ok(id)
    }

    pub fn delete_define(&mut self, id: DefineId) -> Result<(), String> {
        if self.tables.references.has_referrers(Referent::Define(id)) {
            return Err("define is referenced by other expressions".to_string());
        }
        self.tables.references.clear_referrer(Referrer::Define(id));
        self.tables.defines.remove(id).ok_or("no such define")?;
        Ok(())
    }

    pub fn find_define(&self, name: &str) -> Option<DefineId> {
        self.tables.defines.find_by_name(name)
    }

    pub fn evaluate_define(&self, id: DefineId) -> Result<i64, String> {
        let define = self.tables.defines.get(id).ok_or("no such define")?;
        define.value(&SystemEvalContext { tables: &self.tables })
    }

    // ------------------------------------------------------------------
    // Enums

    pub fn create_enum(&mut self, name: impl Into<String>, size: u8) -> Result<EnumId, String> {
        let name = name.into();
        if !(size == 1 || size == 2) {
            return Err("enum size must be 1 or 2 bytes".to_string());
        }
        if self.tables.enums.find_enum_by_name(&name).is_some() {
            return Err(format!("enum '{}' already exists", name));
        }
        let id = self.tables.enums.insert_enum(name, size);
        self.signals.emit(SystemSignal::EnumCreated(id));
        Ok(id)
    }

    pub fn delete_enum(&mut self, id: EnumId) -> Result<(), String> {
        let e = self.tables.enums.get_enum(id).ok_or("no such enum")?;
        if self.tables.references.has_referrers(Referent::Enum(id)) {
            return Err("enum is the type of one or more memory objects".to_string());
        }
        for &element in &e.elements {
            if self.tables.references.has_referrers(Referent::EnumElement(element)) {
                return Err("an element of this enum is referenced by other expressions".to_string());
            }
        }
        let elements = e.elements.clone();
        let name = e.name.clone();
        for element in elements {
            self.tables.references.clear_referrer(Referrer::EnumElement(element));
        }
        self.tables.enums.remove_enum(id);
        self.signals.emit(SystemSignal::EnumDeleted(name));
        Ok(())
    }

    /// The element's value is an expression (so `BUTTON_A | BUTTON_B`
    /// works) evaluated eagerly; what the table stores is the resulting
    /// integer plus the reference edges the expression contributed.
    pub fn add_enum_element(&mut self, owner: EnumId, name: impl Into<String>, source: &str) -> Result<EnumElementId, String> {
        let mut expression = crate::expr::parse(source)?;
        fixup(&mut expression, &mut self.tables, FixupMode::ResolveExisting)?;
        require_fully_resolved(&expression)?;
        require_no_addressing_markers(&expression)?;
        let value = evaluate(&expression, &SystemEvalContext { tables: &self.tables })?;
        let references = references_of(&expression);
        let id = self.tables.enums.insert_element(owner, name, value)?;
        self.tables
            .references
            .set_references(Referrer::EnumElement(id), references.into_iter().map(Referent::from).collect());
        self.signals.emit(SystemSignal::EnumElementAdded(id));
        Ok(id)
    }

    pub fn set_enum_element_value(&mut self, id: EnumElementId, source: &str) -> Result<(), String> {
        if self.tables.references.has_referrers(Referent::EnumElement(id)) {
            return Err("enum element is referenced by other expressions".to_string());
        }
        let mut expression = crate::expr::parse(source)?;
        fixup(&mut expression, &mut self.tables, FixupMode::ResolveExisting)?;
        require_fully_resolved(&expression)?;
        let value = evaluate(&expression, &SystemEvalContext { tables: &self.tables })?;
        let references = references_of(&expression);
        self.tables.enums.set_element_value(id, value)?;
        self.tables
            .references
            .set_references(Referrer::EnumElement(id), references.into_iter().map(Referent::from).collect());
        self.signals.emit(SystemSignal::EnumElementChanged(id));
        Ok(())
    }

    pub fn delete_enum_element(&mut self, id: EnumElementId) -> Result<(), String> {
        if self.tables.references.has_referrers(Referent::EnumElement(id)) {
            return Err("enum element is referenced by other expressions".to_string());
        }
        self.tables.references.clear_referrer(Referrer::EnumElement(id));
        let element = self.tables.enums.remove_element(id).ok_or("no such enum element")?;
        self.signals.emit(SystemSignal::EnumElementDeleted(element.name));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Memory typing

    pub fn mark_as_undefined(&mut self, location: GlobalMemoryLocation) -> Result<(), String> {
        let canonical = self.regions.canonical(&location).ok_or("no memory region at that address")?;
        let (region, address) = self.regions.get_mut(&canonical).ok_or("no memory region at that address")?;
        region.mark_as_undefined(address).map_err(|e| e.to_string())?;
        // Narrowing discards the old object's operand and enum typing, so
        // the reference graph must forget this location's edges too.
        self.tables.references.clear_referrer(Referrer::Operand(canonical));
        self.tables.references.clear_referrer(Referrer::TypedObject(canonical));
        Ok(())
    }

    pub fn mark_as_bytes(&mut self, location: GlobalMemoryLocation, count: u32) -> Result<(), String> {
        let (region, address) = self.regions.get_mut(&location).ok_or("no memory region at that address")?;
        region.mark_as_bytes(address, count).map_err(|e| e.to_string())
    }

    pub fn mark_as_words(&mut self, location: GlobalMemoryLocation) -> Result<(), String> {
        let (region, address) = self.regions.get_mut(&location).ok_or("no memory region at that address")?;
        region.mark_as_words(address).map_err(|e| e.to_string())
    }

    pub fn mark_as_code(&mut self, location: GlobalMemoryLocation, size: u8) -> Result<(), String> {
        let (region, address) = self.regions.get_mut(&location).ok_or("no memory region at that address")?;
        region.mark_as_code(address, size).map_err(|e| e.to_string())
    }

    pub fn mark_as_string(&mut self, location: GlobalMemoryLocation, len: u32) -> Result<(), String> {
        let (region, address) = self.regions.get_mut(&location).ok_or("no memory region at that address")?;
        region.mark_as_string(address, len).map_err(|e| e.to_string())
    }

    pub fn mark_as_enum(&mut self, location: GlobalMemoryLocation, id: EnumId) -> Result<(), String> {
        let size = self.tables.enums.get_enum(id).ok_or("no such enum")?.size;
        let canonical = self.regions.canonical(&location).ok_or("no memory region at that address")?;
        let (region, address) = self.regions.get_mut(&canonical).ok_or("no memory region at that address")?;
        region.mark_as_enum(address, id, size).map_err(|e| e.to_string())?;
        self.tables
            .references
            .set_references(Referrer::TypedObject(canonical), vec![Referent::Enum(id)]);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operand expressions and comments

    /// Parses, resolves, and validates `source` against the object's own
    /// addressing constraints before anything is stored; a failure at any
    /// stage leaves the object and the reference graph untouched.
    pub fn set_operand_expression(&mut self, location: GlobalMemoryLocation, source: &str) -> Result<(), String> {
        let canonical = self.regions.canonical(&location).ok_or("no memory region at that address")?;
        let mut expression = crate::expr::parse(source)?;
        fixup(&mut expression, &mut self.tables, FixupMode::ResolveExisting)?;
        validate_expression_shape(&expression)?;

        let (region, address) = self.regions.get_mut(&canonical).ok_or("no memory region at that address")?;
        let (object, _) = region.get_object(address).ok_or("no object at that address")?;
        match object.object_type {
            ObjectType::Code { .. } => {
                let opcode = region.read_byte(address).ok_or("code object has no backing bytes")?;
                let mode = crate::disasm::opcode_info(opcode).mode;
                validate_operand_for_mode(&expression, mode, address, &SystemEvalContext { tables: &self.tables })?;
            }
            ObjectType::Byte | ObjectType::Word | ObjectType::Enum { .. } => {}
            ObjectType::Undefined | ObjectType::String { .. } => {
                return Err("this object kind does not take an operand expression".to_string());
            }
        }

        let references = references_of(&expression);
        region.set_operand_expression(address, Some(expression)).map_err(|e| e.to_string())?;
        self.tables
            .references
            .set_references(Referrer::Operand(canonical), references.into_iter().map(Referent::from).collect());
        Ok(())
    }

    pub fn clear_operand_expression(&mut self, location: GlobalMemoryLocation) -> Result<(), String> {
        let canonical = self.regions.canonical(&location).ok_or("no memory region at that address")?;
        let (region, address) = self.regions.get_mut(&canonical).ok_or("no memory region at that address")?;
        region.set_operand_expression(address, None).map_err(|e| e.to_string())?;
        self.tables.references.clear_referrer(Referrer::Operand(canonical));
        Ok(())
    }

    /// Setting a slot to an empty string removes that comment. Reference
    /// edges are recomputed over all three slots since they share one
    /// referrer key.
    pub fn set_comment(&mut self, location: GlobalMemoryLocation, slot: CommentSlot, text: &str) -> Result<(), String> {
        let canonical = self.regions.canonical(&location).ok_or("no memory region at that address")?;
        let (region, address) = self.regions.get_mut(&canonical).ok_or("no memory region at that address")?;
        region
            .with_object_mut(address, |object| {
                let target = object.comments.slot_mut(slot);
                if text.is_empty() {
                    *target = None;
                } else {
                    let mut comment = crate::comment::Comment::default();
                    comment.set(text);
                    *target = Some(comment);
                }
            })
            .map_err(|e| e.to_string())?;
        self.refresh_comment_references(canonical);
        Ok(())
    }

    fn refresh_comment_references(&mut self, canonical: GlobalMemoryLocation) {
        let Some((region, address)) = self.regions.get_mut(&canonical) else {
            return;
        };
        let Some(object) = region.get_object_mut(address) else {
            return;
        };
        let mut comments = object.comments.clone();
        let mut references = Vec::new();
        for comment in [&mut comments.pre, &mut comments.eol, &mut comments.post].into_iter().flatten() {
            references.extend(comment.fixup(&mut self.tables));
        }
        // Write the fixed-up trees back so resolved leaves display by id.
        let (region, address) = self.regions.get_mut(&canonical).expect("location resolved a moment ago");
        if let Some(object) = region.get_object_mut(address) {
            object.comments = comments;
        }
        self.tables
            .references
            .set_references(Referrer::Comment(canonical), references.into_iter().map(Referent::from).collect());
    }

    // ------------------------------------------------------------------
    // Disassembly

    /// Runs the breadth-first disassembly driver from `start` and syncs
    /// the reference graph for every operand expression it created. Emits
    /// `LabelCreated` for each auto-generated branch-target label and
    /// `DisassemblyStopped` once the work queue drains.
    pub fn disassemble_from(&mut self, start: GlobalMemoryLocation) -> Result<usize, String> {
        if start.is_chr {
            return Err("cannot disassemble CHR ROM".to_string());
        }
        let bank = start.prg_rom_bank;
        let region = self
            .regions
            .prg_banks
            .get_mut(bank as usize)
            .ok_or_else(|| format!("no PRG bank {}", bank))?;
        let labels_before: std::collections::HashSet<LabelId> = self.tables.labels.iter().map(|(id, _)| id).collect();

        let decoded = disassemble(region, start.address as u32, bank, &mut self.tables)?;
        info!(target: "disasm", "disassembled {} instructions from {}", decoded, start);

        let new_labels: Vec<LabelId> = self
            .tables
            .labels
            .iter()
            .map(|(id, _)| id)
            .filter(|id| !labels_before.contains(id))
            .collect();
        for id in new_labels {
            self.signals.emit(SystemSignal::LabelCreated(id, false));
        }
        self.sync_region_references(RegionSlot::Prg(bank as usize));
        self.signals.emit(SystemSignal::DisassemblyStopped(start));
        Ok(decoded)
    }

    /// Re-records reference-graph edges for every operand expression in a
    /// region. Used after bulk mutations (disassembly, project load) where
    /// per-expression bookkeeping would repeat the same walk many times.
    fn sync_region_references(&mut self, slot: RegionSlot) {
        let (region, bank, is_chr) = match slot {
            RegionSlot::CpuRam => (&self.regions.cpu_ram, 0, false),
            RegionSlot::PpuRegisters => (&self.regions.ppu_registers, 0, false),
            RegionSlot::IoRegisters => (&self.regions.io_registers, 0, false),
            RegionSlot::Prg(i) => (&self.regions.prg_banks[i], i as u16, false),
            RegionSlot::Chr(i) => (&self.regions.chr_banks[i], i as u16, true),
        };
        let mut updates = Vec::new();
        let mut offset = 0u32;
        while offset < region.size {
            let address = region.base_address + offset;
            let (object, _) = region.get_object(address).expect("offset within region");
            if let Some(expression) = &object.operand_expression {
                let location = if is_chr {
                    GlobalMemoryLocation::chr(address as u16, bank)
                } else {
                    GlobalMemoryLocation::prg(address as u16, bank)
                };
                updates.push((location, references_of(expression)));
            }
            offset += object.size();
        }
        for (location, references) in updates {
            self.tables
                .references
                .set_references(Referrer::Operand(location), references.into_iter().map(Referent::from).collect());
        }
    }

    // ------------------------------------------------------------------
    // Persistence

    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_varint(SAVE_FILE_VERSION);
        let defines: Vec<&Define> = self.tables.defines.iter().map(|(_, d)| d).collect();
        writer.write_varint(defines.len() as u64);
        for define in defines {
            define.save(writer);
        }
        let labels: Vec<&Label> = self.tables.labels.iter().map(|(_, l)| l).collect();
        writer.write_varint(labels.len() as u64);
        for label in labels {
            label.save(writer);
        }
        self.tables.enums.save(writer);
        let enums = &self.tables.enums;
        self.regions.cpu_ram.save(writer, enums);
        self.regions.ppu_registers.save(writer, enums);
        self.regions.io_registers.save(writer, enums);
        self.cartridge.save(writer);
        writer.write_varint(self.regions.prg_banks.len() as u64);
        for region in &self.regions.prg_banks {
            region.save(writer, enums);
        }
        writer.write_varint(self.regions.chr_banks.len() as u64);
        for region in &self.regions.chr_banks {
            region.save(writer, enums);
        }
    }

    pub fn load(reader: &mut BinaryReader) -> Result<System, String> {
        let version = reader.read_varint()?;
        let layout = SaveFileLayout::from_version(version)?;
        let mut tables = SymbolTables::default();
        let define_count = reader.read_varint()?;
        for _ in 0..define_count {
            tables.defines.insert(Define::load(reader)?);
        }
        let label_count = reader.read_varint()?;
        for _ in 0..label_count {
            tables.labels.insert(Label::load(reader)?);
        }
        tables.enums = crate::symbol::enum_table::EnumTable::load(reader, layout.enum_sizes)?;

        let cpu_ram = MemoryRegion::load(reader, &tables.enums, layout)?;
        let ppu_registers = MemoryRegion::load(reader, &tables.enums, layout)?;
        let io_registers = MemoryRegion::load(reader, &tables.enums, layout)?;
        let cartridge = Cartridge::load_saved(reader)?;
        let prg_bank_count = reader.read_varint()?;
        let mut prg_banks = Vec::with_capacity(prg_bank_count as usize);
        for _ in 0..prg_bank_count {
            prg_banks.push(MemoryRegion::load(reader, &tables.enums, layout)?);
        }
        let chr_bank_count = reader.read_varint()?;
        let mut chr_banks = Vec::with_capacity(chr_bank_count as usize);
        for _ in 0..chr_bank_count {
            chr_banks.push(MemoryRegion::load(reader, &tables.enums, layout)?);
        }

        let mut system = System {
            cartridge,
            regions: RegionSet { cpu_ram, ppu_registers, io_registers, prg_banks, chr_banks },
            tables,
            signals: SignalBus::default(),
        };
        system.refresh_after_load()?;
        Ok(system)
    }

    /// Rebuilds every transient structure persistence deliberately skips:
    /// label lists on objects, resolved ids inside expression trees, and
    /// the whole reference graph.
    fn refresh_after_load(&mut self) -> Result<(), String> {
        let labels: Vec<(LabelId, GlobalMemoryLocation)> =
            self.tables.labels.iter().map(|(id, label)| (id, label.location)).collect();
        for (id, location) in labels {
            if let Some((region, address)) = self.regions.get_mut(&location) {
                region.apply_label(address, id).map_err(|e| e.to_string())?;
            }
        }

        let define_ids: Vec<DefineId> = self.tables.defines.iter().map(|(id, _)| id).collect();
        for id in define_ids {
            let mut expression = self.tables.defines.get(id).ok_or("define vanished during load")?.expression.clone();
            fixup(&mut expression, &mut self.tables, FixupMode::ResolveExisting)?;
            let references = references_of(&expression);
            self.tables.defines.set_expression(id, expression)?;
            self.tables
                .references
                .set_references(Referrer::Define(id), references.into_iter().map(Referent::from).collect());
        }

        for slot in self.all_region_slots() {
            self.refresh_region_after_load(slot)?;
        }
        Ok(())
    }

    fn all_region_slots(&self) -> Vec<RegionSlot> {
        let mut slots = vec![RegionSlot::CpuRam, RegionSlot::PpuRegisters, RegionSlot::IoRegisters];
        slots.extend((0..self.regions.prg_banks.len()).map(RegionSlot::Prg));
        slots.extend((0..self.regions.chr_banks.len()).map(RegionSlot::Chr));
        slots
    }

    fn refresh_region_after_load(&mut self, slot: RegionSlot) -> Result<(), String> {
        let (region, bank, is_chr) = match slot {
            RegionSlot::CpuRam => (&self.regions.cpu_ram, 0u16, false),
            RegionSlot::PpuRegisters => (&self.regions.ppu_registers, 0, false),
            RegionSlot::IoRegisters => (&self.regions.io_registers, 0, false),
            RegionSlot::Prg(i) => (&self.regions.prg_banks[i], i as u16, false),
            RegionSlot::Chr(i) => (&self.regions.chr_banks[i], i as u16, true),
        };
        let mut work = Vec::new();
        let mut offset = 0u32;
        while offset < region.size {
            let address = region.base_address + offset;
            let (object, _) = region.get_object(address).expect("offset within region");
            let enum_type = match object.object_type {
                ObjectType::Enum { enum_id, .. } => Some(enum_id),
                _ => None,
            };
            if object.operand_expression.is_some() || !object.comments.is_empty() || enum_type.is_some() {
                work.push((address, object.operand_expression.clone(), enum_type));
            }
            offset += object.size();
        }

        for (address, expression, enum_type) in work {
            let location = if is_chr {
                GlobalMemoryLocation::chr(address as u16, bank)
            } else {
                GlobalMemoryLocation::prg(address as u16, bank)
            };
            if let Some(mut expression) = expression {
                fixup(&mut expression, &mut self.tables, FixupMode::ResolveExisting)?;
                let references = references_of(&expression);
                let (region, region_address) = self.regions.get_mut(&location).ok_or("region vanished during load")?;
                region.set_operand_expression(region_address, Some(expression)).map_err(|e| e.to_string())?;
                self.tables
                    .references
                    .set_references(Referrer::Operand(location), references.into_iter().map(Referent::from).collect());
            }
            if let Some(enum_id) = enum_type {
                self.tables
                    .references
                    .set_references(Referrer::TypedObject(location), vec![Referent::Enum(enum_id)]);
            }
            self.refresh_comment_references(location);
        }
        Ok(())
    }
}

/// Rejects the placement errors the grammar alone can't: `A` anywhere but
/// the expression root, and `X`/`Y` anywhere but the index position the
/// parser already folds into `IndexedX`/`IndexedY`.
fn validate_expression_shape(root: &Node) -> Result<(), String> {
    let mut error = None;
    // The walk visits the root first, so the latch sees exactly one node
    // with `is_root` set.
    let mut is_root = true;
    explore(root, &mut |node| {
        if error.is_none() {
            match node {
                Node::Accumulator if !is_root => {
                    error = Some("'A' is only valid as the entire operand".to_string());
                }
                Node::Name(name) if name == "X" || name == "x" || name == "Y" || name == "y" => {
                    error = Some(format!("'{}' is only valid as the index of a ',{}' suffix", name, name.to_uppercase()));
                }
                _ => {}
            }
        }
        is_root = false;
    });
    match error {
        Some(message) => Err(message),
        None => Ok(()),
    }
}

fn require_fully_resolved(root: &Node) -> Result<(), String> {
    let mut unresolved = None;
    explore(root, &mut |node| {
        if unresolved.is_none() {
            if let Node::Name(name) = node {
                unresolved = Some(name.clone());
            }
        }
    });
    match unresolved {
        Some(name) => Err(format!("'{}' is not a known label, define, or enum element", name)),
        None => Ok(()),
    }
}

fn require_no_addressing_markers(root: &Node) -> Result<(), String> {
    let mut error = None;
    explore(root, &mut |node| {
        if error.is_none() {
            match node {
                Node::Immediate(_) | Node::IndexedX(_) | Node::IndexedY(_) | Node::Accumulator => {
                    error = Some("addressing-mode markers are not valid here".to_string());
                }
                Node::SystemInstanceState(_) => {
                    error = Some("live machine state is not valid here".to_string());
                }
                _ => {}
            }
        }
    });
    match error {
        Some(message) => Err(message),
        None => Ok(()),
    }
}

/// Checks an operand expression against the instruction's addressing
/// mode: the root node shape must match the mode, and where the value is
/// computable, immediates must fit a byte and branch displacements must
/// fit the signed-byte range. Expressions whose leaves are still
/// unresolved names skip the range checks (their shape is still checked).
fn validate_operand_for_mode(
    expression: &Node,
    mode: AddressingMode,
    address: u32,
    ctx: &SystemEvalContext,
) -> Result<(), String> {
    use AddressingMode::*;
    match mode {
        Implicit => return Err("this instruction takes no operand".to_string()),
        Accumulator => {
            if !expression.is_accumulator() {
                return Err("this instruction's operand must be 'A'".to_string());
            }
            return Ok(());
        }
        Immediate => {
            let Node::Immediate(inner) = expression else {
                return Err("this instruction's operand must be an immediate ('#')".to_string());
            };
            if let Ok(value) = evaluate(inner, ctx) {
                if !(0..=255).contains(&value) {
                    return Err(format!("immediate value {} is out of range 0..255", value));
                }
            }
            return Ok(());
        }
        Relative => {
            if let Ok(target) = evaluate(expression, ctx) {
                let displacement = target - (address as i64 + 2);
                if !(-128..=127).contains(&displacement) {
                    return Err(format!("branch displacement {} is out of range -128..127", displacement));
                }
            }
            return Ok(());
        }
        ZeroPageX | AbsoluteX => {
            if !matches!(expression, Node::IndexedX(_)) {
                return Err("this instruction's operand must be ',X' indexed".to_string());
            }
        }
        IndirectX => {
            let indexed_inside = matches!(expression, Node::Parens(inner) if matches!(**inner, Node::IndexedX(_)));
            if !indexed_inside {
                return Err("this instruction's operand must be '(..,X)' indexed".to_string());
            }
        }
        ZeroPageY | AbsoluteY | IndirectY => {
            if !matches!(expression, Node::IndexedY(_)) {
                return Err("this instruction's operand must be ',Y' indexed".to_string());
            }
        }
        Indirect => {
            if !matches!(expression, Node::Parens(_)) {
                return Err("this instruction's operand must be parenthesized".to_string());
            }
        }
        ZeroPage | Absolute => {
            if matches!(expression, Node::Immediate(_) | Node::IndexedX(_) | Node::IndexedY(_) | Node::Accumulator) {
                return Err("this instruction's operand must be a plain address".to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::cartridge::test_data;
    use crate::cartridge::HeaderDb;

    fn nrom_system() -> System {
        let rom = test_data::raw_ines_rom(2, 1, 0);
        let cartridge = Cartridge::load("test".to_string(), &rom, &HeaderDb::new()).unwrap();
        System::new(cartridge).unwrap()
    }

    /// A one-bank cartridge whose reset code is `LDA #$01; STA $2000; RTS`.
    fn system_with_reset_code() -> System {
        let mut rom = test_data::raw_ines_rom(1, 1, 0);
        let prg = 16;
        rom[prg] = 0xA9; // LDA #$01
        rom[prg + 1] = 0x01;
        rom[prg + 2] = 0x8D; // STA $2000
        rom[prg + 3] = 0x00;
        rom[prg + 4] = 0x20;
        rom[prg + 5] = 0x60; // RTS
        rom[prg + 0x3FFC] = 0x00; // reset vector -> $C000
        rom[prg + 0x3FFD] = 0xC0;
        let cartridge = Cartridge::load("test".to_string(), &rom, &HeaderDb::new()).unwrap();
        System::new(cartridge).unwrap()
    }

    #[test]
    fn a_two_bank_nrom_image_creates_six_regions() {
        let system = nrom_system();
        assert_eq!(system.num_memory_regions(), 6);
        assert_eq!(system.regions.prg_banks[0].base_address, 0x8000);
        assert_eq!(system.regions.prg_banks[1].base_address, 0xC000);
    }

    #[test]
    fn vectors_are_words_with_their_default_labels() {
        let system = nrom_system();
        let reset = GlobalMemoryLocation::prg(0xFFFC, 1);
        assert_eq!(system.get_labels_at(reset), vec!["_reset".to_string()]);
        let (object, _) = system.get_object(GlobalMemoryLocation::prg(0xFFFA, 1)).unwrap();
        assert_eq!(object.object_type, ObjectType::Word);
    }

    #[test]
    fn register_labels_are_seeded() {
        let system = nrom_system();
        assert_eq!(system.get_labels_at(GlobalMemoryLocation::prg(0x2000, 0)), vec!["PPUCONT".to_string()]);
        assert_eq!(system.get_labels_at(GlobalMemoryLocation::prg(0x4016, 0)), vec!["JOY1".to_string()]);
    }

    #[test]
    fn ram_mirrors_resolve_to_one_canonical_location() {
        let system = nrom_system();
        let canonical = system.regions.canonical(&GlobalMemoryLocation::prg(0x0805, 3)).unwrap();
        assert_eq!(canonical, GlobalMemoryLocation::prg(0x0005, 0));
    }

    #[test]
    fn default_disassembly_reaches_the_seeded_register_label() {
        let mut system = system_with_reset_code();
        let entry = system.entry_point().unwrap();
        assert_eq!(entry.address, 0xC000);
        let decoded = system.disassemble_from(entry).unwrap();
        assert_eq!(decoded, 3);

        let (lda, _) = system.get_object(GlobalMemoryLocation::prg(0xC000, 0)).unwrap();
        assert_eq!(lda.object_type, ObjectType::Code { size: 2 });
        let (sta, _) = system.get_object(GlobalMemoryLocation::prg(0xC002, 0)).unwrap();
        assert_eq!(sta.object_type, ObjectType::Code { size: 3 });

        let expression = sta.operand_expression.as_ref().unwrap();
        assert_eq!(crate::expr::print::print(expression), "PPUCONT");
        let ppucont = system.tables.labels.find_by_name("PPUCONT").unwrap();
        assert!(system.tables.references.has_referrers(Referent::Label(ppucont)));
    }

    #[test]
    fn define_round_trip_evaluates_and_blocks_deletion_while_referenced() {
        let mut system = nrom_system();
        let foo = system.create_define("FOO", "1 + 2").unwrap();
        assert_eq!(system.evaluate_define(foo).unwrap(), 3);

        let bar = system.create_define("BAR", "FOO * 2").unwrap();
        assert_eq!(system.evaluate_define(bar).unwrap(), 6);
        assert!(system.delete_define(foo).is_err());
        system.delete_define(bar).unwrap();
        system.delete_define(foo).unwrap();
    }

    #[test]
    fn forward_undefined_names_reject_the_whole_define() {
        let mut system = nrom_system();
        assert!(system.create_define("BAD", "MISSING + 1").is_err());
        assert!(system.find_define("BAD").is_none());
    }

    #[test]
    fn referenced_labels_cannot_be_deleted() {
        let mut system = system_with_reset_code();
        system.disassemble_from(system.entry_point().unwrap()).unwrap();
        let ppucont = system.tables.labels.find_by_name("PPUCONT").unwrap();
        assert!(system.delete_label(ppucont).is_err());

        let unused = system.tables.labels.find_by_name("SQ1_VOL").unwrap();
        system.delete_label(unused).unwrap();
        assert!(system.tables.labels.find_by_name("SQ1_VOL").is_none());
    }

    #[test]
    fn enum_element_value_changes_are_blocked_while_referenced() {
        let mut system = nrom_system();
        let buttons = system.create_enum("ButtonMask", 1).unwrap();
        let a = system.add_enum_element(buttons, "BUTTON_A", "$80").unwrap();
        system.create_define("MASK", "BUTTON_A").unwrap();
        assert!(system.set_enum_element_value(a, "$40").is_err());
        assert!(system.delete_enum(buttons).is_err());
    }

    #[test]
    fn marking_memory_as_an_enum_uses_the_enum_size_and_records_the_edge() {
        let mut system = nrom_system();
        let flags = system.create_enum("Flags", 2).unwrap();
        let location = GlobalMemoryLocation::prg(0x8000, 0);
        system.mark_as_enum(location, flags).unwrap();
        let (object, _) = system.get_object(location).unwrap();
        assert_eq!(object.object_type, ObjectType::Enum { enum_id: flags, size: 2 });
        assert!(system.tables.references.has_referrers(Referent::Enum(flags)));

        system.mark_as_undefined(location).unwrap();
        assert!(!system.tables.references.has_referrers(Referent::Enum(flags)));
    }

    #[test]
    fn operand_validation_rejects_out_of_range_immediates() {
        let mut system = system_with_reset_code();
        system.disassemble_from(system.entry_point().unwrap()).unwrap();
        let lda = GlobalMemoryLocation::prg(0xC000, 0);
        assert!(system.set_operand_expression(lda, "#$1FF").is_err());
        system.set_operand_expression(lda, "#$42").unwrap();
    }

    /// One undefined byte object per offset, in the version-1 layout:
    /// no flat-memory block, each backed object's byte written inline.
    fn write_legacy_region(writer: &mut BinaryWriter, name: &str, base: u32, size: u32, backed: bool, fill: u8) {
        writer.write_string(name);
        writer.write_u32(base);
        writer.write_u32(size);
        writer.write_varint(size as u64);
        for _ in 0..size {
            writer.write_u8(0); // Undefined
            writer.write_bool(backed);
            writer.write_bool(false); // no operand expression
            writer.write_bool(false); // no pre comment
            writer.write_bool(false); // no eol comment
            writer.write_bool(false); // no post comment
            writer.write_varint(0); // blank lines
            writer.write_bool(false); // default blank line
            if backed {
                writer.write_u8(fill);
            }
        }
    }

    #[test]
    fn version_one_save_files_still_load() {
        let rom = test_data::raw_ines_rom(1, 1, 0);
        let cartridge = Cartridge::load("legacy".to_string(), &rom, &HeaderDb::new()).unwrap();

        let mut buf = Vec::new();
        {
            let mut writer = BinaryWriter::new(&mut buf);
            writer.write_varint(1); // pre-enum-size, inline-object-byte layout
            writer.write_varint(0); // defines
            writer.write_varint(0); // labels
            writer.write_varint(1); // enums: one, written without a size byte
            writer.write_string("Flags");
            writer.write_varint(1);
            writer.write_string("F0");
            writer.write_signed_varint(1);
            write_legacy_region(&mut writer, "RAM", 0x0000, 0x0800, false, 0);
            write_legacy_region(&mut writer, "PPUREGS", 0x2000, 0x0008, false, 0);
            write_legacy_region(&mut writer, "IOREGS", 0x4000, 0x0020, false, 0);
            cartridge.save(&mut writer);
            writer.write_varint(1);
            write_legacy_region(&mut writer, "PRG0", 0xC000, 0x4000, true, 0xEA);
            writer.write_varint(1);
            write_legacy_region(&mut writer, "CHR0", 0x0000, 0x2000, true, 0x00);
        }

        let mut cursor = &buf[..];
        let system = System::load(&mut BinaryReader::new(&mut cursor)).unwrap();
        // RAM, PPU registers, IO registers, one PRG bank, one CHR bank.
        assert_eq!(system.num_memory_regions(), 5);
        let flags = system.tables.enums.find_enum_by_name("Flags").unwrap();
        assert_eq!(system.tables.enums.get_enum(flags).unwrap().size, 1);
        assert_eq!(system.read_byte(GlobalMemoryLocation::prg(0xC000, 0)), Some(0xEA));
    }

    #[test]
    fn unknown_save_file_versions_are_reported_not_fatal() {
        let mut buf = Vec::new();
        BinaryWriter::new(&mut buf).write_varint(99);
        let mut cursor = &buf[..];
        let error = System::load(&mut BinaryReader::new(&mut cursor)).unwrap_err();
        assert!(error.contains("version"));
    }

    #[test]
    fn system_save_load_round_trips_the_database() {
        let mut system = system_with_reset_code();
        system.disassemble_from(system.entry_point().unwrap()).unwrap();
        system.create_define("FOO", "1 + 2").unwrap();
        system
            .set_comment(GlobalMemoryLocation::prg(0xC000, 0), CommentSlot::Eol, "entry {FOO}")
            .unwrap();

        let mut buf = Vec::new();
        system.save(&mut BinaryWriter::new(&mut buf));
        let mut cursor = &buf[..];
        let restored = System::load(&mut BinaryReader::new(&mut cursor)).unwrap();

        assert_eq!(restored.num_memory_regions(), system.num_memory_regions());
        let foo = restored.find_define("FOO").unwrap();
        assert_eq!(restored.evaluate_define(foo).unwrap(), 3);
        assert_eq!(
            restored.get_labels_at(GlobalMemoryLocation::prg(0xFFFC, 0)),
            vec!["_reset".to_string()]
        );
        let (sta, _) = restored.get_object(GlobalMemoryLocation::prg(0xC002, 0)).unwrap();
        let expression = sta.operand_expression.as_ref().unwrap();
        assert_eq!(crate::expr::print::print(expression), "PPUCONT");
        let ppucont = restored.tables.labels.find_by_name("PPUCONT").unwrap();
        assert!(restored.tables.references.has_referrers(Referent::Label(ppucont)));
        assert!(restored.tables.references.has_referrers(Referent::Define(foo)));
    }
}
