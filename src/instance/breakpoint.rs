use bitvec::prelude::*;
use itertools::Itertools;
use log::warn;

use crate::expr::{explore_mut, EvalContext, Node, StateKind};
use crate::io::{BinaryReader, BinaryWriter};
use crate::symbol::SymbolTables;
use crate::system::SystemEvalContext;
use crate::types::GlobalMemoryLocation;
use std::collections::HashMap;

/// What kind of bus access a breakpoint observed. `Execute` is the
/// opcode fetch of the instruction about to run; `Read`/`Write` are the
/// data accesses the instruction performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// A breakpoint is keyed either to an address in a specific ROM bank
/// (only fires when that bank is mapped in) or to a bare CPU address
/// (fires regardless of banking).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BreakpointKey {
    Banked(GlobalMemoryLocation),
    Address(u16),
}

impl BreakpointKey {
    pub fn address(&self) -> u16 {
        match self {
            BreakpointKey::Banked(location) => location.address,
            BreakpointKey::Address(address) => *address,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BreakpointInfo {
    pub key: BreakpointKey,
    pub enabled: bool,
    pub break_on_read: bool,
    pub break_on_write: bool,
    pub break_on_execute: bool,
    /// The condition as the user wrote it, kept for display and
    /// persistence so pretty-printing round-trips.
    condition: Option<Node>,
    /// The evaluable form: state names bound to `SystemInstanceState`
    /// leaves and symbol references folded to constants, so the worker
    /// thread never touches the symbol tables.
    compiled_condition: Option<Node>,
}

impl BreakpointInfo {
    pub fn new(key: BreakpointKey) -> BreakpointInfo {
        BreakpointInfo {
            key,
            enabled: true,
            break_on_read: false,
            break_on_write: false,
            break_on_execute: true,
            condition: None,
            compiled_condition: None,
        }
    }

    pub fn set_condition(&mut self, source: &str, tables: Option<&SymbolTables>) -> Result<(), String> {
        let parsed = crate::expr::parse(source)?;
        let compiled = compile_condition(&parsed, tables)?;
        self.condition = Some(parsed);
        self.compiled_condition = Some(compiled);
        Ok(())
    }

    pub fn clear_condition(&mut self) {
        self.condition = None;
        self.compiled_condition = None;
    }

    pub fn condition(&self) -> Option<&Node> {
        self.condition.as_ref()
    }

    pub fn condition_text(&self) -> Option<String> {
        self.condition.as_ref().map(crate::expr::print::print)
    }

    /// Whether this breakpoint fires for `kind` given the current machine
    /// state. An absent condition always fires; a condition that fails to
    /// evaluate fires too (and warns), so a broken predicate surfaces as
    /// a pause the user can inspect rather than a silently dead
    /// breakpoint.
    pub fn should_fire(&self, kind: AccessKind, ctx: &dyn EvalContext) -> bool {
        if !self.enabled {
            return false;
        }
        let kind_matches = match kind {
            AccessKind::Read => self.break_on_read,
            AccessKind::Write => self.break_on_write,
            AccessKind::Execute => self.break_on_execute,
        };
        if !kind_matches {
            return false;
        }
        match &self.compiled_condition {
            None => true,
            Some(condition) => match crate::expr::evaluate(condition, ctx) {
                Ok(value) => value != 0,
                Err(message) => {
                    warn!(target: "breakpoint", "condition failed to evaluate ({}); breaking anyway", message);
                    true
                }
            },
        }
    }

    pub fn save(&self, writer: &mut BinaryWriter) {
        match self.key {
            BreakpointKey::Banked(location) => {
                writer.write_u8(0);
                location.save(writer);
            }
            BreakpointKey::Address(address) => {
                writer.write_u8(1);
                writer.write_u16(address);
            }
        }
        writer.write_bool(self.enabled);
        writer.write_bool(self.break_on_read);
        writer.write_bool(self.break_on_write);
        writer.write_bool(self.break_on_execute);
        match &self.condition {
            Some(condition) => {
                writer.write_bool(true);
                crate::expr::io::save(condition, writer);
            }
            None => writer.write_bool(false),
        }
    }

    pub fn load(reader: &mut BinaryReader, tables: Option<&SymbolTables>) -> Result<BreakpointInfo, String> {
        let key = match reader.read_u8()? {
            0 => BreakpointKey::Banked(GlobalMemoryLocation::load(reader)?),
            1 => BreakpointKey::Address(reader.read_u16()?),
            other => return Err(format!("unknown breakpoint key tag {}", other)),
        };
        let mut info = BreakpointInfo::new(key);
        info.enabled = reader.read_bool()?;
        info.break_on_read = reader.read_bool()?;
        info.break_on_write = reader.read_bool()?;
        info.break_on_execute = reader.read_bool()?;
        if reader.read_bool()? {
            let condition = crate::expr::io::load(reader)?;
            info.compiled_condition = Some(compile_condition(&condition, tables)?);
            info.condition = Some(condition);
        }
        Ok(info)
    }
}

/// Binds a condition for worker-side evaluation: identifiers from the
/// per-instance state name table (`a, x, y, s, p, pc, istep, scanline,
/// ppucycle, frame`) become live-state leaves; label/define/enum-element
/// references fold to the constants they denote right now. The fold is
/// what lets the emulation worker evaluate conditions without sharing the
/// symbol tables across threads; it is re-run on project load and
/// whenever the condition is re-set.
pub fn compile_condition(source: &Node, tables: Option<&SymbolTables>) -> Result<Node, String> {
    let mut compiled = source.clone();
    let mut error: Option<String> = None;
    explore_mut(&mut compiled, &mut |node| {
        if error.is_some() {
            return;
        }
        match node {
            Node::Name(name) => {
                if let Some(kind) = StateKind::from_name(name) {
                    *node = Node::SystemInstanceState(kind);
                    return;
                }
                let resolved = tables.and_then(|tables| {
                    let ctx = SystemEvalContext { tables };
                    tables
                        .labels
                        .find_by_name(name)
                        .and_then(|id| tables.labels.get(id).map(|l| l.location.address as i64))
                        .or_else(|| tables.defines.find_by_name(name).and_then(|id| ctx.define_value(id)))
                        .or_else(|| tables.enums.find_element_by_name(name).and_then(|id| tables.enums.element_value(id)))
                });
                match resolved {
                    Some(value) => *node = Node::constant(value, crate::expr::ConstantDisplay::Hex),
                    None => error = Some(format!("'{}' is not a state name or known symbol", name)),
                }
            }
            Node::Label { name, id, .. } => {
                let address = tables
                    .and_then(|tables| id.or_else(|| tables.labels.find_by_name(name)).and_then(|id| tables.labels.get(id)))
                    .map(|label| label.location.address as i64);
                match address {
                    Some(value) => *node = Node::constant(value, crate::expr::ConstantDisplay::Hex),
                    None => error = Some(format!("label '{}' cannot be resolved", name)),
                }
            }
            Node::Define { name, id } => {
                let value = tables.and_then(|tables| {
                    let ctx = SystemEvalContext { tables };
                    id.or_else(|| tables.defines.find_by_name(name)).and_then(|id| ctx.define_value(id))
                });
                match value {
                    Some(value) => *node = Node::constant(value, crate::expr::ConstantDisplay::Hex),
                    None => error = Some(format!("define '{}' cannot be resolved", name)),
                }
            }
            Node::EnumElement { name, id } => {
                let value = tables.and_then(|tables| {
                    id.or_else(|| tables.enums.find_element_by_name(name)).and_then(|id| tables.enums.element_value(id))
                });
                match value {
                    Some(value) => *node = Node::constant(value, crate::expr::ConstantDisplay::Hex),
                    None => error = Some(format!("enum element '{}' cannot be resolved", name)),
                }
            }
            Node::Accumulator => {
                // `A` parses as the accumulator addressing marker, but in a
                // condition it means the register's value.
                *node = Node::SystemInstanceState(StateKind::A);
            }
            _ => {}
        }
    });
    match error {
        Some(message) => Err(message),
        None => Ok(compiled),
    }
}

/// All breakpoints of one instance, indexed two ways: the key map for the
/// full scan once a hit is plausible, and a 64 Ki-bit bitmap probed on
/// every bus access so the common no-breakpoint case costs one bit test.
#[derive(Debug)]
pub struct BreakpointTable {
    by_key: HashMap<BreakpointKey, Vec<BreakpointInfo>>,
    quick: BitVec,
}

impl Default for BreakpointTable {
    fn default() -> BreakpointTable {
        BreakpointTable { by_key: HashMap::new(), quick: bitvec![0; 0x10000] }
    }
}

impl BreakpointTable {
    pub fn add(&mut self, info: BreakpointInfo) {
        self.quick.set(info.key.address() as usize, true);
        self.by_key.entry(info.key).or_default().push(info);
    }

    pub fn remove(&mut self, key: BreakpointKey) -> usize {
        let removed = self.by_key.remove(&key).map(|list| list.len()).unwrap_or(0);
        if removed > 0 {
            self.rebuild_quick();
        }
        removed
    }

    pub fn quick_check(&self, address: u16) -> bool {
        self.quick[address as usize]
    }

    /// Every breakpoint that could apply at `address` with `bank`
    /// currently mapped: bank-specific entries first, then bank-agnostic
    /// ones.
    pub fn candidates(&self, address: u16, bank: u16) -> impl Iterator<Item = &BreakpointInfo> {
        let banked = BreakpointKey::Banked(GlobalMemoryLocation::prg(address, bank));
        let plain = BreakpointKey::Address(address);
        self.by_key
            .get(&banked)
            .into_iter()
            .flatten()
            .chain(self.by_key.get(&plain).into_iter().flatten())
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakpointInfo> {
        self.by_key.values().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BreakpointInfo> {
        self.by_key.values_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_key.values().map(|list| list.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn rebuild_quick(&mut self) {
        self.quick.fill(false);
        for key in self.by_key.keys() {
            self.quick.set(key.address() as usize, true);
        }
    }

    /// Written in key order so a saved project's bytes don't depend on
    /// hash-map iteration order.
    pub fn save(&self, writer: &mut BinaryWriter) {
        let ordered: Vec<&BreakpointInfo> = self
            .by_key
            .iter()
            .sorted_by_key(|(key, _)| **key)
            .flat_map(|(_, list)| list.iter())
            .collect();
        writer.write_varint(ordered.len() as u64);
        for info in ordered {
            info.save(writer);
        }
    }

    pub fn load(reader: &mut BinaryReader, tables: Option<&SymbolTables>) -> Result<BreakpointTable, String> {
        let mut table = BreakpointTable::default();
        let count = reader.read_varint()?;
        for _ in 0..count {
            table.add(BreakpointInfo::load(reader, tables)?);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::EvalContext;
    use crate::symbol::{DefineId, EnumElementId, LabelId};

    struct FixedState {
        a: i64,
    }

    impl EvalContext for FixedState {
        fn label_address(&self, _id: LabelId) -> Option<i64> {
            None
        }
        fn define_value(&self, _id: DefineId) -> Option<i64> {
            None
        }
        fn enum_element_value(&self, _id: EnumElementId) -> Option<i64> {
            None
        }
        fn state_value(&self, kind: StateKind) -> i64 {
            match kind {
                StateKind::A => self.a,
                _ => 0,
            }
        }
    }

    #[test]
    fn quick_bitmap_matches_key_presence() {
        let mut table = BreakpointTable::default();
        let key = BreakpointKey::Address(0x8000);
        table.add(BreakpointInfo::new(key));
        assert!(table.quick_check(0x8000));
        assert!(!table.quick_check(0x8001));
        table.remove(key);
        assert!(!table.quick_check(0x8000));
    }

    #[test]
    fn banked_and_plain_keys_are_independent() {
        let mut table = BreakpointTable::default();
        table.add(BreakpointInfo::new(BreakpointKey::Banked(GlobalMemoryLocation::prg(0xC000, 3))));
        table.add(BreakpointInfo::new(BreakpointKey::Address(0xC000)));
        assert_eq!(table.candidates(0xC000, 3).count(), 2);
        assert_eq!(table.candidates(0xC000, 0).count(), 1);
    }

    #[test]
    fn conditions_gate_firing_on_live_state() {
        let mut info = BreakpointInfo::new(BreakpointKey::Address(0xC000));
        info.set_condition("a == $42", None).unwrap();
        assert!(!info.should_fire(AccessKind::Execute, &FixedState { a: 0x41 }));
        assert!(info.should_fire(AccessKind::Execute, &FixedState { a: 0x42 }));
    }

    #[test]
    fn condition_pretty_print_round_trips_through_save() {
        let mut info = BreakpointInfo::new(BreakpointKey::Address(0xC000));
        info.set_condition("x != 0", None).unwrap();
        let mut buf = Vec::new();
        info.save(&mut BinaryWriter::new(&mut buf));
        let mut cursor = &buf[..];
        let restored = BreakpointInfo::load(&mut BinaryReader::new(&mut cursor), None).unwrap();
        assert_eq!(restored.condition_text().unwrap(), "x != 0");
    }

    #[test]
    fn unknown_names_without_tables_are_rejected() {
        let mut info = BreakpointInfo::new(BreakpointKey::Address(0xC000));
        assert!(info.set_condition("NO_SUCH_SYMBOL == 1", None).is_err());
    }
}
