use super::arena::{Arena, LabelId};
use crate::io::{BinaryReader, BinaryWriter};
use crate::types::GlobalMemoryLocation;
use std::collections::HashMap;

/// A named address. There is no index-changed notification: callers that
/// care about index churn just re-run [`crate::expr::fixup`] after a
/// mutation, so nothing downstream needs to be notified eagerly.
#[derive(Clone, Debug)]
pub struct Label {
    pub name: String,
    pub location: GlobalMemoryLocation,
    /// True for a label auto-created by the disassembly driver landing on
    /// an address with no name yet, as opposed to one the user typed.
    pub auto_generated: bool,
}

impl Label {
    pub fn new(name: impl Into<String>, location: GlobalMemoryLocation) -> Label {
        Label { name: name.into(), location, auto_generated: false }
    }

    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.name);
        self.location.save(writer);
        writer.write_bool(self.auto_generated);
    }

    pub fn load(reader: &mut BinaryReader) -> Result<Label, String> {
        let name = reader.read_string()?;
        let location = GlobalMemoryLocation::load(reader)?;
        let auto_generated = reader.read_bool()?;
        Ok(Label { name, location, auto_generated })
    }
}

/// Owns every label and the name->id index used to resolve expression
/// `Name` leaves. Multiple labels can share a name, so the index maps a
/// name to every holder in insertion order; an expression's own `nth`
/// field picks among same-named labels when more than one exists.
#[derive(Debug, Default)]
pub struct LabelTable {
    arena: Arena<Label>,
    by_name: HashMap<String, Vec<LabelId>>,
}

impl LabelTable {
    pub fn insert(&mut self, label: Label) -> LabelId {
        let name = label.name.clone();
        let id = LabelId(self.arena.insert(label));
        self.by_name.entry(name).or_default().push(id);
        id
    }

    pub fn remove(&mut self, id: LabelId) -> Option<Label> {
        let label = self.arena.remove(id.0)?;
        if let Some(ids) = self.by_name.get_mut(&label.name) {
            ids.retain(|&existing| existing != id);
            if ids.is_empty() {
                self.by_name.remove(&label.name);
            }
        }
        Some(label)
    }

    pub fn get(&self, id: LabelId) -> Option<&Label> {
        self.arena.get(id.0)
    }

    pub fn get_mut(&mut self, id: LabelId) -> Option<&mut Label> {
        self.arena.get_mut(id.0)
    }

    pub fn find_by_name(&self, name: &str) -> Option<LabelId> {
        self.by_name.get(name).and_then(|ids| ids.first().copied())
    }

    pub fn find_nth_by_name(&self, name: &str, nth: u32) -> Option<LabelId> {
        self.by_name.get(name).and_then(|ids| ids.get(nth as usize).copied())
    }

    pub fn find_at(&self, location: &GlobalMemoryLocation) -> Option<LabelId> {
        self.arena.iter().find(|(_, label)| &label.location == location).map(|(i, _)| LabelId(i))
    }

    /// Renaming changes which bucket of `by_name` a label lives in, so it
    /// has to go through the table rather than mutating `label.name`
    /// directly.
    pub fn rename(&mut self, id: LabelId, new_name: impl Into<String>) -> Result<(), String> {
        let new_name = new_name.into();
        let old_name = self.arena.get(id.0).ok_or("no such label")?.name.clone();
        if let Some(ids) = self.by_name.get_mut(&old_name) {
            ids.retain(|&existing| existing != id);
            if ids.is_empty() {
                self.by_name.remove(&old_name);
            }
        }
        self.arena.get_mut(id.0).ok_or("no such label")?.name = new_name.clone();
        self.by_name.entry(new_name).or_default().push(id);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (LabelId, &Label)> {
        self.arena.iter().map(|(i, l)| (LabelId(i), l))
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(address: u16) -> GlobalMemoryLocation {
        GlobalMemoryLocation::prg(address, 0)
    }

    #[test]
    fn inserts_and_finds_by_name() {
        let mut table = LabelTable::default();
        let id = table.insert(Label::new("RESET", loc(0xC000)));
        assert_eq!(table.find_by_name("RESET"), Some(id));
        assert_eq!(table.get(id).unwrap().location, loc(0xC000));
    }

    #[test]
    fn duplicate_names_are_disambiguated_by_nth() {
        let mut table = LabelTable::default();
        let a = table.insert(Label::new("LOOP", loc(0x8000)));
        let b = table.insert(Label::new("LOOP", loc(0x8010)));
        assert_eq!(table.find_nth_by_name("LOOP", 0), Some(a));
        assert_eq!(table.find_nth_by_name("LOOP", 1), Some(b));
    }

    #[test]
    fn rename_moves_the_name_index_entry() {
        let mut table = LabelTable::default();
        let id = table.insert(Label::new("OLD", loc(0x8000)));
        table.rename(id, "NEW").unwrap();
        assert_eq!(table.find_by_name("OLD"), None);
        assert_eq!(table.find_by_name("NEW"), Some(id));
    }
}
