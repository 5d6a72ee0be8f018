use super::arena::{Arena, EnumElementId, EnumId};
use crate::io::{BinaryReader, BinaryWriter};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct EnumElement {
    pub name: String,
    pub value: i64,
    pub owner: EnumId,
}

/// A named set of integer constants, e.g. `enum ButtonMask { A = $80, B =
/// $40, ... }`. Elements live in their own arena (not nested inside
/// `Enum`) so an `EnumElement` expression leaf can hold a stable id
/// independent of the owning enum's storage. `size` (1 or 2 bytes) decides
/// how many bytes a memory object typed as this enum spans and reads.
#[derive(Clone, Debug)]
pub struct Enum {
    pub name: String,
    pub size: u8,
    pub elements: Vec<EnumElementId>,
}

#[derive(Debug, Default)]
pub struct EnumTable {
    enums: Arena<Enum>,
    elements: Arena<EnumElement>,
    enums_by_name: HashMap<String, EnumId>,
    elements_by_name: HashMap<String, EnumElementId>,
}

impl EnumTable {
    pub fn insert_enum(&mut self, name: impl Into<String>, size: u8) -> EnumId {
        let name = name.into();
        let id = EnumId(self.enums.insert(Enum { name: name.clone(), size, elements: Vec::new() }));
        self.enums_by_name.insert(name, id);
        id
    }

    pub fn insert_element(&mut self, owner: EnumId, name: impl Into<String>, value: i64) -> Result<EnumElementId, String> {
        let name = name.into();
        if self.elements_by_name.contains_key(&name) {
            return Err(format!("enum element '{}' already exists", name));
        }
        let id = EnumElementId(self.elements.insert(EnumElement { name: name.clone(), value, owner }));
        self.elements_by_name.insert(name, id);
        self.enums.get_mut(owner.0).ok_or("no such enum")?.elements.push(id);
        Ok(id)
    }

    pub fn remove_element(&mut self, id: EnumElementId) -> Option<EnumElement> {
        let element = self.elements.remove(id.0)?;
        self.elements_by_name.remove(&element.name);
        if let Some(owner) = self.enums.get_mut(element.owner.0) {
            owner.elements.retain(|&existing| existing != id);
        }
        Some(element)
    }

    /// Value changes go through the table (not `get_mut`) so callers can't
    /// skip the caller-side reverse-reference check that guards them.
    pub fn set_element_value(&mut self, id: EnumElementId, value: i64) -> Result<(), String> {
        self.elements.get_mut(id.0).ok_or("no such enum element")?.value = value;
        Ok(())
    }

    pub fn remove_enum(&mut self, id: EnumId) -> Option<Enum> {
        let e = self.enums.remove(id.0)?;
        for element_id in &e.elements {
            if let Some(element) = self.elements.remove(element_id.0) {
                self.elements_by_name.remove(&element.name);
            }
        }
        self.enums_by_name.remove(&e.name);
        Some(e)
    }

    pub fn get_enum(&self, id: EnumId) -> Option<&Enum> {
        self.enums.get(id.0)
    }

    pub fn get_element(&self, id: EnumElementId) -> Option<&EnumElement> {
        self.elements.get(id.0)
    }

    pub fn find_enum_by_name(&self, name: &str) -> Option<EnumId> {
        self.enums_by_name.get(name).copied()
    }

    pub fn find_element_by_name(&self, name: &str) -> Option<EnumElementId> {
        self.elements_by_name.get(name).copied()
    }

    pub fn element_value(&self, id: EnumElementId) -> Option<i64> {
        self.elements.get(id.0).map(|e| e.value)
    }

    pub fn iter_enums(&self) -> impl Iterator<Item = (EnumId, &Enum)> {
        self.enums.iter().map(|(i, e)| (EnumId(i), e))
    }

    pub fn save(&self, writer: &mut BinaryWriter) {
        let enums: Vec<(EnumId, &Enum)> = self.enums.iter().map(|(i, e)| (EnumId(i), e)).collect();
        writer.write_varint(enums.len() as u64);
        for (_, e) in &enums {
            writer.write_string(&e.name);
            writer.write_u8(e.size);
            writer.write_varint(e.elements.len() as u64);
            for element_id in &e.elements {
                let element = self.elements.get(element_id.0).expect("enum element referenced by its owner must exist");
                writer.write_string(&element.name);
                writer.write_signed_varint(element.value);
            }
        }
    }

    /// `with_sizes` is false for save files written before enums carried
    /// a size field; those enums all read as one byte wide.
    pub fn load(reader: &mut BinaryReader, with_sizes: bool) -> Result<EnumTable, String> {
        let mut table = EnumTable::default();
        let enum_count = reader.read_varint()?;
        for _ in 0..enum_count {
            let enum_name = reader.read_string()?;
            let size = if with_sizes { reader.read_u8()? } else { 1 };
            let owner = table.insert_enum(enum_name, size);
            let element_count = reader.read_varint()?;
            for _ in 0..element_count {
                let element_name = reader.read_string()?;
                let value = reader.read_signed_varint()?;
                table.insert_element(owner, element_name, value)?;
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_elements_under_their_enum() {
        let mut table = EnumTable::default();
        let id = table.insert_enum("ButtonMask", 1);
        let a = table.insert_element(id, "A", 0x80).unwrap();
        table.insert_element(id, "B", 0x40).unwrap();
        assert_eq!(table.get_enum(id).unwrap().elements.len(), 2);
        assert_eq!(table.element_value(a), Some(0x80));
    }

    #[test]
    fn rejects_duplicate_element_names_across_enums() {
        let mut table = EnumTable::default();
        let a = table.insert_enum("A", 1);
        let b = table.insert_enum("B", 1);
        table.insert_element(a, "X", 1).unwrap();
        assert!(table.insert_element(b, "X", 2).is_err());
    }

    #[test]
    fn removing_an_enum_removes_its_elements() {
        let mut table = EnumTable::default();
        let id = table.insert_enum("E", 1);
        table.insert_element(id, "X", 1).unwrap();
        table.remove_enum(id);
        assert!(table.find_element_by_name("X").is_none());
    }
}
