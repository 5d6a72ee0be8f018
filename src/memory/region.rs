use super::object::{ListingItem, MemoryObject, ObjectType};
use super::tree::{LeafSpec, MemoryObjectTreeNode};
use crate::expr::Node;
use crate::io::{BinaryReader, BinaryWriter, SaveFileLayout};
use crate::symbol::enum_table::EnumTable;
use crate::symbol::{EnumId, LabelId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeConversionError {
    OutOfRange,
    InvalidTypeConversion,
}

impl std::fmt::Display for TypeConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeConversionError::OutOfRange => write!(f, "offset is out of range for this region"),
            TypeConversionError::InvalidTypeConversion => write!(f, "not every affected byte is eligible for this conversion"),
        }
    }
}

impl std::error::Error for TypeConversionError {}

/// A named, base-addressed, size-fixed window of the program database:
/// one PRG bank, one CHR bank, internal RAM, or a register window.
/// `objects[object_refs[offset]]` is the object that owns `offset`;
/// multi-byte objects have the same entry repeated across their span.
/// `tree` is rebuilt from `objects`/`object_refs` after every mutation;
/// see [`super::tree`] for why this isn't in-place node surgery.
#[derive(Debug)]
pub struct MemoryRegion {
    pub name: String,
    pub base_address: u32,
    pub size: u32,
    pub flat_memory: Option<Vec<u8>>,
    objects: Vec<MemoryObject>,
    object_refs: Vec<u32>,
    tree: Option<MemoryObjectTreeNode>,
}

impl MemoryRegion {
    pub fn initialize_empty(name: impl Into<String>, base_address: u32, size: u32) -> MemoryRegion {
        let mut region = MemoryRegion {
            name: name.into(),
            base_address,
            size,
            flat_memory: None,
            objects: (0..size).map(|_| MemoryObject::undefined_byte(false)).collect(),
            object_refs: (0..size).collect(),
            tree: None,
        };
        region.rebuild_tree();
        region
    }

    pub fn initialize_from_data(name: impl Into<String>, base_address: u32, data: Vec<u8>) -> MemoryRegion {
        let size = data.len() as u32;
        let mut region = MemoryRegion {
            name: name.into(),
            base_address,
            size,
            flat_memory: Some(data),
            objects: (0..size).map(|_| MemoryObject::undefined_byte(true)).collect(),
            object_refs: (0..size).collect(),
            tree: None,
        };
        region.rebuild_tree();
        region
    }

    fn rebuild_tree(&mut self) {
        let mut leaves = Vec::new();
        let mut offset = 0u32;
        while offset < self.size {
            let object_index = self.object_refs[offset as usize] as usize;
            let size = self.objects[object_index].size();
            leaves.push(LeafSpec { object_index, start: offset, size, listing_item_count: self.objects[object_index].listing_item_count() });
            offset += size;
        }
        self.tree = MemoryObjectTreeNode::build(&leaves);
    }

    pub fn read_byte(&self, addr: u32) -> Option<u8> {
        let offset = addr.checked_sub(self.base_address)?;
        self.flat_memory.as_ref()?.get(offset as usize).copied()
    }

    pub fn get_object(&self, addr: u32) -> Option<(&MemoryObject, u32)> {
        let offset = addr.checked_sub(self.base_address)?;
        if offset >= self.size {
            return None;
        }
        let index = self.object_refs[offset as usize] as usize;
        let object_start = self.object_start_offset(index);
        Some((&self.objects[index], offset - object_start))
    }

    pub fn get_object_mut(&mut self, addr: u32) -> Option<&mut MemoryObject> {
        let offset = addr.checked_sub(self.base_address)?;
        if offset >= self.size {
            return None;
        }
        let index = self.object_refs[offset as usize] as usize;
        Some(&mut self.objects[index])
    }

    fn object_start_offset(&self, object_index: usize) -> u32 {
        self.object_refs.iter().position(|&r| r as usize == object_index).unwrap_or(0) as u32
    }

    fn offset_of(&self, addr: u32) -> Result<u32, TypeConversionError> {
        let offset = addr.checked_sub(self.base_address).ok_or(TypeConversionError::OutOfRange)?;
        if offset >= self.size {
            return Err(TypeConversionError::OutOfRange);
        }
        Ok(offset)
    }

    fn require_undefined_run(&self, offset: u32, count: u32) -> Result<(), TypeConversionError> {
        if offset + count > self.size {
            return Err(TypeConversionError::OutOfRange);
        }
        for i in offset..offset + count {
            let index = self.object_refs[i as usize] as usize;
            if self.objects[index].object_type != ObjectType::Undefined {
                return Err(TypeConversionError::InvalidTypeConversion);
            }
        }
        Ok(())
    }

    /// Replaces the objects spanning `[offset, offset+count)` with one
    /// object of `new_type`, carrying over labels/comments from the
    /// first affected object. Only all-Undefined runs may widen.
    fn widen(&mut self, offset: u32, count: u32, new_type: ObjectType, backed: bool) -> Result<(), TypeConversionError> {
        self.require_undefined_run(offset, count)?;
        let first_index = self.object_refs[offset as usize] as usize;
        let mut object = self.objects[first_index].clone();
        object.object_type = new_type;
        object.backed = backed;
        object.rebuild_listing_items();
        let new_index = self.objects.len();
        self.objects.push(object);
        for i in offset..offset + count {
            self.object_refs[i as usize] = new_index as u32;
        }
        self.rebuild_tree();
        Ok(())
    }

    pub fn mark_as_undefined(&mut self, addr: u32) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        let index = self.object_refs[offset as usize] as usize;
        let old = self.objects[index].clone();
        let size = old.size();
        let start = self.object_start_offset(index);
        for i in 0..size {
            let mut byte = MemoryObject::undefined_byte(old.backed);
            if i == 0 {
                byte.labels = old.labels.clone();
                byte.comments = old.comments.clone();
                byte.rebuild_listing_items();
            }
            let new_index = self.objects.len();
            self.objects.push(byte);
            self.object_refs[(start + i) as usize] = new_index as u32;
        }
        self.rebuild_tree();
        Ok(())
    }

    pub fn mark_as_bytes(&mut self, addr: u32, count: u32) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        for i in 0..count {
            self.widen(offset + i, 1, ObjectType::Byte, self.flat_memory.is_some())?;
        }
        Ok(())
    }

    pub fn mark_as_words(&mut self, addr: u32) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        self.widen(offset, 2, ObjectType::Word, self.flat_memory.is_some())
    }

    pub fn mark_as_code(&mut self, addr: u32, size: u8) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        self.widen(offset, size as u32, ObjectType::Code { size }, self.flat_memory.is_some())
    }

    pub fn mark_as_string(&mut self, addr: u32, len: u32) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        self.widen(offset, len, ObjectType::String { len }, self.flat_memory.is_some())
    }

    pub fn mark_as_enum(&mut self, addr: u32, enum_id: EnumId, size: u8) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        self.widen(offset, size as u32, ObjectType::Enum { enum_id, size }, self.flat_memory.is_some())
    }

    pub fn set_operand_expression(&mut self, addr: u32, expression: Option<Node>) -> Result<(), TypeConversionError> {
        let object = self.get_object_mut(addr).ok_or(TypeConversionError::OutOfRange)?;
        object.operand_expression = expression;
        Ok(())
    }

    /// Mutates the object owning `addr` and re-establishes the listing
    /// row accounting afterwards, including on mutations (comment edits,
    /// blank-line changes) that alter the object's row count.
    pub fn with_object_mut(&mut self, addr: u32, mutate: impl FnOnce(&mut MemoryObject)) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        let index = self.object_refs[offset as usize] as usize;
        mutate(&mut self.objects[index]);
        self.objects[index].rebuild_listing_items();
        self.rebuild_tree();
        Ok(())
    }

    pub fn apply_label(&mut self, addr: u32, id: LabelId) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        let index = self.object_refs[offset as usize] as usize;
        self.objects[index].add_label(id);
        self.rebuild_tree();
        Ok(())
    }

    pub fn delete_label(&mut self, addr: u32, id: LabelId) -> Result<(), TypeConversionError> {
        let offset = self.offset_of(addr)?;
        let index = self.object_refs[offset as usize] as usize;
        self.objects[index].remove_label(id);
        self.rebuild_tree();
        Ok(())
    }

    pub fn get_listing_row_for_address(&self, addr: u32) -> Result<usize, TypeConversionError> {
        let offset = self.offset_of(addr)?;
        let tree = self.tree.as_ref().ok_or(TypeConversionError::OutOfRange)?;
        let row = tree.listing_row_before(offset);
        let leaf = tree.leaf_at_offset(offset).ok_or(TypeConversionError::OutOfRange)?;
        Ok(row + self.objects[leaf.object_index].primary_listing_item_index)
    }

    /// Iterates every listing item across the region starting at absolute
    /// row `row_index`, yielding `(region_offset, item)` pairs in display
    /// order. Used by the UI to paint a scrolled viewport without
    /// materializing the whole listing.
    pub fn listing_items_from_row(&self, row_index: usize) -> impl Iterator<Item = (u32, ListingItem)> + '_ {
        let leaves = self.tree.as_ref().map(|t| t.leaves()).unwrap_or_default();
        let mut rows_seen = 0usize;
        let mut out = Vec::new();
        for leaf in leaves {
            let object = &self.objects[leaf.object_index];
            for item in &object.listing_items {
                if rows_seen >= row_index {
                    out.push((self.base_address + leaf.start, *item));
                }
                rows_seen += 1;
            }
        }
        out.into_iter()
    }

    /// Objects are written in address order (tree leaf order); their byte
    /// spans reconstruct `object_refs` on load, so the per-offset table is
    /// never persisted. Labels are re-applied by the project loader from
    /// the global label table after every region exists again.
    pub fn save(&self, writer: &mut BinaryWriter, enums: &EnumTable) {
        writer.write_string(&self.name);
        writer.write_u32(self.base_address);
        writer.write_u32(self.size);
        match &self.flat_memory {
            Some(bytes) => {
                writer.write_bool(true);
                writer.write_bytes(bytes);
            }
            None => writer.write_bool(false),
        }
        let leaves = self.tree.as_ref().map(|t| t.leaves()).unwrap_or_default();
        writer.write_varint(leaves.len() as u64);
        for leaf in leaves {
            self.objects[leaf.object_index].save(writer, enums);
        }
    }

    pub fn load(reader: &mut BinaryReader, enums: &EnumTable, layout: SaveFileLayout) -> Result<MemoryRegion, String> {
        let name = reader.read_string()?;
        let base_address = reader.read_u32()?;
        let size = reader.read_u32()?;
        // Old save files stored each backed object's bytes inline after
        // its record instead of one flat buffer per region; those are
        // reassembled into `flat_memory` as the objects stream in.
        let mut flat_memory = if layout.inline_object_bytes {
            None
        } else if reader.read_bool()? {
            Some(reader.read_bytes(size as usize)?)
        } else {
            None
        };
        let object_count = reader.read_varint()?;
        let mut objects = Vec::with_capacity(object_count as usize);
        let mut object_refs = Vec::with_capacity(size as usize);
        let mut inline_bytes = vec![0u8; size as usize];
        let mut any_inline_backed = false;
        for _ in 0..object_count {
            let object = MemoryObject::load(reader, enums)?;
            let span = object.size();
            if layout.inline_object_bytes && object.backed {
                let start = object_refs.len();
                if start + span as usize > size as usize {
                    return Err(format!("region '{}' objects overrun the region size", name));
                }
                let bytes = reader.read_bytes(span as usize)?;
                inline_bytes[start..start + span as usize].copy_from_slice(&bytes);
                any_inline_backed = true;
            }
            let index = objects.len() as u32;
            objects.push(object);
            for _ in 0..span {
                object_refs.push(index);
            }
        }
        if any_inline_backed {
            flat_memory = Some(inline_bytes);
        }
        if object_refs.len() != size as usize {
            return Err(format!(
                "region '{}' objects cover {} bytes but the region is {} bytes",
                name,
                object_refs.len(),
                size
            ));
        }
        let mut region = MemoryRegion { name, base_address, size, flat_memory, objects, object_refs, tree: None };
        region.rebuild_tree();
        Ok(region)
    }

    pub fn object_count(&self) -> usize {
        self.tree.as_ref().map(|t| t.leaves().len()).unwrap_or(0)
    }

    pub fn total_listing_item_count(&self) -> usize {
        self.tree.as_ref().map(|t| t.listing_item_count()).unwrap_or(0)
    }
}
