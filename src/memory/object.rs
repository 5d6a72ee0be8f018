use crate::comment::Comment;
use crate::expr::Node;
use crate::io::{BinaryReader, BinaryWriter};
use crate::symbol::enum_table::EnumTable;
use crate::symbol::{EnumId, LabelId};

/// What a [`MemoryObject`] currently means. `String` and `Enum` carry the
/// extra data needed to know how many bytes the object spans or which
/// enum governs its value; the other variants are fixed-size by
/// definition (1 byte, 2 bytes, or the addressing-mode-dependent size a
/// `Code` object was created with).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectType {
    Undefined,
    Byte,
    Word,
    Code { size: u8 },
    String { len: u32 },
    Enum { enum_id: EnumId, size: u8 },
}

impl ObjectType {
    pub fn size(&self) -> u32 {
        match self {
            ObjectType::Undefined | ObjectType::Byte => 1,
            ObjectType::Word => 2,
            ObjectType::Code { size } => *size as u32,
            ObjectType::String { len } => *len,
            ObjectType::Enum { size, .. } => *size as u32,
        }
    }
}

/// One display row a [`MemoryObject`] contributes to the listing. Kept as
/// plain data (not rendered text) since actual glyph layout is the GUI's
/// job; the core only needs to know how many rows an object owns and
/// which one carries the data itself, for row-index accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingItem {
    PreComment,
    Label,
    Data,
    EolComment,
    PostComment,
    BlankLine,
}

/// Which of an object's three comment positions an edit targets: the
/// block above the data row, the end-of-line remark, or the block below.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommentSlot {
    Pre,
    Eol,
    Post,
}

#[derive(Clone, Debug, Default)]
pub struct Comments {
    pub pre: Option<Comment>,
    pub eol: Option<Comment>,
    pub post: Option<Comment>,
}

impl Comments {
    pub fn is_empty(&self) -> bool {
        self.pre.is_none() && self.eol.is_none() && self.post.is_none()
    }

    pub fn slot_mut(&mut self, slot: CommentSlot) -> &mut Option<Comment> {
        match slot {
            CommentSlot::Pre => &mut self.pre,
            CommentSlot::Eol => &mut self.eol,
            CommentSlot::Post => &mut self.post,
        }
    }
}

/// The unit of the symbolic program database: one typed span of a
/// [`super::region::MemoryRegion`]. Multi-byte objects are represented by
/// a single `MemoryObject` whose `object_refs` entries all point back to
/// it (see `MemoryRegion`), not by a chain of objects.
#[derive(Clone, Debug)]
pub struct MemoryObject {
    pub object_type: ObjectType,
    pub backed: bool,
    pub labels: Vec<LabelId>,
    pub operand_expression: Option<Node>,
    pub comments: Comments,
    pub blank_lines: u32,
    pub default_blank_line: bool,
    pub listing_items: Vec<ListingItem>,
    pub primary_listing_item_index: usize,
}

impl MemoryObject {
    pub fn undefined_byte(backed: bool) -> MemoryObject {
        let mut object = MemoryObject {
            object_type: ObjectType::Undefined,
            backed,
            labels: Vec::new(),
            operand_expression: None,
            comments: Comments::default(),
            blank_lines: 0,
            default_blank_line: false,
            listing_items: Vec::new(),
            primary_listing_item_index: 0,
        };
        object.rebuild_listing_items();
        object
    }

    pub fn size(&self) -> u32 {
        self.object_type.size()
    }

    /// Recomputes `listing_items`/`primary_listing_item_index` from the
    /// object's current labels/comments. Called after every mutation that
    /// could change row count (label add/remove, comment set, blank line
    /// count change, type conversion).
    pub fn rebuild_listing_items(&mut self) {
        let mut items = Vec::new();
        if let Some(pre) = &self.comments.pre {
            for _ in 0..pre.line_count().max(1) {
                items.push(ListingItem::PreComment);
            }
        }
        for _ in &self.labels {
            items.push(ListingItem::Label);
        }
        items.push(ListingItem::Data);
        let primary_listing_item_index = items.len() - 1;
        if self.comments.eol.is_some() {
            items.push(ListingItem::EolComment);
        }
        if let Some(post) = &self.comments.post {
            for _ in 0..post.line_count().max(1) {
                items.push(ListingItem::PostComment);
            }
        }
        for _ in 0..self.blank_lines {
            items.push(ListingItem::BlankLine);
        }
        self.listing_items = items;
        self.primary_listing_item_index = primary_listing_item_index;
    }

    pub fn listing_item_count(&self) -> usize {
        self.listing_items.len()
    }

    pub fn add_label(&mut self, id: LabelId) {
        self.labels.push(id);
        self.rebuild_listing_items();
    }

    pub fn remove_label(&mut self, id: LabelId) {
        self.labels.retain(|&existing| existing != id);
        self.rebuild_listing_items();
    }

    /// Label ids are deliberately not written: arena indices aren't stable
    /// across a save/load cycle, so the project loader re-applies every
    /// label from the (persisted) global label table by address instead.
    /// Enum types persist the governing enum's *name* for the same reason.
    pub fn save(&self, writer: &mut BinaryWriter, enums: &EnumTable) {
        match &self.object_type {
            ObjectType::Undefined => writer.write_u8(0),
            ObjectType::Byte => writer.write_u8(1),
            ObjectType::Word => writer.write_u8(2),
            ObjectType::Code { size } => {
                writer.write_u8(3);
                writer.write_u8(*size);
            }
            ObjectType::String { len } => {
                writer.write_u8(4);
                writer.write_varint(*len as u64);
            }
            ObjectType::Enum { enum_id, size } => {
                writer.write_u8(5);
                let name = enums.get_enum(*enum_id).map(|e| e.name.as_str()).unwrap_or("");
                writer.write_string(name);
                writer.write_u8(*size);
            }
        }
        writer.write_bool(self.backed);
        match &self.operand_expression {
            Some(node) => {
                writer.write_bool(true);
                crate::expr::io::save(node, writer);
            }
            None => writer.write_bool(false),
        }
        save_optional_comment(writer, &self.comments.pre);
        save_optional_comment(writer, &self.comments.eol);
        save_optional_comment(writer, &self.comments.post);
        writer.write_varint(self.blank_lines as u64);
        writer.write_bool(self.default_blank_line);
    }

    pub fn load(reader: &mut BinaryReader, enums: &EnumTable) -> Result<MemoryObject, String> {
        let object_type = match reader.read_u8()? {
            0 => ObjectType::Undefined,
            1 => ObjectType::Byte,
            2 => ObjectType::Word,
            3 => ObjectType::Code { size: reader.read_u8()? },
            4 => ObjectType::String { len: reader.read_varint()? as u32 },
            5 => {
                let name = reader.read_string()?;
                let size = reader.read_u8()?;
                let enum_id = enums
                    .find_enum_by_name(&name)
                    .ok_or_else(|| format!("memory object references unknown enum '{}'", name))?;
                ObjectType::Enum { enum_id, size }
            }
            other => return Err(format!("unknown memory object type tag {}", other)),
        };
        let backed = reader.read_bool()?;
        let operand_expression = if reader.read_bool()? {
            Some(crate::expr::io::load(reader)?)
        } else {
            None
        };
        let comments = Comments {
            pre: load_optional_comment(reader)?,
            eol: load_optional_comment(reader)?,
            post: load_optional_comment(reader)?,
        };
        let blank_lines = reader.read_varint()? as u32;
        let default_blank_line = reader.read_bool()?;
        let mut object = MemoryObject {
            object_type,
            backed,
            labels: Vec::new(),
            operand_expression,
            comments,
            blank_lines,
            default_blank_line,
            listing_items: Vec::new(),
            primary_listing_item_index: 0,
        };
        object.rebuild_listing_items();
        Ok(object)
    }
}

fn save_optional_comment(writer: &mut BinaryWriter, comment: &Option<Comment>) {
    match comment {
        Some(comment) => {
            writer.write_bool(true);
            comment.save(writer);
        }
        None => writer.write_bool(false),
    }
}

fn load_optional_comment(reader: &mut BinaryReader) -> Result<Option<Comment>, String> {
    if reader.read_bool()? {
        Ok(Some(Comment::load(reader)?))
    } else {
        Ok(None)
    }
}
