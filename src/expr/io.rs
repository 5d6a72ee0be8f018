use super::node::{BinOp, ConstantDisplay, Node, StateKind, UnOp};
use crate::io::{BinaryReader, BinaryWriter};

/// Expression trees are saved as a tag byte per node followed by that
/// node's payload, recursing into children depth-first. `Label`/`Define`/
/// `EnumElement` leaves persist only their display name: the id is
/// recomputed by running [`super::fixup`] once the whole project has
/// loaded and every symbol table exists again.
const TAG_NAME: u8 = 0;
const TAG_CONSTANT: u8 = 1;
const TAG_BINARY_OP: u8 = 2;
const TAG_UNARY_OP: u8 = 3;
const TAG_PARENS: u8 = 4;
const TAG_EXPRESSION_LIST: u8 = 5;
const TAG_DEREFERENCE: u8 = 6;
const TAG_FUNCTION_CALL: u8 = 7;
const TAG_LABEL: u8 = 8;
const TAG_DEFINE: u8 = 9;
const TAG_ENUM_ELEMENT: u8 = 10;
const TAG_IMMEDIATE: u8 = 11;
const TAG_INDEXED_X: u8 = 12;
const TAG_INDEXED_Y: u8 = 13;
const TAG_ACCUMULATOR: u8 = 14;
const TAG_SYSTEM_STATE: u8 = 15;

pub fn save(node: &Node, writer: &mut BinaryWriter) {
    match node {
        Node::Name(name) => {
            writer.write_u8(TAG_NAME);
            writer.write_string(name);
        }
        Node::Constant { value, display } => {
            writer.write_u8(TAG_CONSTANT);
            writer.write_signed_varint(*value);
            writer.write_u8(constant_display_tag(*display));
        }
        Node::BinaryOp { op, left, right } => {
            writer.write_u8(TAG_BINARY_OP);
            writer.write_u8(bin_op_tag(*op));
            save(left, writer);
            save(right, writer);
        }
        Node::UnaryOp { op, operand } => {
            writer.write_u8(TAG_UNARY_OP);
            writer.write_u8(un_op_tag(*op));
            save(operand, writer);
        }
        Node::Parens(inner) => {
            writer.write_u8(TAG_PARENS);
            save(inner, writer);
        }
        Node::ExpressionList(items) => {
            writer.write_u8(TAG_EXPRESSION_LIST);
            writer.write_varint(items.len() as u64);
            for item in items {
                save(item, writer);
            }
        }
        Node::DereferenceOp(inner) => {
            writer.write_u8(TAG_DEREFERENCE);
            save(inner, writer);
        }
        Node::FunctionCall { name, args } => {
            writer.write_u8(TAG_FUNCTION_CALL);
            writer.write_string(name);
            writer.write_varint(args.len() as u64);
            for arg in args {
                save(arg, writer);
            }
        }
        Node::Label { name, nth, long_mode, .. } => {
            writer.write_u8(TAG_LABEL);
            writer.write_string(name);
            writer.write_varint(*nth as u64);
            writer.write_bool(*long_mode);
        }
        Node::Define { name, .. } => {
            writer.write_u8(TAG_DEFINE);
            writer.write_string(name);
        }
        Node::EnumElement { name, .. } => {
            writer.write_u8(TAG_ENUM_ELEMENT);
            writer.write_string(name);
        }
        Node::Immediate(inner) => {
            writer.write_u8(TAG_IMMEDIATE);
            save(inner, writer);
        }
        Node::IndexedX(inner) => {
            writer.write_u8(TAG_INDEXED_X);
            save(inner, writer);
        }
        Node::IndexedY(inner) => {
            writer.write_u8(TAG_INDEXED_Y);
            save(inner, writer);
        }
        Node::Accumulator => {
            writer.write_u8(TAG_ACCUMULATOR);
        }
        Node::SystemInstanceState(kind) => {
            writer.write_u8(TAG_SYSTEM_STATE);
            writer.write_u8(state_kind_tag(*kind));
        }
    }
}

pub fn load(reader: &mut BinaryReader) -> Result<Node, String> {
    match reader.read_u8()? {
        TAG_NAME => Ok(Node::Name(reader.read_string()?)),
        TAG_CONSTANT => {
            let value = reader.read_signed_varint()?;
            let display = constant_display_from_tag(reader.read_u8()?)?;
            Ok(Node::Constant { value, display })
        }
        TAG_BINARY_OP => {
            let op = bin_op_from_tag(reader.read_u8()?)?;
            let left = Box::new(load(reader)?);
            let right = Box::new(load(reader)?);
            Ok(Node::BinaryOp { op, left, right })
        }
        TAG_UNARY_OP => {
            let op = un_op_from_tag(reader.read_u8()?)?;
            let operand = Box::new(load(reader)?);
            Ok(Node::UnaryOp { op, operand })
        }
        TAG_PARENS => Ok(Node::Parens(Box::new(load(reader)?))),
        TAG_EXPRESSION_LIST => {
            let count = reader.read_varint()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(load(reader)?);
            }
            Ok(Node::ExpressionList(items))
        }
        TAG_DEREFERENCE => Ok(Node::DereferenceOp(Box::new(load(reader)?))),
        TAG_FUNCTION_CALL => {
            let name = reader.read_string()?;
            let count = reader.read_varint()?;
            let mut args = Vec::with_capacity(count as usize);
            for _ in 0..count {
                args.push(load(reader)?);
            }
            Ok(Node::FunctionCall { name, args })
        }
        TAG_LABEL => {
            let name = reader.read_string()?;
            let nth = reader.read_varint()? as u32;
            let long_mode = reader.read_bool()?;
            Ok(Node::Label { name, id: None, nth, long_mode, cached_offset: std::cell::Cell::new(None) })
        }
        TAG_DEFINE => Ok(Node::Define { name: reader.read_string()?, id: None }),
        TAG_ENUM_ELEMENT => Ok(Node::EnumElement { name: reader.read_string()?, id: None }),
        TAG_IMMEDIATE => Ok(Node::Immediate(Box::new(load(reader)?))),
        TAG_INDEXED_X => Ok(Node::IndexedX(Box::new(load(reader)?))),
        TAG_INDEXED_Y => Ok(Node::IndexedY(Box::new(load(reader)?))),
        TAG_ACCUMULATOR => Ok(Node::Accumulator),
        TAG_SYSTEM_STATE => Ok(Node::SystemInstanceState(state_kind_from_tag(reader.read_u8()?)?)),
        other => Err(format!("unknown expression node tag {}", other)),
    }
}

fn constant_display_tag(display: ConstantDisplay) -> u8 {
    match display {
        ConstantDisplay::Decimal => 0,
        ConstantDisplay::Hex => 1,
        ConstantDisplay::Binary => 2,
    }
}

fn constant_display_from_tag(tag: u8) -> Result<ConstantDisplay, String> {
    match tag {
        0 => Ok(ConstantDisplay::Decimal),
        1 => Ok(ConstantDisplay::Hex),
        2 => Ok(ConstantDisplay::Binary),
        other => Err(format!("unknown constant display tag {}", other)),
    }
}

fn bin_op_tag(op: BinOp) -> u8 {
    use BinOp::*;
    match op {
        LogicalOr => 0, LogicalAnd => 1, BitOr => 2, BitXor => 3, BitAnd => 4,
        Equal => 5, NotEqual => 6, LessThan => 7, LessEqual => 8,
        GreaterThan => 9, GreaterEqual => 10, ShiftLeft => 11, ShiftRight => 12,
        Add => 13, Subtract => 14, Multiply => 15, Divide => 16, Modulo => 17, Power => 18,
    }
}

fn bin_op_from_tag(tag: u8) -> Result<BinOp, String> {
    use BinOp::*;
    Ok(match tag {
        0 => LogicalOr, 1 => LogicalAnd, 2 => BitOr, 3 => BitXor, 4 => BitAnd,
        5 => Equal, 6 => NotEqual, 7 => LessThan, 8 => LessEqual,
        9 => GreaterThan, 10 => GreaterEqual, 11 => ShiftLeft, 12 => ShiftRight,
        13 => Add, 14 => Subtract, 15 => Multiply, 16 => Divide, 17 => Modulo, 18 => Power,
        other => return Err(format!("unknown binary operator tag {}", other)),
    })
}

fn un_op_tag(op: UnOp) -> u8 {
    match op {
        UnOp::Negate => 0,
        UnOp::Not => 1,
        UnOp::BitNot => 2,
    }
}

fn un_op_from_tag(tag: u8) -> Result<UnOp, String> {
    Ok(match tag {
        0 => UnOp::Negate,
        1 => UnOp::Not,
        2 => UnOp::BitNot,
        other => return Err(format!("unknown unary operator tag {}", other)),
    })
}

fn state_kind_tag(kind: StateKind) -> u8 {
    use StateKind::*;
    match kind {
        A => 0, X => 1, Y => 2, S => 3, P => 4, Pc => 5,
        IStep => 6, Scanline => 7, PpuCycle => 8, Frame => 9,
    }
}

fn state_kind_from_tag(tag: u8) -> Result<StateKind, String> {
    use StateKind::*;
    Ok(match tag {
        0 => A, 1 => X, 2 => Y, 3 => S, 4 => P, 5 => Pc,
        6 => IStep, 7 => Scanline, 8 => PpuCycle, 9 => Frame,
        other => return Err(format!("unknown system state tag {}", other)),
    })
}
