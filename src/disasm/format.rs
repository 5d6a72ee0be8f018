use crate::expr::{ConstantDisplay, Node};
use crate::symbol::{LabelId, QuickExpressionTable};
use crate::types::AddressingMode;

/// Reads an instruction's operand bytes (everything after the opcode) as
/// the little-endian/absolute value the addressing mode implies: a
/// zero-page or relative offset is one byte, everything else named
/// `instruction_length() > 2` is the little-endian word. Relative operands
/// are returned as the signed branch displacement, not the raw byte.
pub fn operand_value(mode: AddressingMode, bytes: &[u8]) -> i64 {
    match mode {
        AddressingMode::Implicit | AddressingMode::Accumulator => 0,
        AddressingMode::Relative => bytes[0] as i8 as i64,
        AddressingMode::Immediate
        | AddressingMode::ZeroPage
        | AddressingMode::ZeroPageX
        | AddressingMode::ZeroPageY
        | AddressingMode::IndirectX
        | AddressingMode::IndirectY => bytes[0] as i64,
        AddressingMode::Absolute | AddressingMode::AbsoluteX | AddressingMode::AbsoluteY | AddressingMode::Indirect => {
            u16::from_le_bytes([bytes[0], bytes[1]]) as i64
        }
    }
}

/// The default operand expression a freshly-disassembled instruction gets,
/// per the addressing-mode rules: immediate operands become a bare
/// `Immediate(Constant)`; modes with a resolvable target become a `Label`
/// reference (wrapped in `IndexedX`/`IndexedY`/`Parens` as the mode
/// requires); everything else (implicit/accumulator, or an unresolved
/// target) is a plain constant so the listing still shows something.
pub fn default_operand_expression(
    mode: AddressingMode,
    value: i64,
    target_label: Option<(LabelId, String)>,
    quick: &QuickExpressionTable,
) -> Node {
    if mode == AddressingMode::Immediate {
        return Node::Immediate(Box::new(quick.constant(value, ConstantDisplay::Hex)));
    }

    let base = match target_label {
        Some((id, name)) => Node::Label { name, id: Some(id), nth: 0, long_mode: mode != AddressingMode::ZeroPage, cached_offset: std::cell::Cell::new(None) },
        None => quick.constant(value, ConstantDisplay::Hex),
    };

    match mode {
        AddressingMode::ZeroPageX | AddressingMode::AbsoluteX => Node::IndexedX(Box::new(base)),
        AddressingMode::ZeroPageY | AddressingMode::AbsoluteY => Node::IndexedY(Box::new(base)),
        // `(zp,X)` indexes inside the parens; `(zp),Y` indexes outside.
        AddressingMode::IndirectX => Node::Parens(Box::new(Node::IndexedX(Box::new(base)))),
        AddressingMode::IndirectY => Node::IndexedY(Box::new(Node::Parens(Box::new(base)))),
        AddressingMode::Indirect => Node::Parens(Box::new(base)),
        _ => base,
    }
}

/// Whether `mode` ever yields a unique, statically-known target address
/// (as opposed to one that depends on runtime register contents, like
/// `(zp,X)`); only these modes get a default label created at load time.
pub fn has_static_target(mode: AddressingMode) -> bool {
    matches!(
        mode,
        AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::Relative
            | AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_operand_is_a_bare_constant() {
        let quick = QuickExpressionTable::default();
        let node = default_operand_expression(AddressingMode::Immediate, 0x42, None, &quick);
        assert!(matches!(node, Node::Immediate(_)));
    }

    #[test]
    fn absolute_x_wraps_the_label_in_indexed_x() {
        let quick = QuickExpressionTable::default();
        let node = default_operand_expression(AddressingMode::AbsoluteX, 0x8000, Some((LabelId(3), "TABLE".to_string())), &quick);
        assert!(matches!(node, Node::IndexedX(_)));
    }

    #[test]
    fn indirect_x_indexes_inside_the_parens() {
        let quick = QuickExpressionTable::default();
        let node = default_operand_expression(AddressingMode::IndirectX, 0x10, None, &quick);
        match &node {
            Node::Parens(inner) => assert!(matches!(**inner, Node::IndexedX(_))),
            _ => panic!("expected Parens(IndexedX(..))"),
        }
        // Renders with correct 6502 syntax and survives a reparse.
        let printed = crate::expr::print::print(&node);
        assert_eq!(printed, "($10,X)");
        let reparsed = crate::expr::parse(&printed).unwrap();
        assert!(matches!(&reparsed, Node::Parens(inner) if matches!(**inner, Node::IndexedX(_))));
    }

    #[test]
    fn indirect_y_indexes_outside_the_parens() {
        let quick = QuickExpressionTable::default();
        let node = default_operand_expression(AddressingMode::IndirectY, 0x10, None, &quick);
        assert_eq!(crate::expr::print::print(&node), "($10),Y");
    }

    #[test]
    fn repeated_constants_come_from_the_quick_expression_cache() {
        let quick = QuickExpressionTable::default();
        default_operand_expression(AddressingMode::Absolute, 0x2002, None, &quick);
        default_operand_expression(AddressingMode::Absolute, 0x2002, None, &quick);
        assert_eq!(quick.len(), 1);
    }

    #[test]
    fn relative_operand_decodes_as_a_signed_displacement() {
        assert_eq!(operand_value(AddressingMode::Relative, &[0xFE]), -2);
        assert_eq!(operand_value(AddressingMode::Relative, &[0x10]), 16);
    }
}
