use super::node::{ConstantDisplay, Node};
use std::fmt::Write as _;

/// Renders a [`Node`] back to source text. Resolved `Label`/`Define`/
/// `EnumElement` leaves print their stored display name, so a round trip
/// through [`super::parser::parse`] -> fixup -> `print` reproduces the
/// original spelling even after the name has been looked up to an id.
pub fn print(node: &Node) -> String {
    let mut out = String::new();
    write_node(&mut out, node);
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Name(name) => { out.push_str(name); }
        Node::Constant { value, display } => write_constant(out, *value, *display),
        Node::BinaryOp { op, left, right } => {
            write_node(out, left);
            let _ = write!(out, " {} ", op.symbol());
            write_node(out, right);
        }
        Node::UnaryOp { op, operand } => {
            out.push_str(op.symbol());
            write_node(out, operand);
        }
        Node::Parens(inner) => {
            out.push('(');
            write_node(out, inner);
            out.push(')');
        }
        Node::ExpressionList(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 { out.push_str(", "); }
                write_node(out, item);
            }
            out.push(')');
        }
        Node::DereferenceOp(inner) => {
            out.push('[');
            write_node(out, inner);
            out.push(']');
        }
        Node::FunctionCall { name, args } => {
            out.push_str(name);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 { out.push_str(", "); }
                write_node(out, arg);
            }
            out.push(')');
        }
        Node::Label { name, .. } => out.push_str(name),
        Node::Define { name, .. } => out.push_str(name),
        Node::EnumElement { name, .. } => out.push_str(name),
        Node::Immediate(inner) => {
            out.push('#');
            write_node(out, inner);
        }
        Node::IndexedX(inner) => {
            write_node(out, inner);
            out.push_str(",X");
        }
        Node::IndexedY(inner) => {
            write_node(out, inner);
            out.push_str(",Y");
        }
        Node::Accumulator => out.push('A'),
        Node::SystemInstanceState(kind) => out.push_str(kind.name()),
    }
}

fn write_constant(out: &mut String, value: i64, display: ConstantDisplay) {
    match display {
        ConstantDisplay::Decimal => { let _ = write!(out, "{}", value); }
        ConstantDisplay::Hex => {
            if value < 0 {
                let _ = write!(out, "-${:X}", -value);
            } else {
                let _ = write!(out, "${:X}", value);
            }
        }
        ConstantDisplay::Binary => {
            if value < 0 {
                let _ = write!(out, "-%{:b}", -value);
            } else {
                let _ = write!(out, "%{:b}", value);
            }
        }
    }
}
