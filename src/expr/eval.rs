use super::node::{BinOp, Node, StateKind, UnOp};
use crate::symbol::{DefineId, EnumElementId, LabelId};

/// Supplies the live values an expression's leaves resolve against.
/// Implementations differ by caller: a disassembly listing evaluates
/// against the static symbol tables with no live CPU, while a running
/// instance's breakpoint/watch conditions evaluate against current
/// register and scanline state plus RAM for dereferences.
pub trait EvalContext {
    fn label_address(&self, id: LabelId) -> Option<i64>;
    fn define_value(&self, id: DefineId) -> Option<i64>;
    fn enum_element_value(&self, id: EnumElementId) -> Option<i64>;
    fn state_value(&self, kind: StateKind) -> i64;
    fn read_byte(&self, address: i64) -> Option<u8> {
        let _ = address;
        None
    }
}

pub fn evaluate(node: &Node, ctx: &dyn EvalContext) -> Result<i64, String> {
    match node {
        Node::Name(name) => Err(format!("name '{}' was never resolved to a label, define, or enum element", name)),
        Node::Constant { value, .. } => Ok(*value),
        Node::BinaryOp { op, left, right } => evaluate_binary(*op, evaluate(left, ctx)?, evaluate(right, ctx)?),
        Node::UnaryOp { op, operand } => Ok(evaluate_unary(*op, evaluate(operand, ctx)?)),
        Node::Parens(inner) => evaluate(inner, ctx),
        Node::ExpressionList(items) => items.last().map(|n| evaluate(n, ctx)).unwrap_or(Ok(0)),
        Node::DereferenceOp(inner) => {
            let address = evaluate(inner, ctx)?;
            ctx.read_byte(address)
                .map(|b| b as i64)
                .ok_or_else(|| format!("no readable memory at ${:X}", address))
        }
        Node::FunctionCall { name, args } => evaluate_function(name, args, ctx),
        Node::Label { name, id, .. } => id
            .and_then(|id| ctx.label_address(id))
            .ok_or_else(|| format!("label '{}' has no resolved address", name)),
        Node::Define { name, id } => id
            .and_then(|id| ctx.define_value(id))
            .ok_or_else(|| format!("define '{}' has no resolved value", name)),
        Node::EnumElement { name, id } => id
            .and_then(|id| ctx.enum_element_value(id))
            .ok_or_else(|| format!("enum element '{}' has no resolved value", name)),
        Node::Immediate(inner) | Node::IndexedX(inner) | Node::IndexedY(inner) => evaluate(inner, ctx),
        Node::Accumulator => Err("the accumulator addressing mode marker has no evaluable value".to_string()),
        Node::SystemInstanceState(kind) => Ok(ctx.state_value(*kind)),
    }
}

fn evaluate_unary(op: UnOp, value: i64) -> i64 {
    match op {
        UnOp::Negate => -value,
        UnOp::Not => if value == 0 { 1 } else { 0 },
        UnOp::BitNot => !value,
    }
}

fn evaluate_binary(op: BinOp, left: i64, right: i64) -> Result<i64, String> {
    use BinOp::*;
    Ok(match op {
        LogicalOr => if left != 0 || right != 0 { 1 } else { 0 },
        LogicalAnd => if left != 0 && right != 0 { 1 } else { 0 },
        BitOr => left | right,
        BitXor => left ^ right,
        BitAnd => left & right,
        Equal => if left == right { 1 } else { 0 },
        NotEqual => if left != right { 1 } else { 0 },
        LessThan => if left < right { 1 } else { 0 },
        LessEqual => if left <= right { 1 } else { 0 },
        GreaterThan => if left > right { 1 } else { 0 },
        GreaterEqual => if left >= right { 1 } else { 0 },
        ShiftLeft => left.checked_shl(right as u32).ok_or("shift amount out of range")?,
        ShiftRight => left.checked_shr(right as u32).ok_or("shift amount out of range")?,
        Add => left.wrapping_add(right),
        Subtract => left.wrapping_sub(right),
        Multiply => left.wrapping_mul(right),
        Divide => left.checked_div(right).ok_or("division by zero")?,
        Modulo => left.checked_rem(right).ok_or("modulo by zero")?,
        Power => {
            if right < 0 {
                return Err("negative exponent is not supported".to_string());
            }
            left.checked_pow(right as u32).ok_or("exponentiation overflowed")?
        }
    })
}

fn evaluate_function(name: &str, args: &[Node], ctx: &dyn EvalContext) -> Result<i64, String> {
    let values: Result<Vec<i64>, String> = args.iter().map(|a| evaluate(a, ctx)).collect();
    let values = values?;
    match name {
        "LOW" => Ok(*values.get(0).ok_or("LOW() takes one argument")? & 0xFF),
        "HIGH" => Ok((*values.get(0).ok_or("HIGH() takes one argument")? >> 8) & 0xFF),
        "BANK" => Ok((*values.get(0).ok_or("BANK() takes one argument")? >> 16) & 0xFF),
        other => Err(format!("unknown function '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;

    struct NullContext;
    impl EvalContext for NullContext {
        fn label_address(&self, _id: LabelId) -> Option<i64> { None }
        fn define_value(&self, _id: DefineId) -> Option<i64> { None }
        fn enum_element_value(&self, _id: EnumElementId) -> Option<i64> { None }
        fn state_value(&self, _kind: StateKind) -> i64 { 0 }
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        let node = parse("2 + 3 * 4").unwrap();
        assert_eq!(evaluate(&node, &NullContext).unwrap(), 14);
    }

    #[test]
    fn evaluates_low_high_functions() {
        let node = parse("LOW($1234)").unwrap();
        assert_eq!(evaluate(&node, &NullContext).unwrap(), 0x34);
        let node = parse("HIGH($1234)").unwrap();
        assert_eq!(evaluate(&node, &NullContext).unwrap(), 0x12);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let node = parse("1 / 0").unwrap();
        assert!(evaluate(&node, &NullContext).is_err());
    }

    #[test]
    fn unresolved_name_is_an_error() {
        let node = Node::name("UNRESOLVED");
        assert!(evaluate(&node, &NullContext).is_err());
    }
}
