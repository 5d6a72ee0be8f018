use crate::symbol::{DefineId, EnumElementId, LabelId};
use std::cell::Cell;

/// How a parsed integer constant was written, so the pretty printer can
/// round-trip the source's base and leading `$`/`%`/`0x` choice rather than
/// always re-emitting decimal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstantDisplay {
    Decimal,
    Hex,
    Binary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    ShiftLeft,
    ShiftRight,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        use BinOp::*;
        match self {
            LogicalOr => "||", LogicalAnd => "&&",
            BitOr => "|", BitXor => "^", BitAnd => "&",
            Equal => "==", NotEqual => "!=",
            LessThan => "<", LessEqual => "<=",
            GreaterThan => ">", GreaterEqual => ">=",
            ShiftLeft => "<<", ShiftRight => ">>",
            Add => "+", Subtract => "-",
            Multiply => "*", Divide => "/", Modulo => "%",
            Power => "**",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Negate,
    Not,
    BitNot,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Negate => "-",
            UnOp::Not => "!",
            UnOp::BitNot => "~",
        }
    }
}

/// The live CPU/PPU state identifiers usable in a breakpoint/watch
/// condition: `a,x,y,s,p,pc,istep,scanline,ppucycle,frame`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateKind {
    A, X, Y, S, P, Pc, IStep, Scanline, PpuCycle, Frame,
}

impl StateKind {
    pub fn name(self) -> &'static str {
        use StateKind::*;
        match self {
            A => "a", X => "x", Y => "y", S => "s", P => "p", Pc => "pc",
            IStep => "istep", Scanline => "scanline", PpuCycle => "ppucycle", Frame => "frame",
        }
    }

    pub fn from_name(name: &str) -> Option<StateKind> {
        use StateKind::*;
        Some(match name {
            "a" => A, "x" => X, "y" => Y, "s" => S, "p" => P, "pc" => Pc,
            "istep" => IStep, "scanline" => Scanline, "ppucycle" => PpuCycle, "frame" => Frame,
            _ => return None,
        })
    }
}

/// One node of an expression tree. Domain leaves (`Label`/`Define`/
/// `EnumElement`/`SystemInstanceState`) carry arena indices rather than
/// shared pointers; before system-level fixup runs they instead appear as
/// `Name`.
#[derive(Clone, Debug)]
pub enum Node {
    Name(String),
    Constant { value: i64, display: ConstantDisplay },
    BinaryOp { op: BinOp, left: Box<Node>, right: Box<Node> },
    UnaryOp { op: UnOp, operand: Box<Node> },
    Parens(Box<Node>),
    ExpressionList(Vec<Node>),
    DereferenceOp(Box<Node>),
    FunctionCall { name: String, args: Vec<Node> },

    /// `id` is `None` until system fixup resolves `name`, and stays `None`
    /// (with `name` preserved for display) if the label was deleted out
    /// from under this expression, a first-class "missing" display state.
    /// `cached_offset` holds a label-relative `+n` adjustment computed the
    /// last time this node was fixed up against the symbol table; cleared
    /// whenever fixup re-resolves `id`.
    Label { name: String, id: Option<LabelId>, nth: u32, long_mode: bool, cached_offset: Cell<Option<i32>> },
    Define { name: String, id: Option<DefineId> },
    EnumElement { name: String, id: Option<EnumElementId> },

    Immediate(Box<Node>),
    IndexedX(Box<Node>),
    IndexedY(Box<Node>),
    Accumulator,
    SystemInstanceState(StateKind),
}

impl Node {
    pub fn name(name: impl Into<String>) -> Node {
        Node::Name(name.into())
    }

    pub fn constant(value: i64, display: ConstantDisplay) -> Node {
        Node::Constant { value, display }
    }

    pub fn unresolved_label(name: impl Into<String>, nth: u32, long_mode: bool) -> Node {
        Node::Label { name: name.into(), id: None, nth, long_mode, cached_offset: Cell::new(None) }
    }

    pub fn is_accumulator(&self) -> bool {
        matches!(self, Node::Accumulator)
    }
}
