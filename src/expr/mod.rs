pub mod lexer;
pub mod node;
pub mod parser;
pub mod print;
pub mod eval;
pub mod explore;
pub mod io;

pub use node::{BinOp, ConstantDisplay, Node, StateKind, UnOp};
pub use parser::parse;
pub use eval::{evaluate, EvalContext};
pub use explore::{explore, explore_mut, fixup, references_of, FixupMode, Reference};

pub type Expression = Node;
