pub mod arena;
pub mod label;
pub mod define;
pub mod enum_table;
pub mod quick_expression;

pub use arena::{DefineId, EnumElementId, EnumId, LabelId};
pub use define::Define;
pub use enum_table::{Enum, EnumElement};
pub use label::Label;
pub use quick_expression::QuickExpressionTable;

use crate::refgraph::ReferenceGraph;

/// Owns every label/define/enum arena plus the reference graph that ties
/// them to their referrers. Grouped into one struct because almost every
/// mutation (rename, delete, re-evaluate) touches more than one table.
#[derive(Default, Debug)]
pub struct SymbolTables {
    pub labels: label::LabelTable,
    pub defines: define::DefineTable,
    pub enums: enum_table::EnumTable,
    pub quick_expressions: QuickExpressionTable,
    pub references: ReferenceGraph,
}
