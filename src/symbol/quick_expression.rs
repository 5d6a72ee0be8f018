use crate::expr::{ConstantDisplay, Node};
use std::cell::RefCell;
use std::collections::HashMap;

/// Caches the plain-constant [`Node`] trees the disassembly driver builds
/// for every operand byte it decodes. Re-running the recursive-descent
/// parser for `$4017` thousands of times a frame is wasted work when the
/// node is always the same shape; this table memoizes it by value and
/// display base instead.
#[derive(Debug, Default)]
pub struct QuickExpressionTable {
    cache: RefCell<HashMap<(i64, ConstantDisplay), Node>>,
}

impl QuickExpressionTable {
    pub fn constant(&self, value: i64, display: ConstantDisplay) -> Node {
        self.cache
            .borrow_mut()
            .entry((value, display))
            .or_insert_with(|| Node::constant(value, display))
            .clone()
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_cached_entries_for_the_same_value_and_base() {
        let table = QuickExpressionTable::default();
        table.constant(0xFF, ConstantDisplay::Hex);
        table.constant(0xFF, ConstantDisplay::Hex);
        table.constant(0xFF, ConstantDisplay::Decimal);
        assert_eq!(table.len(), 2);
    }
}
