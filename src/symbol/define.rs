use super::arena::{Arena, DefineId};
use crate::expr::{evaluate, EvalContext, Node};
use crate::io::{BinaryReader, BinaryWriter};
use std::cell::Cell;
use std::collections::HashMap;

/// A named constant expression, e.g. `PPUCTRL = $2000`. The value is
/// evaluated lazily and cached in `cached_value`; any mutation that could
/// change it (redefinition, a referenced define or enum element changing)
/// must call [`DefineTable::invalidate`] to drop the cache rather than
/// recompute eagerly, since defines can reference other defines.
#[derive(Clone, Debug)]
pub struct Define {
    pub name: String,
    pub expression: Node,
    cached_value: Cell<Option<i64>>,
}

impl Define {
    pub fn new(name: impl Into<String>, expression: Node) -> Define {
        Define { name: name.into(), expression, cached_value: Cell::new(None) }
    }

    pub fn value(&self, ctx: &dyn EvalContext) -> Result<i64, String> {
        if let Some(value) = self.cached_value.get() {
            return Ok(value);
        }
        let value = evaluate(&self.expression, ctx)?;
        self.cached_value.set(Some(value));
        Ok(value)
    }

    pub fn invalidate(&self) {
        self.cached_value.set(None);
    }

    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.name);
        crate::expr::io::save(&self.expression, writer);
    }

    pub fn load(reader: &mut BinaryReader) -> Result<Define, String> {
        let name = reader.read_string()?;
        let expression = crate::expr::io::load(reader)?;
        Ok(Define::new(name, expression))
    }
}

#[derive(Debug, Default)]
pub struct DefineTable {
    arena: Arena<Define>,
    by_name: HashMap<String, DefineId>,
}

impl DefineTable {
    pub fn insert(&mut self, define: Define) -> DefineId {
        let name = define.name.clone();
        let id = DefineId(self.arena.insert(define));
        self.by_name.insert(name, id);
        id
    }

    pub fn remove(&mut self, id: DefineId) -> Option<Define> {
        let define = self.arena.remove(id.0)?;
        self.by_name.remove(&define.name);
        Some(define)
    }

    pub fn get(&self, id: DefineId) -> Option<&Define> {
        self.arena.get(id.0)
    }

    pub fn find_by_name(&self, name: &str) -> Option<DefineId> {
        self.by_name.get(name).copied()
    }

    /// Replaces a define's expression tree (used by post-load fixup) and
    /// drops its cached value.
    pub fn set_expression(&mut self, id: DefineId, expression: Node) -> Result<(), String> {
        let define = self.arena.get_mut(id.0).ok_or("no such define")?;
        define.expression = expression;
        define.invalidate();
        Ok(())
    }

    /// Drops every define's cached value. Called after any reparse or bulk
    /// rename, since pinpointing exactly which defines were touched is
    /// more bookkeeping than the whole table is worth re-evaluating.
    pub fn invalidate_all(&self) {
        for (_, define) in self.arena.iter() {
            define.invalidate();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DefineId, &Define)> {
        self.arena.iter().map(|(i, d)| (DefineId(i), d))
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;
    use crate::symbol::{EnumElementId, LabelId};
    use crate::expr::StateKind;

    struct NullContext;
    impl EvalContext for NullContext {
        fn label_address(&self, _id: LabelId) -> Option<i64> { None }
        fn define_value(&self, _id: DefineId) -> Option<i64> { None }
        fn enum_element_value(&self, _id: EnumElementId) -> Option<i64> { None }
        fn state_value(&self, _kind: StateKind) -> i64 { 0 }
    }

    #[test]
    fn caches_evaluated_value_until_invalidated() {
        let define = Define::new("SIZE", parse("1 + 1").unwrap());
        assert_eq!(define.value(&NullContext).unwrap(), 2);
        define.invalidate();
        assert_eq!(define.value(&NullContext).unwrap(), 2);
    }

    #[test]
    fn table_resolves_by_name() {
        let mut table = DefineTable::default();
        let id = table.insert(Define::new("SIZE", parse("4").unwrap()));
        assert_eq!(table.find_by_name("SIZE"), Some(id));
    }
}
