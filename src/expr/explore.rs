use super::node::Node;
use crate::symbol::{DefineId, EnumElementId, LabelId, SymbolTables};

/// Walks every node of `node`, calling `visitor` on each one (including
/// `node` itself) before descending into its children. Used both by
/// [`fixup`] and by callers that need a generic tree-wide mutation, such as
/// bumping a label's `nth` field after a duplicate-name rename.
pub fn explore_mut(node: &mut Node, visitor: &mut dyn FnMut(&mut Node)) {
    visitor(node);
    match node {
        Node::BinaryOp { left, right, .. } => {
            explore_mut(left, visitor);
            explore_mut(right, visitor);
        }
        Node::UnaryOp { operand, .. }
        | Node::Parens(operand)
        | Node::DereferenceOp(operand)
        | Node::Immediate(operand)
        | Node::IndexedX(operand)
        | Node::IndexedY(operand) => explore_mut(operand, visitor),
        Node::ExpressionList(items) => {
            for item in items {
                explore_mut(item, visitor);
            }
        }
        Node::FunctionCall { args, .. } => {
            for arg in args {
                explore_mut(arg, visitor);
            }
        }
        Node::Name(_)
        | Node::Constant { .. }
        | Node::Label { .. }
        | Node::Define { .. }
        | Node::EnumElement { .. }
        | Node::Accumulator
        | Node::SystemInstanceState(_) => {}
    }
}

/// Immutable pre-order walk, for callers that only inspect (reference
/// collection, placement validation).
pub fn explore(node: &Node, visitor: &mut dyn FnMut(&Node)) {
    visitor(node);
    match node {
        Node::BinaryOp { left, right, .. } => {
            explore(left, visitor);
            explore(right, visitor);
        }
        Node::UnaryOp { operand, .. }
        | Node::Parens(operand)
        | Node::DereferenceOp(operand)
        | Node::Immediate(operand)
        | Node::IndexedX(operand)
        | Node::IndexedY(operand) => explore(operand, visitor),
        Node::ExpressionList(items) => {
            for item in items {
                explore(item, visitor);
            }
        }
        Node::FunctionCall { args, .. } => {
            for arg in args {
                explore(arg, visitor);
            }
        }
        Node::Name(_)
        | Node::Constant { .. }
        | Node::Label { .. }
        | Node::Define { .. }
        | Node::EnumElement { .. }
        | Node::Accumulator
        | Node::SystemInstanceState(_) => {}
    }
}

/// One resolved leaf an expression points at, as reported by
/// [`references_of`] for the reference graph to record as an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reference {
    Label(LabelId),
    Define(DefineId),
    EnumElement(EnumElementId),
}

pub fn references_of(node: &Node) -> Vec<Reference> {
    let mut refs = Vec::new();
    explore(node, &mut |n| match n {
        Node::Label { id: Some(id), .. } => refs.push(Reference::Label(*id)),
        Node::Define { id: Some(id), .. } => refs.push(Reference::Define(*id)),
        Node::EnumElement { id: Some(id), .. } => refs.push(Reference::EnumElement(*id)),
        _ => {}
    });
    refs
}

/// Controls what [`fixup`] does with a `Name` leaf that matches nothing in
/// the symbol tables: leave it as `Name` so the listing shows it in error
/// red (`ResolveExisting`), or materialize a new zero-comment label at the
/// operand's own target address (`CreateMissingLabels`, used right after
/// the disassembly driver follows a branch/jump to an address with no
/// label yet).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixupMode {
    ResolveExisting,
    CreateMissingLabels,
}

/// Re-resolves every `Name` leaf of `node` against `tables`, turning
/// matches into `Label`/`Define`/`EnumElement` nodes carrying the
/// resolved id. Re-running this after any rename/delete is how an
/// expression tree stays in sync with the symbol tables without storing
/// back-pointers on the tables themselves.
pub fn fixup(node: &mut Node, tables: &mut SymbolTables, mode: FixupMode) -> Result<(), String> {
    let mut pending_error = None;
    explore_mut(node, &mut |n| {
        if pending_error.is_some() {
            return;
        }
        if let Node::Name(name) = n {
            if let Some(id) = tables.labels.find_by_name(name) {
                *n = Node::Label {
                    name: name.clone(), id: Some(id), nth: 0, long_mode: false,
                    cached_offset: std::cell::Cell::new(None),
                };
            } else if let Some(id) = tables.defines.find_by_name(name) {
                *n = Node::Define { name: name.clone(), id: Some(id) };
            } else if let Some(id) = tables.enums.find_element_by_name(name) {
                *n = Node::EnumElement { name: name.clone(), id: Some(id) };
            } else if mode == FixupMode::ResolveExisting {
                // Leave as `Name`; the listing renders unresolved names as
                // an error rather than failing fixup outright.
            } else {
                pending_error = Some(name.clone());
            }
        } else if let Node::Label { name, id, .. } = n {
            if id.is_none() {
                *id = tables.labels.find_by_name(name);
            }
        } else if let Node::Define { name, id } = n {
            if id.is_none() {
                *id = tables.defines.find_by_name(name);
            }
        } else if let Node::EnumElement { name, id } = n {
            if id.is_none() {
                *id = tables.enums.find_element_by_name(name);
            }
        }
    });
    if let Some(name) = pending_error {
        return Err(format!("'{}' did not resolve to a label, define, or enum element", name));
    }
    Ok(())
}
