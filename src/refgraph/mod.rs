use crate::expr::Reference;
use crate::symbol::{DefineId, EnumElementId, EnumId, LabelId};
use crate::types::GlobalMemoryLocation;
use std::collections::{HashMap, HashSet};

/// Everything that can hold a reference to a symbol: a memory object's
/// operand expression, a memory object whose *type* is an enum, a define's
/// body, an enum element's value expression, or an inline expression in a
/// comment. Identified by value (location or arena id), never by pointer,
/// so deleting one referrer removes exactly its own edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Referrer {
    Operand(GlobalMemoryLocation),
    TypedObject(GlobalMemoryLocation),
    Define(DefineId),
    EnumElement(EnumElementId),
    Comment(GlobalMemoryLocation),
}

/// Everything a [`Referrer`] can point at. `Enum` only appears as the
/// referent of a [`Referrer::TypedObject`] edge (an object of type Enum
/// references the enum that governs its value); the other three come out
/// of expression trees via [`crate::expr::references_of`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Referent {
    Label(LabelId),
    Define(DefineId),
    EnumElement(EnumElementId),
    Enum(EnumId),
}

impl From<Reference> for Referent {
    fn from(reference: Reference) -> Referent {
        match reference {
            Reference::Label(id) => Referent::Label(id),
            Reference::Define(id) => Referent::Define(id),
            Reference::EnumElement(id) => Referent::EnumElement(id),
        }
    }
}

/// Bidirectional edges between referrers and the symbols they name. Kept
/// separate from the symbol tables and the memory objects themselves so a
/// rename or delete can answer "who points at this" without walking every
/// region's object tree, and so deleting a label can find every operand
/// expression that needs to fall back to a bare `Name` display.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    referents_of: HashMap<Referrer, HashSet<Referent>>,
    referrers_of: HashMap<Referent, HashSet<Referrer>>,
}

impl ReferenceGraph {
    /// Replaces every outgoing edge from `referrer` with `referents`,
    /// computed fresh from [`crate::expr::references_of`]. Called whenever
    /// the referrer's expression is reparsed or fixed up, so stale edges
    /// from its previous contents never linger.
    pub fn set_references(&mut self, referrer: Referrer, referents: Vec<Referent>) {
        self.clear_referrer(referrer);
        if referents.is_empty() {
            return;
        }
        let set: HashSet<Referent> = referents.into_iter().collect();
        for referent in &set {
            self.referrers_of.entry(*referent).or_default().insert(referrer);
        }
        self.referents_of.insert(referrer, set);
    }

    pub fn clear_referrer(&mut self, referrer: Referrer) {
        if let Some(old) = self.referents_of.remove(&referrer) {
            for referent in old {
                if let Some(referrers) = self.referrers_of.get_mut(&referent) {
                    referrers.remove(&referrer);
                    if referrers.is_empty() {
                        self.referrers_of.remove(&referent);
                    }
                }
            }
        }
    }

    pub fn referrers_of(&self, referent: Referent) -> impl Iterator<Item = Referrer> + '_ {
        self.referrers_of.get(&referent).into_iter().flatten().copied()
    }

    pub fn referents_of(&self, referrer: Referrer) -> impl Iterator<Item = Referent> + '_ {
        self.referents_of.get(&referrer).into_iter().flatten().copied()
    }

    pub fn has_referrers(&self, referent: Referent) -> bool {
        self.referrers_of.get(&referent).map_or(false, |set| !set.is_empty())
    }

    pub fn len(&self) -> usize {
        self.referents_of.values().map(|set| set.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.referents_of.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operand(address: u16) -> Referrer {
        Referrer::Operand(GlobalMemoryLocation::prg(address, 0))
    }

    #[test]
    fn records_and_clears_edges() {
        let mut graph = ReferenceGraph::default();
        let referent = Referent::Label(LabelId(3));
        graph.set_references(operand(0x8000), vec![referent]);
        assert!(graph.has_referrers(referent));
        assert_eq!(graph.referrers_of(referent).collect::<Vec<_>>(), vec![operand(0x8000)]);

        graph.clear_referrer(operand(0x8000));
        assert!(!graph.has_referrers(referent));
    }

    #[test]
    fn reparsing_replaces_old_edges() {
        let mut graph = ReferenceGraph::default();
        let a = Referent::Label(LabelId(1));
        let b = Referent::Label(LabelId(2));
        graph.set_references(operand(0x8000), vec![a]);
        graph.set_references(operand(0x8000), vec![b]);
        assert!(!graph.has_referrers(a));
        assert!(graph.has_referrers(b));
    }

    #[test]
    fn a_define_and_an_operand_hold_independent_edges() {
        let mut graph = ReferenceGraph::default();
        let referent = Referent::EnumElement(EnumElementId(4));
        graph.set_references(operand(0x8000), vec![referent]);
        graph.set_references(Referrer::Define(DefineId(0)), vec![referent]);
        assert_eq!(graph.referrers_of(referent).count(), 2);

        graph.clear_referrer(Referrer::Define(DefineId(0)));
        assert!(graph.has_referrers(referent));
    }

    #[test]
    fn enum_typed_objects_count_as_references_to_the_enum() {
        let mut graph = ReferenceGraph::default();
        let referent = Referent::Enum(EnumId(1));
        graph.set_references(Referrer::TypedObject(GlobalMemoryLocation::prg(0x9000, 2)), vec![referent]);
        assert!(graph.has_referrers(referent));
    }
}
