//! Fact sets, domains and the per-routine fact table.

use std::fmt;

use ahash::AHashMap;
use sable_ir::{Inst, Value};

use crate::knowledge::Knowledge;
use crate::location::Location;

/// Where a fact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Everywhere in the routine.
    Routine,
    /// Every instruction dominated by this one, itself included.
    From(Inst),
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Routine => f.write_str("routine"),
            Domain::From(inst) => write!(f, "from {inst}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactSet {
    facts: AHashMap<Location, Knowledge>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn get(&self, loc: &Location) -> Option<&Knowledge> {
        self.facts.get(loc)
    }

    /// Facts about the value itself.
    pub fn root(&self) -> Knowledge {
        self.facts.get(&Location::root()).copied().unwrap_or_default()
    }

    pub fn entry(&mut self, loc: Location) -> &mut Knowledge {
        self.facts.entry(loc).or_default()
    }

    pub fn root_mut(&mut self) -> &mut Knowledge {
        self.entry(Location::root())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Location, &Knowledge)> {
        self.facts.iter()
    }

    /// Unions `knowledge` into `loc`. Returns whether anything changed.
    pub fn add(&mut self, loc: Location, knowledge: &Knowledge) -> bool {
        match self.facts.get_mut(&loc) {
            Some(existing) => existing.union(knowledge),
            None => {
                self.facts.insert(loc, *knowledge);
                !knowledge.is_empty()
            }
        }
    }

    pub fn union(&mut self, other: &FactSet) -> bool {
        let mut changed = false;
        for (loc, knowledge) in &other.facts {
            changed |= self.add(loc.clone(), knowledge);
        }
        changed
    }

    pub fn intersect(&mut self, other: &FactSet) {
        self.facts.retain(|loc, knowledge| match other.facts.get(loc) {
            Some(theirs) => {
                knowledge.intersect(theirs);
                true
            }
            None => false,
        });
    }
}

impl fmt::Display for FactSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self
            .facts
            .iter()
            .map(|(loc, knowledge)| format!("{loc} {knowledge}"))
            .collect();
        entries.sort();
        write!(f, "{}", entries.join("; "))
    }
}

/// Every derived fact of one routine: value -> domain -> facts.
///
/// Domains keep their insertion order so queries are deterministic.
#[derive(Debug, Clone, Default)]
pub struct FactTable {
    values: AHashMap<Value, Vec<(Domain, FactSet)>>,
}

impl FactTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, value: Value, domain: Domain) -> Option<&FactSet> {
        self.values
            .get(&value)?
            .iter()
            .find(|(d, _)| *d == domain)
            .map(|(_, set)| set)
    }

    pub fn entry(&mut self, value: Value, domain: Domain) -> &mut FactSet {
        let domains = self.values.entry(value).or_default();
        let index = match domains.iter().position(|(d, _)| *d == domain) {
            Some(index) => index,
            None => {
                domains.push((domain, FactSet::new()));
                domains.len() - 1
            }
        };
        &mut domains[index].1
    }

    pub fn domains(&self, value: Value) -> impl Iterator<Item = &(Domain, FactSet)> {
        self.values.get(&value).into_iter().flatten()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }
}
