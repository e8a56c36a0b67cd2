use std::collections::BTreeMap;

use indexmap::IndexSet;

use crate::resolvable::Resolvable;
use crate::resolve::error::ResolveError;
use crate::types::{Extra, NormalizedPackageName, Package};

/// Per-name intersection bookkeeping for one resolve.
///
/// For every name this tracks the resolvables that constrained it and the
/// current compatible-package set, which is always the intersection of the
/// package sets contributed so far. Merging only ever shrinks a name's set;
/// when an intersection empties, the merge fails with the full contributor
/// list.
#[derive(Debug, Default)]
pub struct ResolvableSet {
    entries: BTreeMap<NormalizedPackageName, Entry>,
}

#[derive(Debug, Default)]
struct Entry {
    resolvables: Vec<Resolvable>,
    packages: Vec<Package>,
}

impl ResolvableSet {
    /// An empty set.
    pub fn new() -> ResolvableSet {
        ResolvableSet::default()
    }

    /// Records `resolvable` as a contributor to its name and intersects the
    /// name's candidate set with `packages`. Merging the same contribution
    /// twice is a no-op.
    pub fn merge(
        &mut self,
        resolvable: Resolvable,
        packages: Vec<Package>,
    ) -> Result<(), ResolveError> {
        let name = resolvable.name();
        let entry = self.entries.entry(name.clone()).or_default();

        let known = entry.resolvables.contains(&resolvable);
        if !known {
            entry.resolvables.push(resolvable);
        }

        if entry.packages.is_empty() && entry.resolvables.len() == 1 {
            entry.packages = packages;
        } else {
            entry.packages.retain(|package| packages.contains(package));
        }

        if entry.packages.is_empty() {
            return Err(ResolveError::Unsatisfiable {
                name,
                contributors: entry.resolvables.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(())
    }

    /// The current compatible set for `name`, as a copy.
    pub fn get(&self, name: &NormalizedPackageName) -> Option<Vec<Package>> {
        self.entries.get(name).map(|entry| entry.packages.clone())
    }

    /// The union of extras contributed to `name` by every resolvable.
    pub fn extras(&self, name: &NormalizedPackageName) -> IndexSet<Extra> {
        self.entries
            .get(name)
            .map(|entry| {
                entry
                    .resolvables
                    .iter()
                    .flat_map(|resolvable| resolvable.extras())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A snapshot of the full name → candidate-set mapping, in name order.
    pub fn packages(&self) -> Vec<(NormalizedPackageName, Vec<Package>)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.packages.clone()))
            .collect()
    }
}
