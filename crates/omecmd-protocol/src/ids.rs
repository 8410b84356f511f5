//! Per-type id maps.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Entity type name → ids of that type.
///
/// Used both for request targets and for the affected objects reported in a
/// success response. A type that is absent and a type mapped to an empty
/// list mean the same thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMap(BTreeMap<String, Vec<i64>>);

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map holding a single type.
    pub fn single(type_name: impl Into<String>, ids: impl IntoIterator<Item = i64>) -> Self {
        let mut map = Self::new();
        map.extend(type_name, ids);
        map
    }

    /// Ids recorded for `type_name`; empty when the type is absent.
    pub fn ids(&self, type_name: &str) -> &[i64] {
        self.0.get(type_name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids for `type_name` as a set, for order-insensitive comparison.
    pub fn id_set(&self, type_name: &str) -> BTreeSet<i64> {
        self.ids(type_name).iter().copied().collect()
    }

    pub fn contains(&self, type_name: &str, id: i64) -> bool {
        self.ids(type_name).contains(&id)
    }

    /// Append ids under `type_name`, skipping ones already present.
    pub fn extend(&mut self, type_name: impl Into<String>, ids: impl IntoIterator<Item = i64>) {
        let entry = self.0.entry(type_name.into()).or_default();
        for id in ids {
            if !entry.contains(&id) {
                entry.push(id);
            }
        }
    }

    pub fn insert(&mut self, type_name: impl Into<String>, id: i64) {
        self.extend(type_name, [id]);
    }

    /// Merge every entry of `other` into `self`.
    pub fn merge(&mut self, other: &IdMap) {
        for (type_name, ids) in other.iter() {
            self.extend(type_name.to_string(), ids.iter().copied());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[i64])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total number of ids across every type.
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// True when no type carries any id.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop types whose list is empty.
    pub fn compact(&mut self) {
        self.0.retain(|_, ids| !ids.is_empty());
    }
}

impl<S: Into<String>, I: IntoIterator<Item = i64>> FromIterator<(S, I)> for IdMap {
    fn from_iter<T: IntoIterator<Item = (S, I)>>(iter: T) -> Self {
        let mut map = IdMap::new();
        for (type_name, ids) in iter {
            map.extend(type_name, ids);
        }
        map
    }
}
