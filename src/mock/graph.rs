//! Object graph for the mock server.
//!
//! Objects are `(type, id)` pairs with an owner and a group, joined by
//! parent → child edges. Containment edges (Project → Dataset → Image, ...)
//! are what find operations walk; ownership edges (Image → Pixels, ...)
//! only matter for cascades.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::IdMap;

/// Parent → child type pairs of the containment hierarchy.
pub const CONTAINMENT: &[(&str, &str)] = &[
    ("Project", "Dataset"),
    ("Dataset", "Image"),
    ("Screen", "Plate"),
    ("Plate", "PlateAcquisition"),
    ("Plate", "Well"),
    ("PlateAcquisition", "WellSample"),
    ("Well", "WellSample"),
    ("WellSample", "Image"),
    ("Fileset", "Image"),
    ("Folder", "Folder"),
    ("Folder", "Image"),
];

/// True if `type_name` takes part in the containment hierarchy.
pub fn is_container_type(type_name: &str) -> bool {
    CONTAINMENT
        .iter()
        .any(|(parent, child)| *parent == type_name || *child == type_name)
}

/// What happens to a child when its parent is deleted or moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    /// Always follows the parent.
    Owned,
    /// Follows once no parent outside the operation remains.
    Orphan,
    /// Stays where it is.
    Keep,
}

pub fn cascade(parent: &str, child: &str) -> Cascade {
    match (parent, child) {
        ("Image", "Pixels")
        | ("Pixels", "Thumbnail")
        | ("Plate", "Well")
        | ("Plate", "PlateAcquisition")
        | ("Well", "WellSample")
        | ("WellSample", "Image")
        | ("Folder", "Folder")
        | ("Fileset", "OriginalFile") => Cascade::Owned,
        ("Project", "Dataset")
        | ("Dataset", "Image")
        | ("Screen", "Plate")
        | ("Folder", "Image")
        | ("Image", "OriginalFile")
        | ("PlateAcquisition", "WellSample") => Cascade::Orphan,
        _ => Cascade::Keep,
    }
}

/// Reference to one object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjRef {
    pub type_name: String,
    pub id: i64,
}

impl ObjRef {
    pub fn new(type_name: impl Into<String>, id: i64) -> Self {
        Self {
            type_name: type_name.into(),
            id,
        }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

/// Owner and group of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub owner: i64,
    pub group: i64,
}

/// Annotation link stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLink {
    pub link_type: String,
    pub parent: ObjRef,
    pub annotation: ObjRef,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    objects: BTreeMap<ObjRef, Ownership>,
    children: BTreeMap<ObjRef, BTreeSet<ObjRef>>,
    parents: BTreeMap<ObjRef, BTreeSet<ObjRef>>,
    links: BTreeMap<i64, StoredLink>,
}

impl Graph {
    pub fn insert(&mut self, obj: ObjRef, ownership: Ownership) {
        self.objects.insert(obj, ownership);
    }

    pub fn get(&self, obj: &ObjRef) -> Option<&Ownership> {
        self.objects.get(obj)
    }

    pub fn get_mut(&mut self, obj: &ObjRef) -> Option<&mut Ownership> {
        self.objects.get_mut(obj)
    }

    pub fn contains(&self, obj: &ObjRef) -> bool {
        self.objects.contains_key(obj)
    }

    /// Add a parent → child edge; both ends must exist.
    pub fn add_edge(&mut self, parent: &ObjRef, child: &ObjRef) -> bool {
        if !self.contains(parent) || !self.contains(child) {
            return false;
        }
        self.children.entry(parent.clone()).or_default().insert(child.clone());
        self.parents.entry(child.clone()).or_default().insert(parent.clone());
        true
    }

    pub fn children(&self, obj: &ObjRef) -> impl Iterator<Item = &ObjRef> {
        self.children.get(obj).into_iter().flatten()
    }

    pub fn parents(&self, obj: &ObjRef) -> impl Iterator<Item = &ObjRef> {
        self.parents.get(obj).into_iter().flatten()
    }

    /// Store an annotation link; both ends must exist.
    pub fn add_link(&mut self, id: i64, link: StoredLink) -> bool {
        if !self.contains(&link.parent) || !self.contains(&link.annotation) {
            return false;
        }
        self.links.insert(id, link);
        true
    }

    pub fn link(&self, id: i64) -> Option<&StoredLink> {
        self.links.get(&id)
    }

    /// Links whose parent or annotation is `obj`.
    pub fn links_touching(&self, obj: &ObjRef) -> Vec<(i64, StoredLink)> {
        self.links
            .iter()
            .filter(|(_, link)| &link.parent == obj || &link.annotation == obj)
            .map(|(id, link)| (*id, link.clone()))
            .collect()
    }

    pub fn remove_link(&mut self, id: i64) -> Option<StoredLink> {
        self.links.remove(&id)
    }

    /// Remove an object with its edges; links are left to the caller.
    pub fn remove(&mut self, obj: &ObjRef) -> Option<Ownership> {
        let ownership = self.objects.remove(obj)?;
        if let Some(children) = self.children.remove(obj) {
            for child in children {
                if let Some(parents) = self.parents.get_mut(&child) {
                    parents.remove(obj);
                }
            }
        }
        if let Some(parents) = self.parents.remove(obj) {
            for parent in parents {
                if let Some(children) = self.children.get_mut(&parent) {
                    children.remove(obj);
                }
            }
        }
        Some(ownership)
    }

    /// Everything that goes along with `roots` when they are deleted or moved.
    ///
    /// Repeats until stable: an orphan rule can only fire once every one of
    /// the child's parents is in the set, which may take several passes.
    pub fn closure(&self, roots: &BTreeSet<ObjRef>) -> BTreeSet<ObjRef> {
        let mut set = roots.clone();
        loop {
            let mut added = Vec::new();
            for node in &set {
                for child in self.children(node) {
                    if set.contains(child) {
                        continue;
                    }
                    let follows = match cascade(&node.type_name, &child.type_name) {
                        Cascade::Owned => true,
                        Cascade::Orphan => self.parents(child).all(|p| set.contains(p)),
                        Cascade::Keep => false,
                    };
                    if follows {
                        added.push(child.clone());
                    }
                }
                // A fileset goes once all of its images go
                if node.type_name == "Image" {
                    for parent in self.parents(node).filter(|p| p.type_name == "Fileset") {
                        if set.contains(parent) {
                            continue;
                        }
                        let all_images_go = self
                            .children(parent)
                            .filter(|c| c.type_name == "Image")
                            .all(|c| set.contains(c));
                        if all_images_go {
                            added.push(parent.clone());
                        }
                    }
                }
            }
            if added.is_empty() {
                return set;
            }
            set.extend(added);
        }
    }

    /// Walk containment edges from `starts`, collecting objects of `wanted` types.
    ///
    /// Objects of a `stop_before` type are neither reported nor crossed, so
    /// anything reachable only through them is excluded too. Invisible
    /// objects block the walk the same way.
    pub fn find(
        &self,
        starts: &[ObjRef],
        wanted: &BTreeSet<String>,
        stop_before: &BTreeSet<String>,
        upward: bool,
        visible: impl Fn(&ObjRef) -> bool,
    ) -> IdMap {
        let mut found: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
        let mut visited: BTreeSet<ObjRef> = BTreeSet::new();
        let mut queue: VecDeque<ObjRef> = starts.iter().cloned().collect();

        while let Some(node) = queue.pop_front() {
            let next: Vec<ObjRef> = if upward {
                self.parents(&node).cloned().collect()
            } else {
                self.children(&node).cloned().collect()
            };
            for candidate in next {
                if !visited.insert(candidate.clone()) {
                    continue;
                }
                if !is_container_type(&candidate.type_name)
                    || stop_before.contains(&candidate.type_name)
                    || !visible(&candidate)
                {
                    continue;
                }
                if wanted.contains(&candidate.type_name) {
                    found
                        .entry(candidate.type_name.clone())
                        .or_default()
                        .insert(candidate.id);
                }
                queue.push_back(candidate);
            }
        }

        found.into_iter().collect()
    }
}
