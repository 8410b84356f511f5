//! Mock Server State Management
//!
//! Users, groups, sessions, the object graph, backing files, managed
//! repositories and in-flight executions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::protocol::{Request, Response, Status};

use super::graph::{Graph, ObjRef, Ownership};

/// Administrative privileges relevant to graph operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Privilege {
    Chgrp,
    Chown,
    Delete,
}

impl Privilege {
    pub fn all() -> BTreeSet<Privilege> {
        BTreeSet::from([Privilege::Chgrp, Privilege::Chown, Privilege::Delete])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub groups: BTreeSet<i64>,
    pub default_group: i64,
    pub privileges: BTreeSet<Privilege>,
}

impl User {
    pub fn has(&self, privilege: Privilege) -> bool {
        self.privileges.contains(&privilege)
    }

    pub fn is_admin(&self) -> bool {
        !self.privileges.is_empty()
    }

    pub fn member_of(&self, group: i64) -> bool {
        self.groups.contains(&group)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

/// Group scope a command executes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupScope {
    /// Only objects of this group are visible.
    One(i64),
    /// Objects of every group the caller may see are visible.
    All,
}

/// Who is executing a command and where.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
    pub scope: GroupScope,
}

impl Caller {
    /// Whether the caller may see `ownership` in the current scope.
    pub fn sees(&self, ownership: &Ownership) -> bool {
        match self.scope {
            GroupScope::One(group) => ownership.group == group,
            GroupScope::All => self.user.is_admin() || self.user.member_of(ownership.group),
        }
    }
}

/// One accepted command.
#[derive(Debug, Clone)]
pub struct Execution {
    pub handle: String,
    pub request: Request,
    pub caller: Caller,
    pub status: Status,
    pub response: Option<Response>,
    /// Held executions never advance.
    pub held: bool,
    pub closed: bool,
}

/// Everything a command can read or change; cloned for all-or-nothing execution.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub graph: Graph,
    /// OriginalFile ids whose bytes exist on the backing store
    pub files: BTreeSet<i64>,
    /// Managed repositories by name → paths present
    pub repos: BTreeMap<String, BTreeSet<String>>,
    pub users: BTreeMap<i64, User>,
    pub groups: BTreeMap<i64, Group>,
}

/// Mock server state container
#[derive(Debug, Default)]
pub struct MockState {
    pub world: World,
    /// Session key → user id
    pub sessions: HashMap<String, i64>,
    /// Executions by handle
    pub executions: HashMap<String, Execution>,
    /// Counter for generating unique IDs
    id_counter: i64,
}

impl MockState {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a unique numeric ID
    pub fn next_id(&mut self) -> i64 {
        self.id_counter += 1;
        self.id_counter
    }

    /// Make sure generated IDs never collide with `id`
    pub fn reserve_id(&mut self, id: i64) {
        self.id_counter = self.id_counter.max(id);
    }

    pub fn user_for_session(&self, session: &str) -> Option<&User> {
        let user_id = self.sessions.get(session)?;
        self.world.users.get(user_id)
    }

    pub fn object(&self, obj: &ObjRef) -> Option<&Ownership> {
        self.world.graph.get(obj)
    }

    /// Handles still open (not closed by their owner)
    pub fn open_handles(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .executions
            .values()
            .filter(|e| !e.closed)
            .map(|e| e.handle.clone())
            .collect();
        open.sort();
        open
    }
}
