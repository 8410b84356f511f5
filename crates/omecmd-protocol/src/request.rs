//! Command request variants.
//!
//! A [`Request`] describes one unit of server-side work. It is built on the
//! client, submitted once, and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::ids::IdMap;

/// A unit of server-side work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Delete the targets and everything that cascades from them.
    Delete {
        targets: IdMap,
        /// Report what would be deleted without committing.
        #[serde(default)]
        dry_run: bool,
    },
    /// Move the targets into another group.
    Chgrp { targets: IdMap, group_id: i64 },
    /// Give the targets to another user.
    Chown { targets: IdMap, user_id: i64 },
    /// Find ancestors of the targets having one of `parent_types`.
    FindParents {
        targets: IdMap,
        parent_types: Vec<String>,
        #[serde(default)]
        stop_before: Vec<String>,
    },
    /// Find descendants of the targets having one of `child_types`.
    FindChildren {
        targets: IdMap,
        child_types: Vec<String>,
        #[serde(default)]
        stop_before: Vec<String>,
    },
    /// Run a command against a managed file repository.
    RawAccess {
        repo: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Execute the sub-requests, in order, as one unit.
    DoAll { requests: Vec<Request> },
}

/// Reasons a request is refused before it is ever sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("{kind} request has no targets")]
    EmptyTargets { kind: &'static str },

    #[error("{kind} request targets {type_name}:{id}, ids must be positive")]
    InvalidId {
        kind: &'static str,
        type_name: String,
        id: i64,
    },

    #[error("{kind} request has an empty type name")]
    EmptyTypeName { kind: &'static str },

    #[error("do_all request has no sub-requests")]
    EmptyDoAll,

    #[error("raw_access request has no command")]
    EmptyCommand,

    #[error("sub-request {index}: {source}")]
    InDoAll {
        index: usize,
        #[source]
        source: Box<RequestError>,
    },
}

impl Request {
    /// Delete `ids` of `type_name`.
    pub fn delete(type_name: &str, ids: impl IntoIterator<Item = i64>) -> Self {
        Request::Delete {
            targets: IdMap::single(type_name, ids),
            dry_run: false,
        }
    }

    /// Move `ids` of `type_name` into `group_id`.
    pub fn chgrp(type_name: &str, ids: impl IntoIterator<Item = i64>, group_id: i64) -> Self {
        Request::Chgrp {
            targets: IdMap::single(type_name, ids),
            group_id,
        }
    }

    /// Give `ids` of `type_name` to `user_id`.
    pub fn chown(type_name: &str, ids: impl IntoIterator<Item = i64>, user_id: i64) -> Self {
        Request::Chown {
            targets: IdMap::single(type_name, ids),
            user_id,
        }
    }

    pub fn find_parents(
        type_name: &str,
        ids: impl IntoIterator<Item = i64>,
        parent_types: &[&str],
    ) -> Self {
        Request::FindParents {
            targets: IdMap::single(type_name, ids),
            parent_types: parent_types.iter().map(|t| t.to_string()).collect(),
            stop_before: Vec::new(),
        }
    }

    pub fn find_children(
        type_name: &str,
        ids: impl IntoIterator<Item = i64>,
        child_types: &[&str],
    ) -> Self {
        Request::FindChildren {
            targets: IdMap::single(type_name, ids),
            child_types: child_types.iter().map(|t| t.to_string()).collect(),
            stop_before: Vec::new(),
        }
    }

    pub fn raw_access(repo: &str, command: &str, args: &[&str]) -> Self {
        Request::RawAccess {
            repo: repo.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn do_all(requests: Vec<Request>) -> Self {
        Request::DoAll { requests }
    }

    /// Add stop-before types to a find request; other variants are returned unchanged.
    pub fn stop_before(mut self, types: &[&str]) -> Self {
        if let Request::FindParents { stop_before, .. } | Request::FindChildren { stop_before, .. } =
            &mut self
        {
            stop_before.extend(types.iter().map(|t| t.to_string()));
        }
        self
    }

    /// Mark a delete as dry-run; other variants are returned unchanged.
    pub fn dry_run(mut self) -> Self {
        if let Request::Delete { dry_run, .. } = &mut self {
            *dry_run = true;
        }
        self
    }

    /// Variant name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Delete { .. } => "delete",
            Request::Chgrp { .. } => "chgrp",
            Request::Chown { .. } => "chown",
            Request::FindParents { .. } => "find_parents",
            Request::FindChildren { .. } => "find_children",
            Request::RawAccess { .. } => "raw_access",
            Request::DoAll { .. } => "do_all",
        }
    }

    /// Target map for graph requests.
    pub fn targets(&self) -> Option<&IdMap> {
        match self {
            Request::Delete { targets, .. }
            | Request::Chgrp { targets, .. }
            | Request::Chown { targets, .. }
            | Request::FindParents { targets, .. }
            | Request::FindChildren { targets, .. } => Some(targets),
            Request::RawAccess { .. } | Request::DoAll { .. } => None,
        }
    }

    /// Number of progress steps the server reports while executing this request.
    pub fn step_count(&self) -> u32 {
        match self {
            Request::Delete { .. } | Request::Chgrp { .. } | Request::Chown { .. } => 3,
            Request::FindParents { .. } | Request::FindChildren { .. } => 2,
            Request::RawAccess { .. } => 1,
            Request::DoAll { requests } => requests.iter().map(Request::step_count).sum::<u32>().max(1),
        }
    }

    /// Structural checks that make a request malformed regardless of server state.
    ///
    /// Server-dependent problems (unknown types, missing objects, missing
    /// privileges) are reported later through the terminal response.
    pub fn validate(&self) -> Result<(), RequestError> {
        if let Some(targets) = self.targets() {
            let kind = self.kind();
            if targets.is_empty() {
                return Err(RequestError::EmptyTargets { kind });
            }
            for (type_name, ids) in targets.iter() {
                if type_name.trim().is_empty() {
                    return Err(RequestError::EmptyTypeName { kind });
                }
                if let Some(&id) = ids.iter().find(|&&id| id <= 0) {
                    return Err(RequestError::InvalidId {
                        kind,
                        type_name: type_name.to_string(),
                        id,
                    });
                }
            }
        }

        match self {
            Request::RawAccess { command, .. } if command.trim().is_empty() => {
                Err(RequestError::EmptyCommand)
            }
            Request::DoAll { requests } if requests.is_empty() => Err(RequestError::EmptyDoAll),
            Request::DoAll { requests } => {
                for (index, request) in requests.iter().enumerate() {
                    request.validate().map_err(|source| RequestError::InDoAll {
                        index,
                        source: Box::new(source),
                    })?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delete_wire_shape() {
        let request = Request::delete("Image", [42]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"type": "delete", "targets": {"Image": [42]}, "dry_run": false})
        );

        let parsed: Request = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_find_defaults_stop_before() {
        let parsed: Request = serde_json::from_value(json!({
            "type": "find_parents",
            "targets": {"Image": [1]},
            "parent_types": ["Project"]
        }))
        .unwrap();
        match parsed {
            Request::FindParents { stop_before, .. } => assert!(stop_before.is_empty()),
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let request = Request::Delete {
            targets: IdMap::new(),
            dry_run: false,
        };
        assert_eq!(
            request.validate(),
            Err(RequestError::EmptyTargets { kind: "delete" })
        );
    }

    #[test]
    fn test_validate_rejects_non_positive_ids() {
        let err = Request::chown("Dataset", [0], 4).validate().unwrap_err();
        assert!(matches!(err, RequestError::InvalidId { id: 0, .. }));
    }

    #[test]
    fn test_validate_allows_zero_find_types() {
        // The server decides; an empty type list is answered with an error response.
        let request = Request::find_parents("Image", [1], &[]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_nested_index() {
        let request = Request::do_all(vec![
            Request::delete("Image", [1]),
            Request::raw_access("repo-1", " ", &[]),
        ]);
        match request.validate() {
            Err(RequestError::InDoAll { index, source }) => {
                assert_eq!(index, 1);
                assert_eq!(*source, RequestError::EmptyCommand);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(Request::do_all(vec![]).validate(), Err(RequestError::EmptyDoAll));
    }

    #[test]
    fn test_step_count_sums_do_all() {
        let request = Request::do_all(vec![
            Request::chgrp("Dataset", [1], 2),
            Request::find_children("Project", [1], &["Image"]),
        ]);
        assert_eq!(request.step_count(), 5);
    }

    #[test]
    fn test_stop_before_only_touches_find() {
        let find = Request::find_children("Project", [1], &["Image"]).stop_before(&["Dataset"]);
        match find {
            Request::FindChildren { stop_before, .. } => assert_eq!(stop_before, vec!["Dataset"]),
            other => panic!("unexpected variant {:?}", other),
        }

        let delete = Request::delete("Image", [1]).stop_before(&["Dataset"]);
        assert_eq!(delete, Request::delete("Image", [1]));
    }
}
