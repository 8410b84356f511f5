//! Terminal command responses.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::IdMap;

/// Payload retrieved once a command stops running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// The command completed.
    Ok(Success),
    /// The command failed; nothing was committed.
    Err(ErrorInfo),
    /// One response per sub-request of a `do_all`, in submission order.
    DoAll { responses: Vec<Response> },
}

/// Objects a successful command touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Success {
    /// Objects included in the operation (moved, chowned, found).
    #[serde(default)]
    pub objects: IdMap,
    /// Objects deleted as a result of the operation.
    #[serde(default)]
    pub deleted: IdMap,
}

/// Why a command failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Broad failure class (e.g. `graph`, `security`).
    pub category: String,
    /// Specific failure (e.g. `unknown-type`).
    pub name: String,
    /// Details explaining the failure.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl ErrorInfo {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn is(&self, category: &str, name: &str) -> bool {
        self.category == category && self.name == name
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)?;
        if !self.parameters.is_empty() {
            let params: Vec<String> = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " {{{}}}", params.join(", "))?;
        }
        Ok(())
    }
}

impl Response {
    pub fn ok(objects: IdMap, deleted: IdMap) -> Self {
        Response::Ok(Success { objects, deleted })
    }

    pub fn err(info: ErrorInfo) -> Self {
        Response::Err(info)
    }

    /// True for an error, or a composite holding an error at any depth.
    pub fn is_error(&self) -> bool {
        match self {
            Response::Ok(_) => false,
            Response::Err(_) => true,
            Response::DoAll { responses } => responses.iter().any(Response::is_error),
        }
    }

    pub fn success(&self) -> Option<&Success> {
        match self {
            Response::Ok(success) => Some(success),
            _ => None,
        }
    }

    /// The first error, searching composites in submission order.
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Response::Ok(_) => None,
            Response::Err(info) => Some(info),
            Response::DoAll { responses } => responses.iter().find_map(Response::error),
        }
    }

    /// Positional sub-responses of a composite.
    pub fn sub_responses(&self) -> Option<&[Response]> {
        match self {
            Response::DoAll { responses } => Some(responses),
            _ => None,
        }
    }
}
