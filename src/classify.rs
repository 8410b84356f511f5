//! Response classification
//!
//! Turns a completed command into a pass/fail verdict against what the
//! caller expected. A command counts as failed when its response is an
//! error (at any depth of a composite) or its status carries FAILURE; the
//! two must agree for an expected failure to pass.

use crate::callback::Completion;
use crate::host::FailureKind;
use crate::protocol::{ErrorInfo, Response, Success};

/// Classification errors
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// Success was expected; the server sent an error response
    #[error("command failed: {info}")]
    UnexpectedFailure { info: ErrorInfo },

    /// Success was expected; the response looks fine but the status says FAILURE
    #[error("status reports {flags} but the response carries no error")]
    FailureFlag { flags: String },

    /// Failure was expected; the command succeeded
    #[error("command succeeded but was expected to fail")]
    UnexpectedSuccess,

    /// Failure was expected; the error response arrived without FAILURE
    #[error("error response {info} but status is {flags}")]
    MissingFailureFlag { info: ErrorInfo, flags: String },

    #[error("expected {expected} sub-responses, got {actual}")]
    PositionalMismatch { expected: usize, actual: usize },
}

impl ClassifyError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ClassifyError::UnexpectedFailure { .. } | ClassifyError::FailureFlag { .. } => FailureKind::Failed,
            ClassifyError::UnexpectedSuccess
            | ClassifyError::MissingFailureFlag { .. }
            | ClassifyError::PositionalMismatch { .. } => FailureKind::Mismatch,
        }
    }
}

/// Verdict on a command that met the caller's expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded(Response),
    Failed(Response),
}

impl Outcome {
    pub fn response(&self) -> &Response {
        match self {
            Outcome::Succeeded(response) | Outcome::Failed(response) => response,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Outcome::Succeeded(response) | Outcome::Failed(response) => response,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    /// Responses aligned with the submitted requests
    ///
    /// A composite yields one entry per sub-request in submission order;
    /// a single request yields itself.
    pub fn sub_responses(&self) -> &[Response] {
        let response = self.response();
        response
            .sub_responses()
            .unwrap_or_else(|| std::slice::from_ref(response))
    }

    pub fn success(&self) -> Option<&Success> {
        self.response().success()
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.response().error()
    }

    /// Ids of `type_name` the command included; empty if none or not a success
    pub fn ids(&self, type_name: &str) -> &[i64] {
        self.success().map(|s| s.objects.ids(type_name)).unwrap_or(&[])
    }

    /// Ids of `type_name` the command deleted
    pub fn deleted_ids(&self, type_name: &str) -> &[i64] {
        self.success().map(|s| s.deleted.ids(type_name)).unwrap_or(&[])
    }
}

/// Classify a completion against the expected outcome
pub fn classify(completion: &Completion, should_succeed: bool) -> Result<Outcome, ClassifyError> {
    let response = &completion.response;
    let flagged = completion.status.has_failure();
    let flags = completion.status.flags_label();

    match (should_succeed, response.error()) {
        (true, Some(info)) => Err(ClassifyError::UnexpectedFailure { info: info.clone() }),
        (true, None) if flagged => Err(ClassifyError::FailureFlag { flags }),
        (true, None) => Ok(Outcome::Succeeded(response.clone())),
        (false, None) => Err(ClassifyError::UnexpectedSuccess),
        (false, Some(info)) if !flagged => Err(ClassifyError::MissingFailureFlag {
            info: info.clone(),
            flags,
        }),
        (false, Some(_)) => Ok(Outcome::Failed(response.clone())),
    }
}

/// Check that a composite response has exactly `expected` entries
pub fn expect_positional(response: &Response, expected: usize) -> Result<&[Response], ClassifyError> {
    let subs = response
        .sub_responses()
        .unwrap_or_else(|| std::slice::from_ref(response));
    if subs.len() != expected {
        return Err(ClassifyError::PositionalMismatch {
            expected,
            actual: subs.len(),
        });
    }
    Ok(subs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{IdMap, Status};

    fn completion(response: Response, failure: bool) -> Completion {
        let mut status = Status::running("h", 3);
        status.step = 3;
        status.finish(failure, false);
        Completion { status, response }
    }

    fn ok() -> Response {
        Response::ok(IdMap::single("Image", [1]), IdMap::new())
    }

    fn err() -> Response {
        Response::err(ErrorInfo::new("graph", "unknown-type").with_param("type", "Event"))
    }

    #[test]
    fn test_expected_success() {
        let outcome = classify(&completion(ok(), false), true).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.ids("Image"), &[1]);
        assert!(outcome.deleted_ids("Image").is_empty());
    }

    #[test]
    fn test_unexpected_failure_shows_error_details() {
        let err = classify(&completion(err(), true), true).unwrap_err();
        assert_eq!(err.to_string(), "command failed: graph/unknown-type {type=Event}");
        assert_eq!(err.failure_kind(), FailureKind::Failed);
    }

    #[test]
    fn test_failure_flag_without_error() {
        let err = classify(&completion(ok(), true), true).unwrap_err();
        assert!(matches!(err, ClassifyError::FailureFlag { .. }));
    }

    #[test]
    fn test_expected_failure() {
        let outcome = classify(&completion(err(), true), false).unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.error().unwrap().is("graph", "unknown-type"));
    }

    #[test]
    fn test_expected_failure_needs_both_signals() {
        let succeeded = classify(&completion(ok(), false), false).unwrap_err();
        assert!(matches!(succeeded, ClassifyError::UnexpectedSuccess));
        assert_eq!(succeeded.failure_kind(), FailureKind::Mismatch);

        let unflagged = classify(&completion(err(), false), false).unwrap_err();
        assert!(matches!(unflagged, ClassifyError::MissingFailureFlag { .. }));
    }

    #[test]
    fn test_single_response_is_positional() {
        let outcome = Outcome::Succeeded(ok());
        assert_eq!(outcome.sub_responses().len(), 1);
        assert!(expect_positional(outcome.response(), 1).is_ok());
        assert!(matches!(
            expect_positional(outcome.response(), 2),
            Err(ClassifyError::PositionalMismatch { expected: 2, actual: 1 })
        ));
    }
}
