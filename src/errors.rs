use std::fmt;
use std::io;

use rusoto_core::RusotoError;
use rusoto_dynamodb::{
    DeleteItemError, GetItemError, ListTablesError, PutItemError, ScanError,
};
use rusoto_s3::{GetObjectError, PutObjectError};
use thiserror::Error;

/// Enumerates high-level errors returned by this library.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Represents a URI that does not follow the `<kind>:<gid>` form.
    #[error("URI `{uri}` is malformed; expected `<kind>:<gid>`")]
    MalformedUri { uri: String },

    /// Represents a record that could not be serialized.
    #[error("unable to serialize record")]
    Json { source: serde_json::Error },

    /// Represents a serialized field that did not hold valid JSON on read.
    #[error("field `{field}` could not be decoded")]
    Decode {
        field: String,
        source: serde_json::Error,
    },

    /// Represents a value the flat backends cannot store. Structured
    /// values must be flattened before they reach a client.
    #[error("field `{field}` holds a value the backend cannot store")]
    UnstorableField { field: String },

    /// Represents a mutation attempted on a read-only database.
    #[error("database is read-only")]
    ReadOnly,

    /// Represents a local filesystem failure.
    #[error("I/O error")]
    Io { source: io::Error },

    /// Represents a failure to construct an HTTP client for a cloud
    /// backend.
    #[error("unable to construct HTTP client")]
    HttpClient {
        source: rusoto_core::request::TlsError,
    },

    /// Represents an error returned by the datastore on `get`.
    #[error("datastore get failed")]
    DbGetFailed { source: RusotoError<GetItemError> },

    /// Represents an error returned by the datastore on `put`.
    #[error("datastore put failed")]
    DbPutFailed { source: RusotoError<PutItemError> },

    /// Represents an error returned by the datastore on `delete`.
    #[error("datastore delete failed")]
    DbDeleteFailed {
        source: RusotoError<DeleteItemError>,
    },

    /// Represents an error returned by the datastore while scanning.
    #[error("datastore scan failed")]
    DbScanFailed { source: RusotoError<ScanError> },

    /// Represents an error returned by the datastore while listing
    /// collections.
    #[error("datastore table listing failed")]
    DbListFailed {
        source: RusotoError<ListTablesError>,
    },

    /// Represents an error returned by the remote server when uploading.
    #[error("upload failed")]
    UploadFailed { source: RusotoError<PutObjectError> },

    /// Represents an error returned by the remote server when downloading.
    #[error("download failed")]
    DownloadFailed { source: RusotoError<GetObjectError> },

    /// Represents a failure to generate a public URL for a stored object.
    #[error("could not generate URL for key `{key}`")]
    FailedToGenerateUrl {
        key: String,
        source: url::ParseError,
    },

    /// Represents a failure to fetch a taxonomy document.
    #[error("taxonomy fetch failed")]
    TaxonomyFetchFailed { source: reqwest::Error },

    /// Represents an error caused by an unreadable form submission.
    #[error("malformed form submission")]
    MalformedFormSubmission,

    /// Represents an error caused by missing parts in a form submission.
    #[error("missing parts")]
    PartsMissing,

    /// Represents an annotation submission refused by the workflow rules.
    #[error("annotation rejected: {reason}")]
    Rejected { reason: RejectReason },
}

impl BackendError {
    /// Whether retrying the operation could plausibly succeed. Only the
    /// managed storage backend consults this; everything else surfaces
    /// failures immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::UploadFailed { source } => transient(source),
            BackendError::DownloadFailed { source } => transient(source),
            _ => false,
        }
    }
}

fn transient<E>(error: &RusotoError<E>) -> bool {
    match error {
        RusotoError::HttpDispatch(_) => true,
        RusotoError::Unknown(response) => response.status.is_server_error(),
        _ => false,
    }
}

/// Why an annotation submission was refused. Surfaced verbatim to the
/// caller and never retried.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RejectReason {
    NotFound,
    WrongUser,
    Expired,
    AttemptsExceeded,
    AlreadyComplete,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self {
            RejectReason::NotFound => "not found",
            RejectReason::WrongUser => "wrong user",
            RejectReason::Expired => "expired",
            RejectReason::AttemptsExceeded => "attempts exceeded",
            RejectReason::AlreadyComplete => "already complete",
        };

        write!(f, "{}", reason)
    }
}
