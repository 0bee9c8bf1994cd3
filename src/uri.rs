use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

/// Separates the kind from the gid in the string form of a [`Uri`].
pub const SEPARATOR: char = ':';

/// Identifies one stored entity as `<kind>:<gid>`, where `kind` names the
/// entity category and `gid` is opaque and unique within that kind.
///
/// ```
/// use cms_backend::uri::Uri;
/// let uri: Uri = "audio:abc123".parse().unwrap();
/// assert_eq!(uri.kind(), "audio");
/// assert_eq!(uri.gid(), "abc123");
/// assert_eq!(uri.to_string(), "audio:abc123");
/// ```
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri {
    kind: String,
    gid: String,
}

impl Uri {
    /// Joins a `(kind, gid)` pair into a URI. Fails if either part is
    /// empty or contains the separator.
    pub fn new(kind: impl Into<String>, gid: impl Into<String>) -> Result<Self, BackendError> {
        let kind = kind.into();
        let gid = gid.into();

        let parts = [&kind, &gid];
        if parts.iter().any(|p| p.is_empty() || p.contains(SEPARATOR)) {
            return Err(BackendError::MalformedUri {
                uri: format!("{}{}{}", kind, SEPARATOR, gid),
            });
        }

        Ok(Uri { kind, gid })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn gid(&self) -> &str {
        &self.gid
    }

    /// Splits a URI string into its `(kind, gid)` pair.
    pub fn split(uri: &str) -> Result<(String, String), BackendError> {
        let parsed: Uri = uri.parse()?;

        Ok((parsed.kind, parsed.gid))
    }
}

impl FromStr for Uri {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BackendError::MalformedUri { uri: s.to_owned() };

        let mut parts = s.split(SEPARATOR);
        let kind = parts.next().ok_or_else(malformed)?;
        let gid = parts.next().ok_or_else(malformed)?;

        if parts.next().is_some() || kind.is_empty() || gid.is_empty() {
            return Err(malformed());
        }

        Ok(Uri {
            kind: kind.to_owned(),
            gid: gid.to_owned(),
        })
    }
}

impl TryFrom<String> for Uri {
    type Error = BackendError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.to_string()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.kind, SEPARATOR, self.gid)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::Uri;

    #[test]
    fn split_joined_pair_roundtrips() {
        let uri = Uri::new("audio", "abc123").unwrap();

        assert_eq!(uri.to_string(), "audio:abc123");
        assert_eq!(Uri::split("audio:abc123").unwrap(), ("audio".to_owned(), "abc123".to_owned()));
    }

    #[test]
    fn malformed_uris_are_refused() {
        for uri in &["", "audio", ":", "audio:", ":abc", "a:b:c", "::"] {
            assert!(uri.parse::<Uri>().is_err(), "{:?} should not parse", uri);
        }
    }

    #[test]
    fn invalid_parts_are_refused() {
        assert!(Uri::new("", "abc").is_err());
        assert!(Uri::new("audio", "").is_err());
        assert!(Uri::new("au:dio", "abc").is_err());
        assert!(Uri::new("audio", "a:bc").is_err());
    }

    #[test]
    fn serde_uses_the_string_form() {
        let uri = Uri::new("task", "f00").unwrap();
        let encoded = serde_json::to_string(&uri).unwrap();

        assert_eq!(encoded, "\"task:f00\"");
        assert_eq!(serde_json::from_str::<Uri>(&encoded).unwrap(), uri);
        assert!(serde_json::from_str::<Uri>("\"task\"").is_err());
    }

    proptest! {
        #[test]
        fn join_then_split_is_identity(kind in "[^:]+", gid in "[^:]+") {
            let uri = Uri::new(kind.clone(), gid.clone()).unwrap();
            let reparsed: Uri = uri.to_string().parse().unwrap();

            prop_assert_eq!(reparsed.kind(), kind);
            prop_assert_eq!(reparsed.gid(), gid);
        }
    }
}
