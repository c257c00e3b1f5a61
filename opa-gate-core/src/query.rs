//! Decision queries sent to the policy engine

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Structured input evaluated by the policy engine.
///
/// Built fresh for every inbound request and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionQuery {
    /// Request path split on `/`, leading empty segment included
    pub path: Vec<String>,
    /// Role claims from the upstream-supplied header
    pub roles: Vec<String>,
    /// HTTP method, e.g. `GET`
    pub method: String,
}

impl DecisionQuery {
    /// Create a query from already derived parts
    pub fn new(path: Vec<String>, roles: Vec<String>, method: impl Into<String>) -> Self {
        DecisionQuery {
            path,
            roles,
            method: method.into(),
        }
    }

    /// Derive a query from raw request attributes.
    ///
    /// `path` is the path as it appears on the wire; it is percent-decoded
    /// before splitting.
    pub fn from_request_parts(path: &str, roles_header: Option<&str>, method: &str) -> Self {
        Self::new(
            split_path(&decode_path(path)),
            parse_roles(roles_header),
            method,
        )
    }

    /// Wrap the query in the `{"input": ...}` envelope
    pub fn as_input(&self) -> PolicyInput<'_> {
        PolicyInput { input: self }
    }
}

/// Body of the outbound policy evaluation call
#[derive(Debug, Serialize)]
pub struct PolicyInput<'a> {
    /// The query under evaluation
    pub input: &'a DecisionQuery,
}

/// Percent-decode a request path the way routing sees it.
///
/// The whole path is decoded before it is split, so `%2F` becomes a
/// separator. Bytes that do not form valid UTF-8 after decoding are
/// replaced with U+FFFD. `+` is left alone.
pub fn decode_path(raw: &str) -> Cow<'_, str> {
    match urlencoding::decode_binary(raw.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(raw),
        Cow::Owned(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

/// Split a request path on `/`.
///
/// No normalization: `/v1/admin` gives `["", "v1", "admin"]` and a trailing
/// slash leaves a trailing empty segment. Policies match on these arrays.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/').map(str::to_owned).collect()
}

/// Parse the comma-separated role header.
///
/// Absent or empty yields no roles. Elements are not trimmed and empty
/// elements between commas are kept, so `"a,,b"` has three roles.
pub fn parse_roles(header: Option<&str>) -> Vec<String> {
    match header {
        None | Some("") => Vec::new(),
        Some(value) => value.split(',').map(str::to_owned).collect(),
    }
}
