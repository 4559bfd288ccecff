//! Request admission: method check, URI parsing and shared-secret validation.

use std::collections::BTreeMap;

use axum::http::{Method, Uri};
use serde::Serialize;
use tracing::error;

use crate::error::HookError;

/// Query parameter carrying the shared secret.
pub const SECRET_PARAM: &str = "secret";

/// Query parameters in name order, each with every value it was given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, Vec<String>>);

impl QueryParams {
    /// Parses a raw (still percent-encoded) query string.
    pub fn parse(query: &str) -> Result<Self, HookError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|e| HookError::InvalidUri(e.to_string()))?;

        let mut params = Self::default();
        for (name, value) in pairs {
            params.append(name, value);
        }
        Ok(params)
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    /// First value for `name`, or an empty string when absent.
    pub fn first(&self, name: &str) -> &str {
        self.0
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A request that passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub path: String,
    pub params: QueryParams,
}

/// Admits a request or rejects it, checking method, URI and secret in that order.
///
/// The secret is compared by exact string equality against the first
/// `secret` query value and removed from the returned parameters. Every
/// rejection is logged with the caller address and request URI.
pub fn admit(
    method: &Method,
    request_uri: &str,
    secret: &str,
    remote_addr: &str,
) -> Result<Admitted, HookError> {
    let result = check(method, request_uri, secret);
    if let Err(e) = &result {
        error!(remote_addr = %remote_addr, uri = %request_uri, "{}", e);
    }
    result
}

fn check(method: &Method, request_uri: &str, secret: &str) -> Result<Admitted, HookError> {
    if *method != Method::POST {
        return Err(HookError::PostOnly);
    }

    let uri: Uri = request_uri
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| HookError::InvalidUri(e.to_string()))?;
    let mut params = QueryParams::parse(uri.query().unwrap_or(""))?;

    if params.first(SECRET_PARAM) != secret {
        return Err(HookError::AccessDenied);
    }
    params.remove(SECRET_PARAM);

    Ok(Admitted {
        path: uri.path().to_string(),
        params,
    })
}
