//! Graph API batch requests.
//!
//! A batch is an ordered list of operations sent in one HTTP call. Later
//! operations may refer to the output of earlier, named ones through
//! `{result=<name>:<json_path>}` placeholders, which Facebook resolves
//! server-side. Responses come back as an array aligned by position with
//! the request; there are no ids to correlate on.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::form_urlencoded::byte_serialize;

use crate::error::{FbAdsError, Result};

/// Upper bound on operations in a single Graph API batch call.
pub const MAX_BATCH_SIZE: usize = 50;

static RE_RESULT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{result=([^:{}]+):([^{}]*)\}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchMethod {
    Get,
    Post,
}

/// Cross-reference to the result of an earlier named batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
    pub name: String,
    pub path: String,
}

impl ResultRef {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Every placeholder embedded in `text`, in order of appearance.
    pub fn scan(text: &str) -> Vec<ResultRef> {
        RE_RESULT_REF
            .captures_iter(text)
            .map(|c| ResultRef::new(&c[1], &c[2]))
            .collect()
    }

    /// Fails unless the referenced operation is among `prior_names`.
    pub fn validate(&self, prior_names: &HashSet<&str>) -> Result<()> {
        if prior_names.contains(self.name.as_str()) {
            Ok(())
        } else {
            Err(FbAdsError::InvalidBatch(format!(
                "{self} refers to an operation that does not precede it"
            )))
        }
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{result={}:{}}}", self.name, self.path)
    }
}

/// Percent-encode `value` for an `application/x-www-form-urlencoded` body.
/// Embedded `{result=...}` placeholders are left literal so Facebook can
/// still find and substitute them.
pub fn form_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for m in RE_RESULT_REF.find_iter(value) {
        out.extend(byte_serialize(value[last..m.start()].as_bytes()));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.extend(byte_serialize(value[last..].as_bytes()));
    out
}

/// One element of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOperation {
    pub method: BatchMethod,
    pub relative_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl BatchOperation {
    pub fn get(relative_url: impl Into<String>) -> Self {
        Self {
            method: BatchMethod::Get,
            relative_url: relative_url.into(),
            body: None,
            name: None,
        }
    }

    pub fn post(relative_url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: BatchMethod::Post,
            relative_url: relative_url.into(),
            body: Some(body.into()),
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Placeholders in the URL and body.
    pub fn references(&self) -> Vec<ResultRef> {
        let mut refs = ResultRef::scan(&self.relative_url);
        if let Some(body) = &self.body {
            refs.extend(ResultRef::scan(body));
        }
        refs
    }
}

/// Check that every placeholder points at an operation named earlier in
/// the sequence, and that names are unique.
pub fn validate_batch(operations: &[BatchOperation]) -> Result<()> {
    let mut prior: HashSet<&str> = HashSet::new();
    for op in operations {
        for reference in op.references() {
            reference.validate(&prior)?;
        }
        if let Some(name) = op.name.as_deref() {
            if !prior.insert(name) {
                return Err(FbAdsError::InvalidBatch(format!(
                    "operation name {name:?} is used twice"
                )));
            }
        }
    }
    Ok(())
}

/// One element of a batch response. Facebook returns `null` for operations
/// it did not run, so callers receive `Option<BatchResponseItem>`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponseItem {
    pub code: u16,
    #[serde(default)]
    pub body: Option<String>,
}

impl BatchResponseItem {
    pub fn is_ok(&self) -> bool {
        self.code == 200
    }
}
