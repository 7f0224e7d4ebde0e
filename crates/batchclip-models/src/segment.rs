//! Segments: one unit of transcoding work.

use std::collections::BTreeMap;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::range::TimeRange;

/// Named operation plus its parameters.
///
/// Parameters are kept in a `BTreeMap` so serialization and the canonical
/// string used for cache keying are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OperationParams {
    /// Operation name (e.g. `cut`).
    operation: String,

    /// Normalized key-value parameters.
    #[serde(default)]
    params: BTreeMap<String, String>,
}

impl OperationParams {
    /// Create parameters for an operation with no extra settings.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: BTreeMap::new(),
        }
    }

    /// The default segment-cut operation.
    pub fn cut() -> Self {
        Self::new("cut")
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Look up a parameter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Whether any parameters beyond the operation name are set.
    pub fn is_bare(&self) -> bool {
        self.params.is_empty()
    }

    /// Canonical `op;k=v;...` form, stable across invocations. Used for
    /// cache key derivation.
    pub fn canonical_string(&self) -> String {
        let mut out = self.operation.clone();
        for (key, value) in &self.params {
            out.push(';');
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}

/// One time-bounded unit of work derived from a parsed range.
///
/// Created when a job is admitted and owned by the job for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    /// 1-based position within the batch.
    pub index: u32,

    /// Time range to extract.
    pub range: TimeRange,

    /// Source media file.
    pub source: PathBuf,

    /// Operation parameters.
    pub params: OperationParams,
}

impl Segment {
    /// Create a segment.
    pub fn new(index: u32, range: TimeRange, source: impl Into<PathBuf>, params: OperationParams) -> Self {
        Self {
            index,
            range,
            source: source.into(),
            params,
        }
    }
}
