//! Stream identity and validation
//!
//! The canonical stream address is `projectId/streamId`. Keys are opaque to
//! the engine; they only route operations to the owning per-key actor.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static PROJECT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

static STREAM_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-:.]+$").expect("valid regex"));

static ESTUARY_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid regex")
});

/// Invalid identifier error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {value:?}")]
pub struct InvalidId {
    pub field: &'static str,
    pub value: String,
}

/// Validate a project id (`^[A-Za-z0-9_-]+$`)
pub fn validate_project_id(value: &str) -> Result<(), InvalidId> {
    if PROJECT_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(InvalidId {
            field: "project id",
            value: value.to_string(),
        })
    }
}

/// Validate a stream id (`^[A-Za-z0-9_\-:.]+$`)
pub fn validate_stream_id(value: &str) -> Result<(), InvalidId> {
    if STREAM_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(InvalidId {
            field: "stream id",
            value: value.to_string(),
        })
    }
}

/// Validate an estuary id (case-insensitive UUID)
pub fn validate_estuary_id(value: &str) -> Result<(), InvalidId> {
    if ESTUARY_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(InvalidId {
            field: "estuary id",
            value: value.to_string(),
        })
    }
}

/// Canonical stream address: `projectId/streamId`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    project_id: String,
    stream_id: String,
}

impl StreamKey {
    /// Build a validated key
    pub fn new(project_id: &str, stream_id: &str) -> Result<Self, InvalidId> {
        validate_project_id(project_id)?;
        validate_stream_id(stream_id)?;
        Ok(Self {
            project_id: project_id.to_string(),
            stream_id: stream_id.to_string(),
        })
    }

    /// Key of an estuary stream (the estuary id is its stream id)
    pub fn estuary(project_id: &str, estuary_id: &str) -> Result<Self, InvalidId> {
        validate_project_id(project_id)?;
        validate_estuary_id(estuary_id)?;
        Ok(Self {
            project_id: project_id.to_string(),
            stream_id: estuary_id.to_string(),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// `projectId/streamId` path form (also the routing key)
    pub fn as_path(&self) -> String {
        format!("{}/{}", self.project_id, self.stream_id)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.stream_id)
    }
}
