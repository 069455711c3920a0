//! The request pipeline's data model.

use std::collections::BTreeMap;
use std::path::PathBuf;

use manifest_promotion_proto as proto;

/// A tagged value tree standing in for the wire's free-form attribute maps
/// (`source.metadata.attributes` and top-level `metadata`). Convertible
/// to/from the generated `AttributeMap`/`AttributeValue` messages and to/from
/// `serde_json::Value` for internal use (commit body templating, reviewer
/// payloads).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<AttributeValue>),
    Object(BTreeMap<String, AttributeValue>),
}

impl Default for AttributeValue {
    fn default() -> Self {
        Self::Object(BTreeMap::new())
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(a) => Self::Array(a.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(o) => {
                Self::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<AttributeValue> for serde_json::Value {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Null => serde_json::Value::Null,
            AttributeValue::Bool(b) => serde_json::Value::Bool(b),
            AttributeValue::Number(n) => serde_json::json!(n),
            AttributeValue::String(s) => serde_json::Value::String(s),
            AttributeValue::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(Into::into).collect())
            }
            AttributeValue::Object(o) => {
                serde_json::Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<proto::AttributeValue> for AttributeValue {
    fn from(value: proto::AttributeValue) -> Self {
        use proto::attribute_value::Kind;

        match value.kind {
            None | Some(Kind::NullValue(_)) => Self::Null,
            Some(Kind::BoolValue(b)) => Self::Bool(b),
            Some(Kind::NumberValue(n)) => Self::Number(n),
            Some(Kind::StringValue(s)) => Self::String(s),
            Some(Kind::ListValue(list)) => {
                Self::Array(list.values.into_iter().map(Into::into).collect())
            }
            Some(Kind::ObjectValue(map)) => {
                Self::Object(map.fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<AttributeValue> for proto::AttributeValue {
    fn from(value: AttributeValue) -> Self {
        use proto::attribute_value::Kind;

        let kind = match value {
            AttributeValue::Null => Kind::NullValue(proto::NullValue::NullValue as i32),
            AttributeValue::Bool(b) => Kind::BoolValue(b),
            AttributeValue::Number(n) => Kind::NumberValue(n),
            AttributeValue::String(s) => Kind::StringValue(s),
            AttributeValue::Array(a) => Kind::ListValue(proto::AttributeList {
                values: a.into_iter().map(Into::into).collect(),
            }),
            AttributeValue::Object(o) => Kind::ObjectValue(proto::AttributeMap {
                fields: o.into_iter().map(|(k, v)| (k, v.into())).collect(),
            }),
        };

        Self { kind: Some(kind) }
    }
}

/// Converts a wire-level attribute map directly into an `Object` attribute
/// value, defaulting to an empty object when absent.
pub fn attribute_map_from_proto(map: Option<proto::AttributeMap>) -> AttributeValue {
    let fields = map
        .map(|m| m.fields.into_iter().map(|(k, v)| (k, v.into())).collect())
        .unwrap_or_default();
    AttributeValue::Object(fields)
}

pub fn attribute_map_to_proto(value: &AttributeValue) -> proto::AttributeMap {
    match value {
        AttributeValue::Object(fields) => proto::AttributeMap {
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect(),
        },
        _ => proto::AttributeMap::default(),
    }
}

/// A Git repository URL, as carried by the request and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub url: String,
}

impl Repository {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestSourceMetadata {
    pub commit_sha: String,
    pub actor: String,
    pub attributes: AttributeValue,
}

#[derive(Debug, Clone)]
pub struct RequestSource {
    pub repository: Repository,
    pub metadata: RequestSourceMetadata,
}

/// Filesystem paths under the per-request scratch root, filled in by the
/// stream handler before the pipeline runs.
#[derive(Debug, Clone, Default)]
pub struct RequestPaths {
    pub temp_root: PathBuf,
    pub repository_dir: PathBuf,
    pub updated_manifests_dir: PathBuf,
}

/// An ingested update request. Immutable once ingestion finishes.
#[derive(Debug, Clone)]
pub struct Request {
    pub target_repository: Repository,
    pub environment: String,
    pub update_identifier: String,
    pub app_name: String,
    pub dry_run: bool,
    pub auto_review: bool,
    pub source: Option<RequestSource>,
    pub paths: RequestPaths,
    pub total_files: u32,
    pub metadata: AttributeValue,
}

impl Request {
    /// Validates the fields the client is required to supply
    /// (`target_repository`, `environment`, `app_name`, `update_identifier`).
    pub fn validate(&self) -> Result<(), crate::error::IngestError> {
        use crate::error::IngestError;

        if self.target_repository.url.is_empty() {
            return Err(IngestError::MissingTargetRepository);
        }
        if self.environment.is_empty() {
            return Err(IngestError::MissingEnvironment);
        }
        if self.app_name.is_empty() {
            return Err(IngestError::MissingAppName);
        }
        if self.update_identifier.is_empty() {
            return Err(IngestError::MissingUpdateIdentifier);
        }
        Ok(())
    }
}

/// The per-update and trunk branch names for an environment, derived from
/// `(environment, app_name, update_identifier)` by the default `branch`
/// targeter. Ref names use the `environment/<env>` and
/// `environment/<env>-next/<app>/<update>` scheme from
/// the default `branch` targeter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentBranches {
    pub trunk: String,
    pub next: String,
}

/// The branch triple a [`crate::strategies::targeter::Targeter`] resolves:
/// `source` is the per-update branch, `target` is the trunk of the
/// environment, and `upstream_source` is what `source` should be created
/// from (empty to request an orphan branch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBranch {
    pub source: String,
    pub target: String,
    pub upstream_source: String,
}

impl TargetBranch {
    /// An orphan `source` is requested by leaving `upstream_source` empty.
    pub fn is_orphan(&self) -> bool {
        self.upstream_source.is_empty()
    }
}

/// Produced by the targeter from a [`Request`].
#[derive(Debug, Clone)]
pub struct Target {
    pub repository: Repository,
    pub branch: TargetBranch,
    pub directory: String,
}

/// Returned by the reviewer. `completed` is set when an equivalent review
/// already existed and had merged.
#[derive(Debug, Clone, Default)]
pub struct CreateReviewResult {
    pub created: bool,
    pub url: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentResponse {
    pub repository: Repository,
    pub name: String,
    pub ref_name: String,
}

impl Default for Repository {
    fn default() -> Self {
        Self { url: String::new() }
    }
}

/// The pipeline's final accounting. Exactly one of `msg`/`error` is
/// populated; the stream handler maps this into either a terminal `Error`
/// frame or a `Summary` frame.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub msg: String,
    pub error: String,
    pub review_result: Option<CreateReviewResult>,
    pub environment: Option<EnvironmentResponse>,
    pub updated_files_count: u32,
    pub dry_run: bool,
}

impl Response {
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// A progress event tagged by kind. `Heading` starts a stage,
/// `Progress` is a mid-stage update, and `Success`/`Failure` close it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Heading,
    Progress,
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub status: String,
}

impl From<ProgressKind> for proto::ProgressKind {
    fn from(kind: ProgressKind) -> Self {
        match kind {
            ProgressKind::Heading => proto::ProgressKind::Heading,
            ProgressKind::Progress => proto::ProgressKind::Progress,
            ProgressKind::Success => proto::ProgressKind::Success,
            ProgressKind::Failure => proto::ProgressKind::Failure,
        }
    }
}

/// A single chunk of an uploaded file. The wire protocol
/// permits multiple chunks per file; the reference uploader always sends one
/// final chunk.
#[derive(Debug, Clone)]
pub struct FileChunk {
    pub filename: String,
    pub content: Vec<u8>,
    pub is_last_chunk: bool,
}
