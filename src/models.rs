use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::errors::BackendError;
use crate::ids;
use crate::record::{expand, flatten, Record};
use crate::uri::Uri;

/// One persistable entity kind: a serde struct plus the declarations the
/// record layer needs to move it in and out of flat storage.
pub trait Entity: Serialize + DeserializeOwned {
    /// The URI kind under which records of this entity are stored.
    const KIND: &'static str;

    /// The fields that hold structured values and must be JSON-encoded
    /// before reaching a backend that only stores flat scalars.
    const SERIALIZED_KEYS: &'static [&'static str];

    /// Renders the entity as a flat record, ready for a backend `put`.
    fn to_flat(&self) -> Result<Record, BackendError> {
        let value = serde_json::to_value(self).map_err(|source| BackendError::Json { source })?;

        match value {
            Value::Object(record) => flatten(&record, Self::SERIALIZED_KEYS),
            _ => Err(BackendError::Json {
                source: serde::ser::Error::custom("entity did not serialize to an object"),
            }),
        }
    }

    /// Rebuilds the entity from a flat record returned by a backend `get`.
    fn from_flat(flat: &Record) -> Result<Self, BackendError> {
        let record = expand(flat, Self::SERIALIZED_KEYS)?;

        serde_json::from_value(Value::Object(record)).map_err(|source| BackendError::Json { source })
    }
}

/// The current time at whole-second resolution. Entity timestamps are
/// persisted as unix seconds, so anything finer would not survive a
/// storage roundtrip.
fn timestamp_now() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(OffsetDateTime::now_utc().unix_timestamp())
}

/// Derives the storage URI for an entity from its serialized content, so
/// identical records always land on the identical URI.
pub fn entity_uri<E: Entity>(entity: &E) -> Result<Uri, BackendError> {
    let flat = entity.to_flat()?;
    let encoded = serde_json::to_vec(&flat).map_err(|source| BackendError::Json { source })?;

    Uri::new(E::KIND, ids::gid(encoded).to_string())
}

/// The metadata record accompanying one stored audio clip. The binary
/// content itself lives in the storage backend under a content-addressed
/// key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AudioClip {
    /// The extension of the uploaded file, including the leading dot.
    pub(crate) file_ext: String,

    /// When the clip was uploaded.
    #[serde(with = "time::serde::timestamp")]
    pub(crate) created: OffsetDateTime,

    /// Where the clip came from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) source: Option<String>,
}

impl AudioClip {
    pub fn new(file_ext: impl Into<String>, source: Option<String>) -> Self {
        AudioClip {
            file_ext: file_ext.into(),
            created: timestamp_now(),
            source,
        }
    }

    pub fn file_ext(&self) -> &str {
        &self.file_ext
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    /// The storage key for the clip's bytes.
    pub fn storage_key(&self, gid: &str) -> String {
        format!("{}{}", gid, self.file_ext)
    }
}

impl Entity for AudioClip {
    const KIND: &'static str = "audio";
    const SERIALIZED_KEYS: &'static [&'static str] = &[];
}

/// How the annotator interface reflects progress back to the user.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Feedback {
    None,
    HiddenImage,
}

/// Which rendering of the audio the annotator interface shows.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visualization {
    Waveform,
    Spectrogram,
}

/// What the annotator interface needs to render one task. Field names
/// follow the interface's own camelCase conventions.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    /// The controlled vocabulary to annotate against.
    pub(crate) taxonomy: String,

    pub(crate) feedback: Feedback,

    pub(crate) visualization: Visualization,

    /// Tags to surface near the playhead.
    pub(crate) proximity_tag: Vec<String>,

    pub(crate) always_show_tags: bool,
}

impl TaskPayload {
    pub fn new(
        taxonomy: impl Into<String>,
        feedback: Feedback,
        visualization: Visualization,
    ) -> Self {
        TaskPayload {
            taxonomy: taxonomy.into(),
            feedback,
            visualization,
            proximity_tag: Vec::new(),
            always_show_tags: true,
        }
    }

    pub fn taxonomy(&self) -> &str {
        &self.taxonomy
    }
}

/// One annotation assignment over a stored audio clip. Created once and
/// never mutated afterwards.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Task {
    /// The URI of the audio to annotate.
    pub(crate) audio_uri: Uri,

    /// Provenance of the task.
    pub(crate) source: String,

    /// How many times the task has been served.
    pub(crate) serve_count: i64,

    /// How many accepted annotations the task has received.
    pub(crate) answer_count: i64,

    /// Selection weight; higher is served first.
    pub(crate) priority: i64,

    #[serde(with = "time::serde::timestamp")]
    pub(crate) created: OffsetDateTime,

    pub(crate) payload: TaskPayload,
}

impl Task {
    pub fn new(audio_uri: Uri, source: impl Into<String>, payload: TaskPayload) -> Self {
        Task {
            audio_uri,
            source: source.into(),
            serve_count: 0,
            answer_count: 0,
            priority: 0,
            created: timestamp_now(),
            payload,
        }
    }

    pub fn audio_uri(&self) -> &Uri {
        &self.audio_uri
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn serve_count(&self) -> i64 {
        self.serve_count
    }

    pub fn answer_count(&self) -> i64 {
        self.answer_count
    }
}

impl Entity for Task {
    const KIND: &'static str = "task";
    const SERIALIZED_KEYS: &'static [&'static str] = &["payload", "source"];
}

/// One annotator's claim on a task. Usable for submission only while it
/// is unexpired, incomplete, under the attempt limit, and presented by
/// the user who opened it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TaskRequest {
    pub(crate) user_id: String,

    pub(crate) task_uri: Uri,

    #[serde(with = "time::serde::timestamp")]
    pub(crate) created: OffsetDateTime,

    /// When the claim lapses. Always strictly after `created` for a
    /// positive time-to-live.
    #[serde(with = "time::serde::timestamp")]
    pub(crate) expires: OffsetDateTime,

    /// Unix timestamps of submission attempts, in order.
    pub(crate) attempts: Vec<i64>,

    pub(crate) complete: bool,
}

impl TaskRequest {
    pub fn new(user_id: impl Into<String>, task_uri: Uri, ttl: Duration) -> Self {
        let now = timestamp_now();

        TaskRequest {
            user_id: user_id.into(),
            task_uri,
            created: now,
            expires: now + ttl,
            attempts: Vec::new(),
            complete: false,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn task_uri(&self) -> &Uri {
        &self.task_uri
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn expires(&self) -> OffsetDateTime {
        self.expires
    }

    pub fn attempts(&self) -> &[i64] {
        &self.attempts
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn record_attempt(&mut self, at: OffsetDateTime) {
        self.attempts.push(at.unix_timestamp());
    }

    pub(crate) fn mark_complete(&mut self) {
        self.complete = true;
    }
}

impl Entity for TaskRequest {
    const KIND: &'static str = "request";
    const SERIALIZED_KEYS: &'static [&'static str] = &["attempts"];
}

/// One accepted submission. Immutable once persisted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AnnotationResponse {
    pub(crate) user_id: String,

    pub(crate) task_uri: Uri,

    pub(crate) request_uri: Uri,

    #[serde(with = "time::serde::timestamp")]
    pub(crate) created: OffsetDateTime,

    /// The annotator-supplied payload, passed through uninterpreted.
    pub(crate) response: Value,
}

impl AnnotationResponse {
    pub fn new(user_id: impl Into<String>, task_uri: Uri, request_uri: Uri, response: Value) -> Self {
        AnnotationResponse {
            user_id: user_id.into(),
            task_uri,
            request_uri,
            created: timestamp_now(),
            response,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn task_uri(&self) -> &Uri {
        &self.task_uri
    }

    pub fn request_uri(&self) -> &Uri {
        &self.request_uri
    }

    pub fn response(&self) -> &Value {
        &self.response
    }
}

impl Entity for AnnotationResponse {
    const KIND: &'static str = "annotation";
    const SERIALIZED_KEYS: &'static [&'static str] = &["response"];
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::Duration;

    use super::*;

    fn payload() -> TaskPayload {
        TaskPayload::new("instrument_taxonomy_v0", Feedback::None, Visualization::Waveform)
    }

    fn task() -> Task {
        let audio_uri = Uri::new("audio", "abc123").unwrap();
        Task::new(audio_uri, "uploader", payload())
    }

    #[test]
    fn task_flattens_its_declared_fields() {
        let flat = task().to_flat().unwrap();

        assert!(flat["payload"].is_string());
        assert!(flat["source"].is_string());
        assert_eq!(flat["serve_count"], json!(0));
        assert_eq!(flat["priority"], json!(0));
    }

    #[test]
    fn task_roundtrips_through_flat_form() {
        let original = task();
        let rebuilt = Task::from_flat(&original.to_flat().unwrap()).unwrap();

        assert_eq!(rebuilt.audio_uri(), original.audio_uri());
        assert_eq!(rebuilt.payload().taxonomy(), "instrument_taxonomy_v0");
        assert_eq!(rebuilt.payload().feedback, Feedback::None);
        assert_eq!(rebuilt.created(), original.created());
    }

    #[test]
    fn payload_uses_interface_field_names() {
        let encoded = serde_json::to_value(payload()).unwrap();

        assert_eq!(encoded["alwaysShowTags"], json!(true));
        assert_eq!(encoded["proximityTag"], json!([]));
        assert_eq!(encoded["feedback"], json!("none"));
        assert_eq!(encoded["visualization"], json!("waveform"));
    }

    #[test]
    fn request_expiry_follows_creation() {
        let request = TaskRequest::new("user-a", Uri::new("task", "t1").unwrap(), Duration::seconds(900));

        assert!(request.expires() > request.created());
        assert!(request.attempts().is_empty());
        assert!(!request.is_complete());
    }

    #[test]
    fn request_attempts_flatten_to_a_string() {
        let mut request = TaskRequest::new("user-a", Uri::new("task", "t1").unwrap(), Duration::seconds(900));
        request.record_attempt(OffsetDateTime::now_utc());

        let flat = request.to_flat().unwrap();
        assert!(flat["attempts"].is_string());

        let rebuilt = TaskRequest::from_flat(&flat).unwrap();
        assert_eq!(rebuilt.attempts().len(), 1);
    }

    #[test]
    fn entity_uris_are_content_addressed() {
        let original = task();

        let first = entity_uri(&original).unwrap();
        let second = entity_uri(&original).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.kind(), "task");

        let other = Task::new(Uri::new("audio", "zzz999").unwrap(), "uploader", payload());
        assert_ne!(entity_uri(&other).unwrap(), first);
    }

    #[test]
    fn annotation_response_preserves_the_payload() {
        let response = AnnotationResponse::new(
            "user-a",
            Uri::new("task", "t1").unwrap(),
            Uri::new("request", "r1").unwrap(),
            json!({"tags": ["piano", "strings"]}),
        );

        let rebuilt = AnnotationResponse::from_flat(&response.to_flat().unwrap()).unwrap();
        assert_eq!(rebuilt.response(), response.response());
        assert_eq!(rebuilt.request_uri().to_string(), "request:r1");
    }
}
