use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// One caller-provided image plus metadata awaiting diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSubmission {
    /// Opaque submission identifier.
    pub id: String,
    /// The raw image bytes.
    pub bytes: Vec<u8>,
    /// When the image was captured.
    pub captured_at: DateTime<Utc>,
    /// Optional device or source tag (e.g., `field-cam-3`).
    pub source: Option<String>,
    /// Original file name, if the image came from a file.
    pub file_name: Option<String>,
    /// MIME type of the image, if known.
    pub content_type: Option<String>,
    /// Caller-supplied key that makes the upload idempotent.
    pub idempotency_key: Option<String>,
    /// Field location the image was taken at.
    pub location: Option<String>,
}

impl ImageSubmission {
    /// Create a new submission with a fresh id, captured now.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bytes,
            captured_at: Utc::now(),
            source: None,
            file_name: None,
            content_type: None,
            idempotency_key: None,
            location: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        self.content_type = self.content_type.or_else(|| content_type_for(&file_name).map(str::to_string));
        self.file_name = Some(file_name);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Key the upload on the image contents, so the same image is stored once
    /// however often it is submitted.
    pub fn with_content_key(self) -> Self {
        let digest = Sha256::digest(&self.bytes);
        let key = digest.iter().take(16).map(|b| format!("{b:02x}")).collect::<String>();

        self.with_idempotency_key(key)
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }
}

/// Guess the content type from a file extension.
fn content_type_for(file_name: &str) -> Option<&'static str> {
    let extension = file_name.rsplit_once('.')?.1.to_ascii_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

/// A reference to an object persisted in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredObjectRef {
    pub bucket: String,
    pub key: String,
    pub region: String,
}

impl StoredObjectRef {
    /// The last path segment of the key, which is what users refer to the image by.
    pub fn base_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for StoredObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Conversation state owned by the bot service.
///
/// The orchestrator only ever carries this around; the bot client is the
/// only component that reads or replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub(crate) attributes: HashMap<String, String>,
    pub(crate) active_intent: Option<String>,
}

impl ConversationState {
    /// State as returned by the bot: its session attributes and active intent.
    pub fn new(attributes: HashMap<String, String>, active_intent: Option<String>) -> Self {
        Self { attributes, active_intent }
    }
}

/// A conversation with one bot alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSession {
    pub bot_id: String,
    pub bot_alias_id: String,
    pub session_id: String,
    pub state: ConversationState,
}

/// Whether the bot produced a usable diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisStatus {
    /// A recognized diagnosis intent was fulfilled.
    Diagnosed,
    /// The bot did not recognize the request, or never reached a final answer.
    LowConfidence,
}

/// The final structured outcome for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub submission_id: String,
    pub object: StoredObjectRef,
    pub session_id: Option<String>,
    pub intent: Option<String>,
    pub labels: Vec<String>,
    pub confidence: Option<f64>,
    pub remediation: String,
    pub status: DiagnosisStatus,
}

impl DiagnosisResult {
    pub fn is_low_confidence(&self) -> bool {
        self.status == DiagnosisStatus::LowConfidence
    }
}

/// Current weather at a field location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: String,
    /// Air temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Mean precipitation in mm/h.
    pub precipitation: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_guesses_content_type() {
        let submission = ImageSubmission::new(vec![1, 2, 3]).with_file_name("leaf.JPG");
        assert_eq!(submission.content_type.as_deref(), Some("image/jpeg"));

        let submission = ImageSubmission::new(vec![]).with_file_name("notes.txt");
        assert_eq!(submission.content_type, None);
    }

    #[test]
    fn test_content_key_depends_on_bytes_not_name() {
        let first = ImageSubmission::new(b"leaf one".to_vec()).with_file_name("leaf.jpg").with_content_key();
        let second = ImageSubmission::new(b"leaf two".to_vec()).with_file_name("leaf.jpg").with_content_key();
        let again = ImageSubmission::new(b"leaf one".to_vec()).with_file_name("other.jpg").with_content_key();

        assert_ne!(first.idempotency_key, second.idempotency_key);
        assert_eq!(first.idempotency_key, again.idempotency_key);
        assert_eq!(first.idempotency_key.as_ref().map(String::len), Some(32));
    }

    #[test]
    fn test_stored_object_ref_display_and_base_name() {
        let object = StoredObjectRef {
            bucket: "potato-images".to_string(),
            key: "uploads/abc-leaf.png".to_string(),
            region: "eu-north-1".to_string(),
        };

        assert_eq!(object.to_string(), "s3://potato-images/uploads/abc-leaf.png");
        assert_eq!(object.base_name(), "abc-leaf.png");
    }
}
