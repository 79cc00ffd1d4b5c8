//! Wire shapes returned by the generation provider and the normalized payload

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    #[default]
    Content,
    Image,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Content => "content",
            GenerationKind::Image => "image",
        }
    }
}

/// One call to make against the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub kind: GenerationKind,
    pub prompt: String,
    /// Overrides the configured model for this kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn content(prompt: impl Into<String>) -> Self {
        Self {
            kind: GenerationKind::Content,
            prompt: prompt.into(),
            model: None,
        }
    }

    pub fn image(prompt: impl Into<String>) -> Self {
        Self {
            kind: GenerationKind::Image,
            prompt: prompt.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Every response shape the provider has been seen to return.
///
/// Variants are tried in order; the first whose required field is present wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ProviderResponse {
    Error { error: ErrorBody },
    Candidates { candidates: Vec<Candidate> },
    Predictions { predictions: Vec<ImagePrediction> },
    Images { images: Vec<ImagePrediction> },
    Wrapped { response: Box<ProviderResponse> },
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default, alias = "finish_reason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data")]
    pub inline_data: Option<InlineData>,
    #[serde(default, alias = "file_data")]
    pub file_data: Option<FileData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: Option<String>,
    /// Base64 encoded
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(alias = "file_uri")]
    pub file_uri: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrediction {
    #[serde(
        default,
        alias = "bytesBase64",
        alias = "imageBytes",
        alias = "bytes_base64_encoded"
    )]
    pub bytes_base64_encoded: Option<String>,
    #[serde(default, alias = "mime_type")]
    pub mime_type: Option<String>,
}

/// Structured `{ "error": { ... } }` body
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    /// Canonical status name such as `RESOURCE_EXHAUSTED`
    #[serde(default)]
    pub status: Option<String>,
}

/// Normalized result of a successful generation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text {
        text: String,
    },
    Image {
        mime_type: String,
        #[serde(serialize_with = "serialize_base64")]
        data: Bytes,
    },
    ImageUri {
        mime_type: String,
        uri: String,
    },
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn image_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Image { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Payload::Text { .. } => "text/plain",
            Payload::Image { mime_type, .. } | Payload::ImageUri { mime_type, .. } => mime_type,
        }
    }

    /// File extension for writing the payload to disk or object storage
    pub fn extension(&self) -> &'static str {
        match self.mime_type() {
            "text/plain" => "txt",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/png" => "png",
            _ if matches!(self, Payload::ImageUri { .. }) => "uri",
            _ => "bin",
        }
    }
}

fn serialize_base64<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}
