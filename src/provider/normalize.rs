//! Collapse provider response shapes into a single [`Payload`]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use thiserror::Error;

use super::types::{Candidate, ErrorBody, ImagePrediction, Payload, ProviderResponse};

const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("provider returned no usable content")]
    Empty,

    #[error("provider stopped generation: {0}")]
    Blocked(String),

    #[error("invalid base64 image data: {0}")]
    InvalidImageData(String),

    #[error("provider error{}: {}", .0.status.as_deref().map(|s| format!(" {s}")).unwrap_or_default(), .0.message)]
    Provider(ErrorBody),
}

/// Turn any [`ProviderResponse`] into a payload.
///
/// Inline image data wins over file references, which win over text, so a
/// multimodal answer to an image prompt yields the image.
pub fn normalize(response: ProviderResponse) -> Result<Payload, NormalizeError> {
    match response {
        ProviderResponse::Error { error } => Err(NormalizeError::Provider(error)),
        ProviderResponse::Candidates { candidates } => from_candidates(&candidates),
        ProviderResponse::Predictions { predictions } => from_predictions(&predictions),
        ProviderResponse::Images { images } => from_predictions(&images),
        ProviderResponse::Wrapped { response } => normalize(*response),
        ProviderResponse::Text { text } => Ok(Payload::Text { text }),
    }
}

fn from_candidates(candidates: &[Candidate]) -> Result<Payload, NormalizeError> {
    let parts = candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter());

    let mut text = String::new();
    let mut file = None;

    for part in parts {
        if let Some(inline) = &part.inline_data {
            let mime_type = inline
                .mime_type
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
            return decode_image(&inline.data, mime_type);
        }
        if file.is_none() {
            if let Some(data) = &part.file_data {
                file = Some(Payload::ImageUri {
                    mime_type: data
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
                    uri: data.file_uri.clone(),
                });
            }
        }
        if let Some(t) = &part.text {
            text.push_str(t);
        }
    }

    if let Some(file) = file {
        return Ok(file);
    }
    if !text.is_empty() {
        return Ok(Payload::Text { text });
    }

    // No content at all; surface the stop reason when there is one.
    match candidates.iter().find_map(|c| c.finish_reason.as_deref()) {
        Some(reason) if reason != "STOP" => Err(NormalizeError::Blocked(reason.to_string())),
        _ => Err(NormalizeError::Empty),
    }
}

fn from_predictions(predictions: &[ImagePrediction]) -> Result<Payload, NormalizeError> {
    let prediction = predictions
        .iter()
        .find(|p| p.bytes_base64_encoded.is_some())
        .ok_or(NormalizeError::Empty)?;

    let encoded = prediction.bytes_base64_encoded.as_deref().unwrap_or_default();
    let mime_type = prediction
        .mime_type
        .clone()
        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
    decode_image(encoded, mime_type)
}

fn decode_image(encoded: &str, mime_type: String) -> Result<Payload, NormalizeError> {
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|e| NormalizeError::InvalidImageData(e.to_string()))?;
    if data.is_empty() {
        return Err(NormalizeError::Empty);
    }
    Ok(Payload::Image {
        mime_type,
        data: Bytes::from(data),
    })
}
