//! Attachment codec
//!
//! Normalizes uploaded files and remote references into one record that can
//! be stored, previewed and submitted to the model. The payload is kept as a
//! base64 data URL; the model endpoint only accepts image and text parts, so
//! everything that is not an image is described in text.

use crate::llm::{ContentBlock, ImageSource};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Text attachments at or above this size get no eager preview
pub const TEXT_PREVIEW_MAX_BYTES: u64 = 2 * 1024 * 1024;
/// Eager preview length in characters
pub const TEXT_PREVIEW_CHARS: usize = 4000;
/// Payloads longer than this (encoded characters) never reach durable storage
pub const STORAGE_PAYLOAD_CEILING: usize = 350_000;

pub const UNRECOVERABLE_MESSAGE: &str =
    "이 첨부 파일은 저장 공간 제한으로 원본이 보관되지 않아 복구할 수 없습니다. 파일을 다시 업로드해 주세요.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentClass {
    Image,
    Text,
    Other,
}

/// Where an attachment came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Upload,
    Remote {
        owner: String,
        repo: String,
        branch: String,
        path: String,
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub class: AttachmentClass,
    /// `data:<mime>;base64,...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_preview: Option<String>,
    /// Payload was dropped for storage; gone after reload
    #[serde(default)]
    pub session_only: bool,
    pub provenance: Provenance,
}

/// A file as handed over by the caller
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// What the user sees when opening an attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttachmentView {
    Image { data_url: String },
    Text { text: String, partial: bool },
    Download { name: String, data_url: String },
    Unrecoverable { message: String },
}

// ============================================================================
// Classification
// ============================================================================

static IMAGE_EXTENSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\.(png|jpe?g|gif|webp|bmp|svg|ico|heic)$").ok());

static TEXT_EXTENSION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\.(txt|md|markdown|csv|tsv|json|jsonl|ya?ml|toml|ini|cfg|conf|log|xml|html?|css|scss|js|mjs|cjs|jsx|ts|tsx|py|rb|rs|go|java|kt|swift|c|h|cc|cpp|hpp|cs|php|sh|bash|zsh|sql|r|lua|dart|vue|svelte)$",
    )
    .ok()
});

fn extension_matches(pattern: &LazyLock<Option<Regex>>, name: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(name))
}

fn class_from_mime(mime: &str) -> Option<AttachmentClass> {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.is_empty() || mime == "application/octet-stream" {
        return None;
    }
    if mime.starts_with("image/") {
        return Some(AttachmentClass::Image);
    }
    let texty = mime.starts_with("text/")
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
        || matches!(
            mime.as_str(),
            "application/json"
                | "application/xml"
                | "application/javascript"
                | "application/x-javascript"
                | "application/typescript"
                | "application/x-yaml"
                | "application/yaml"
                | "application/toml"
                | "application/x-sh"
                | "application/sql"
        );
    if texty {
        Some(AttachmentClass::Text)
    } else {
        Some(AttachmentClass::Other)
    }
}

/// Declared MIME type first, filename extension second
pub fn classify(name: &str, declared_mime: Option<&str>) -> AttachmentClass {
    if let Some(class) = declared_mime.and_then(class_from_mime) {
        return class;
    }
    if extension_matches(&IMAGE_EXTENSION, name) {
        AttachmentClass::Image
    } else if extension_matches(&TEXT_EXTENSION, name) {
        AttachmentClass::Text
    } else {
        AttachmentClass::Other
    }
}

fn resolve_mime(name: &str, declared: Option<&str>, class: AttachmentClass) -> String {
    if let Some(mime) = declared.map(str::trim).filter(|m| !m.is_empty()) {
        return mime.to_string();
    }
    match mime_guess::from_path(name).first() {
        Some(guess) => guess.essence_str().to_string(),
        None if class == AttachmentClass::Text => "text/plain".to_string(),
        None => "application/octet-stream".to_string(),
    }
}

fn preview_of(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(TEXT_PREVIEW_CHARS)
        .collect()
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let (header, body) = url.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    BASE64.decode(body).ok()
}

// ============================================================================
// Codec
// ============================================================================

impl Attachment {
    /// Normalize an uploaded file
    pub fn ingest(file: IncomingFile) -> Self {
        Self::build(file, Provenance::Upload)
    }

    /// Normalize a file fetched from a remote repository
    pub fn ingest_remote(file: IncomingFile, provenance: Provenance) -> Self {
        Self::build(file, provenance)
    }

    fn build(file: IncomingFile, provenance: Provenance) -> Self {
        let declared = file.mime_type.as_deref();
        let class = classify(&file.name, declared);
        let mime_type = resolve_mime(&file.name, declared, class);
        let size_bytes = file.bytes.len() as u64;

        let text_preview = (class == AttachmentClass::Text && size_bytes < TEXT_PREVIEW_MAX_BYTES)
            .then(|| preview_of(&file.bytes));

        Self {
            id: format!("att_{}", uuid::Uuid::new_v4().simple()),
            name: file.name,
            size_bytes,
            payload: Some(data_url(&mime_type, &file.bytes)),
            mime_type,
            class,
            text_preview,
            session_only: false,
            provenance,
        }
    }

    /// Content part for the model endpoint
    pub fn for_model_submission(&self) -> ContentBlock {
        if self.class == AttachmentClass::Image {
            if let Some(url) = &self.payload {
                return ContentBlock::Image {
                    source: ImageSource::Url { url: url.clone() },
                };
            }
        }

        let mut text = format!(
            "[첨부 파일: {}]\n형식: {}\n크기: {} bytes",
            self.name, self.mime_type, self.size_bytes
        );
        if let Provenance::Remote { url, .. } = &self.provenance {
            text.push_str(&format!("\n출처: {url}"));
        }
        if let Some(preview) = &self.text_preview {
            text.push_str("\n미리보기:\n");
            text.push_str(preview);
        }
        ContentBlock::text(text)
    }

    /// Storable form. Pure and idempotent: the payload survives only when not
    /// stripping and under the storage ceiling.
    pub fn for_durable_storage(&self, strip_payload: bool) -> Self {
        let mut stored = self.clone();
        let keep = stored
            .payload
            .as_ref()
            .is_some_and(|p| !strip_payload && p.len() <= STORAGE_PAYLOAD_CEILING);
        if !keep && stored.payload.take().is_some() {
            stored.session_only = true;
        }
        stored
    }

    /// Render for display, decoding on demand when there is no preview
    pub fn view(&self) -> AttachmentView {
        let unrecoverable = || AttachmentView::Unrecoverable {
            message: UNRECOVERABLE_MESSAGE.to_string(),
        };

        match self.class {
            AttachmentClass::Image => match &self.payload {
                Some(url) => AttachmentView::Image {
                    data_url: url.clone(),
                },
                None => unrecoverable(),
            },
            AttachmentClass::Text => {
                if let Some(bytes) = self.payload.as_deref().and_then(decode_data_url) {
                    return AttachmentView::Text {
                        text: String::from_utf8_lossy(&bytes).into_owned(),
                        partial: false,
                    };
                }
                match &self.text_preview {
                    Some(preview) => AttachmentView::Text {
                        text: preview.clone(),
                        partial: true,
                    },
                    None => {
                        if self.payload.is_some() {
                            tracing::warn!(attachment_id = %self.id, "Attachment payload is not a base64 data URL");
                        }
                        unrecoverable()
                    }
                }
            }
            AttachmentClass::Other => match &self.payload {
                Some(url) => AttachmentView::Download {
                    name: self.name.clone(),
                    data_url: url.clone(),
                },
                None => unrecoverable(),
            },
        }
    }
}
