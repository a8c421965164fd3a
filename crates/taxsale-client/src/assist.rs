use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use taxsale_core::error::AppError;
use taxsale_core::models::{DocumentHints, RawRow};
use taxsale_core::traits::AssistedExtractor;

use crate::fetcher::{DocumentFetcher, FetchedDocument};
use crate::reader::DocumentKind;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
/// Text documents are cut to this many characters before sending.
const MAX_TEXT_CHARS: usize = 120_000;
const SYSTEM_PROMPT: &str = "You transcribe county tax sale property lists. Return one entry per property listed in the document. Copy values exactly as printed; use null for anything not present. Skip municipality headings, column titles, and page furniture. Respond ONLY with JSON matching the schema.";

/// Assisted-strategy collaborator: sends the document itself to a
/// vision-capable model on any OpenAI-compatible API.
///
/// Images go as `image_url` parts, PDFs as `file` parts, and text formats
/// inline. The model answers with structured JSON that is flattened into
/// canonical rows.
#[derive(Clone)]
pub struct VisionAssistant {
    client: Client,
    fetcher: DocumentFetcher,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl VisionAssistant {
    pub fn new(fetcher: DocumentFetcher, api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(fetcher, api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        fetcher: DocumentFetcher,
        api_key: &str,
        model: &str,
        base_url: &str,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        })
    }

    fn request(&self, hints: &DocumentHints, doc: &FetchedDocument) -> ChatRequest {
        let mut instructions = format!(
            "Jurisdiction: {} ({}).",
            hints.jurisdiction_id, hints.state_code
        );
        if let Some(title) = &hints.title {
            instructions.push_str(&format!(" Document title: {title}."));
        }
        if let Some(sale_type) = hints.sale_type {
            instructions.push_str(&format!(" Sale type: {sale_type}."));
        }
        instructions.push_str(" Extract every property listed in the attached document.");

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: json!(SYSTEM_PROMPT),
                },
                Message {
                    role: "user",
                    content: json!([{"type": "text", "text": instructions}, document_part(doc)]),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaWrapper {
                    name: "tax_sale_properties",
                    strict: true,
                    schema: response_schema(),
                },
            },
        }
    }
}

fn document_part(doc: &FetchedDocument) -> serde_json::Value {
    match DocumentKind::detect(doc) {
        DocumentKind::Image => {
            let mime = doc
                .content_type
                .clone()
                .filter(|c| c.starts_with("image/"))
                .unwrap_or_else(|| {
                    if doc.bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
                        "image/png".to_string()
                    } else {
                        "image/jpeg".to_string()
                    }
                });
            json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{mime};base64,{}", STANDARD.encode(&doc.bytes))},
            })
        }
        DocumentKind::Pdf => json!({
            "type": "file",
            "file": {
                "filename": "document.pdf",
                "file_data": format!("data:application/pdf;base64,{}", STANDARD.encode(&doc.bytes)),
            },
        }),
        DocumentKind::Csv | DocumentKind::Html | DocumentKind::Text => {
            let text: String = String::from_utf8_lossy(&doc.bytes)
                .chars()
                .take(MAX_TEXT_CHARS)
                .collect();
            json!({"type": "text", "text": text})
        }
    }
}

fn response_schema() -> serde_json::Value {
    let nullable = json!({"type": ["string", "null"]});
    json!({
        "type": "object",
        "properties": {
            "properties": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "parcel_id": {"type": "string"},
                        "owner": nullable,
                        "address": nullable,
                        "tax_amount": nullable,
                        "penalty_amount": nullable,
                        "total_due": nullable,
                        "sale_date": nullable,
                    },
                    "required": ["parcel_id", "owner", "address", "tax_amount", "penalty_amount", "total_due", "sale_date"],
                    "additionalProperties": false,
                },
            },
        },
        "required": ["properties"],
        "additionalProperties": false,
    })
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: &'static str,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Deserialize)]
struct Transcription {
    properties: Vec<TranscribedProperty>,
}

#[derive(Deserialize)]
struct TranscribedProperty {
    parcel_id: String,
    owner: Option<String>,
    address: Option<String>,
    tax_amount: Option<String>,
    penalty_amount: Option<String>,
    total_due: Option<String>,
    sale_date: Option<String>,
}

impl TranscribedProperty {
    fn into_row(self) -> RawRow {
        [
            Some(self.parcel_id),
            self.owner,
            self.address,
            self.tax_amount,
            self.penalty_amount,
            self.total_due,
            self.sale_date,
        ]
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect()
    }
}

/// Flattens the model's JSON answer into canonical rows.
fn parse_transcription(content: &str) -> Result<Vec<RawRow>, AppError> {
    let transcription: Transcription = serde_json::from_str(content).map_err(|e| {
        AppError::LlmError {
            message: format!("Model returned invalid JSON: {e}"),
            status_code: 200,
        }
    })?;
    Ok(transcription
        .properties
        .into_iter()
        .map(TranscribedProperty::into_row)
        .collect())
}

impl AssistedExtractor for VisionAssistant {
    async fn extract_with_assistance(&self, hints: &DocumentHints) -> Result<Vec<RawRow>, AppError> {
        let doc = self.fetcher.fetch(&hints.location).await?;
        let request = self.request(hints, &doc);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));
            return Err(AppError::LlmError {
                message,
                status_code,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse model response: {e}")))?;
        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from model".into(),
                status_code: 200,
                })?;

        let rows = parse_transcription(content)?;
        tracing::debug!(document_id = %hints.document_id, rows = rows.len(), "Assisted transcription");
        Ok(rows)
    }
}
