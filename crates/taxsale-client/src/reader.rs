use taxsale_core::error::AppError;
use taxsale_core::extract::split_rows;
use taxsale_core::models::{DocumentContent, RawRow, compute_hash};
use taxsale_core::traits::DocumentReader;

use crate::fetcher::{DocumentFetcher, FetchedDocument};
use crate::html::HtmlText;

/// Layout family of a fetched document, decided from magic bytes first,
/// then the content type, then the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Csv,
    Html,
    Image,
    Text,
}

impl DocumentKind {
    pub fn detect(doc: &FetchedDocument) -> Self {
        let head = &doc.bytes[..doc.bytes.len().min(512)];
        if head.starts_with(b"%PDF") {
            return Self::Pdf;
        }
        if head.starts_with(&[0x89, b'P', b'N', b'G']) || head.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Self::Image;
        }

        let content_type = doc.content_type.as_deref().unwrap_or_default();
        if content_type.contains("pdf") {
            return Self::Pdf;
        }
        if content_type.contains("csv") {
            return Self::Csv;
        }
        if content_type.contains("html") {
            return Self::Html;
        }
        if content_type.starts_with("image/") {
            return Self::Image;
        }

        match doc.extension().as_deref() {
            Some("pdf") => Self::Pdf,
            Some("csv") => Self::Csv,
            Some("htm" | "html") => Self::Html,
            Some("png" | "jpg" | "jpeg" | "tif" | "tiff") => Self::Image,
            _ => {
                let sniff = String::from_utf8_lossy(head).to_ascii_lowercase();
                if sniff.contains("<html") || sniff.contains("<table") {
                    Self::Html
                } else {
                    Self::Text
                }
            }
        }
    }
}

/// Direct-strategy reader: fetches a document and reads its own text layer.
///
/// No rendering and no OCR happen here. Encrypted PDFs and images surface as
/// errors so the orchestrator escalates to the next strategy.
#[derive(Clone)]
pub struct TextLayerReader {
    fetcher: DocumentFetcher,
    html: HtmlText,
}

impl TextLayerReader {
    pub fn new(fetcher: DocumentFetcher) -> Self {
        Self {
            fetcher,
            html: HtmlText::new(),
        }
    }

    /// Reads already-fetched bytes.
    pub async fn read_fetched(&self, doc: FetchedDocument) -> Result<DocumentContent, AppError> {
        let content_hash = compute_hash(&doc.bytes);
        let kind = DocumentKind::detect(&doc);
        tracing::debug!(location = %doc.location, ?kind, "Reading text layer");

        let (rows, first_page) = match kind {
            DocumentKind::Pdf => {
                let pages = pdf_pages(doc.bytes).await?;
                let first_page = pages.first().cloned().unwrap_or_default();
                let rows = pages.iter().flat_map(|p| split_rows(p)).collect();
                (rows, first_page)
            }
            DocumentKind::Csv => {
                let rows = csv_rows(&doc.bytes)?;
                (rows, String::new())
            }
            DocumentKind::Html => {
                let text = self.html.page_text(&decode_text(&doc.bytes)?)?;
                (split_rows(&text), text)
            }
            DocumentKind::Text => {
                let text = decode_text(&doc.bytes)?;
                (split_rows(&text), text)
            }
            DocumentKind::Image => {
                return Err(AppError::UnreadableDocument(format!(
                    "{} is an image with no text layer",
                    doc.location
                )));
            }
        };

        Ok(DocumentContent {
            rows,
            first_page,
            content_hash,
        })
    }
}

impl DocumentReader for TextLayerReader {
    async fn read(&self, location: &str) -> Result<DocumentContent, AppError> {
        let doc = self.fetcher.fetch(location).await?;
        self.read_fetched(doc).await
    }
}

/// Page texts of a PDF. Parsing is CPU-bound, so it runs on the blocking pool.
async fn pdf_pages(bytes: Vec<u8>) -> Result<Vec<String>, AppError> {
    if is_encrypted_pdf(&bytes) {
        return Err(AppError::UnreadableDocument(
            "PDF is encrypted; text layer cannot be read".into(),
        ));
    }

    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem_by_pages(&bytes))
        .await
        .map_err(|e| AppError::Generic(format!("PDF extraction task failed: {e}")))?
        .map_err(|e| AppError::UnreadableDocument(format!("PDF parsing failed: {e}")))
}

fn is_encrypted_pdf(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|w| w == b"/Encrypt")
}

fn csv_rows(bytes: &[u8]) -> Result<Vec<RawRow>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::UnreadableDocument(format!("CSV: {e}")))?;
        let row: RawRow = record.iter().map(str::to_string).collect();
        if row.iter().any(|c| !c.is_empty()) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn decode_text(bytes: &[u8]) -> Result<String, AppError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| AppError::UnreadableDocument(format!("Document is not UTF-8 text: {e}")))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}
