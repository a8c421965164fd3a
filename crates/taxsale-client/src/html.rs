use std::sync::Arc;

use htmd::HtmlToMarkdown;
use scraper::{ElementRef, Html, Selector};
use taxsale_core::error::AppError;

/// Turns rendered HTML into text the row splitter understands.
///
/// Pages with `<table>` markup become one tab-separated line per table row.
/// Anything else is converted to Markdown with navigation chrome stripped.
#[derive(Clone)]
pub struct HtmlText {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmlText {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn page_text(&self, html: &str) -> Result<String, AppError> {
        if let Some(text) = table_text(html) {
            return Ok(text);
        }
        self.converter
            .convert(html)
            .map_err(|e| AppError::UnreadableDocument(format!("HTML conversion failed: {e}")))
    }
}

impl Default for HtmlText {
    fn default() -> Self {
        Self::new()
    }
}

/// Tab-separated rows from every table on the page, or `None` if the page
/// has no table cells.
pub fn table_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let rows = Selector::parse("table tr").ok()?;
    let cells = Selector::parse("th, td").ok()?;

    let lines: Vec<String> = document
        .select(&rows)
        .map(|row| {
            row.select(&cells)
                .map(cell_text)
                .collect::<Vec<_>>()
                .join("\t")
        })
        .filter(|line| !line.trim().is_empty())
        .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
