use taxsale_core::error::AppError;
use taxsale_core::traits::Renderer;

use crate::fetcher::DocumentFetcher;
use crate::html::HtmlText;
use crate::reader::DocumentKind;

/// Rendered-strategy collaborator for pages that need no JavaScript.
///
/// Downloads the listing page and flattens its tables. Use
/// `BrowserRenderer` (feature `browser`) when the list is built client-side.
#[derive(Clone)]
pub struct StaticPageRenderer {
    fetcher: DocumentFetcher,
    html: HtmlText,
}

impl StaticPageRenderer {
    pub fn new(fetcher: DocumentFetcher) -> Self {
        Self {
            fetcher,
            html: HtmlText::new(),
        }
    }
}

impl Renderer for StaticPageRenderer {
    async fn render_and_extract(&self, location: &str) -> Result<String, AppError> {
        let doc = self.fetcher.fetch(location).await?;
        if DocumentKind::detect(&doc) != DocumentKind::Html {
            return Err(AppError::NoExtractableContent(format!(
                "{location} is not an HTML page"
            )));
        }
        let html = String::from_utf8_lossy(&doc.bytes);
        self.html.page_text(&html)
    }
}
