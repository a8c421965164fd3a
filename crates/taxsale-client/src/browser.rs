use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use taxsale_core::error::AppError;
use taxsale_core::traits::Renderer;

use crate::html::HtmlText;

/// Rendered-strategy collaborator backed by headless Chromium.
///
/// County portals that build their sale lists with JavaScript, or that
/// only serve the list to something that looks like a browser, are opened
/// in a fresh tab. The rendered DOM is flattened with [`HtmlText`].
///
/// One Chromium process is shared by all clones.
#[derive(Clone)]
pub struct BrowserRenderer {
    browser: Arc<Browser>,
    html: HtmlText,
    timeout: Duration,
}

impl BrowserRenderer {
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(45)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // The snap wrapper drops headless flags, so prefer a real binary.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            html: HtmlText::new(),
            timeout,
        })
    }
}

fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl Renderer for BrowserRenderer {
    async fn render_and_extract(&self, location: &str) -> Result<String, AppError> {
        let rendered = tokio::time::timeout(self.timeout, async {
            let page = self
                .browser
                .new_page(location)
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to navigate to {location}: {e}")))?;

            let html = match page.find_element("body").await {
                Ok(_) => page
                    .content()
                    .await
                    .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}"))),
                Err(e) => Err(AppError::NoExtractableContent(format!(
                    "Page did not render a body: {e}"
                ))),
            };

            let _ = page.close().await;
            html
        })
        .await
        .map_err(|_| AppError::Timeout(self.timeout.as_secs()))??;

        let text = self.html.page_text(&rendered)?;
        tracing::debug!(%location, chars = text.len(), "Rendered page");
        Ok(text)
    }
}
