pub mod assist;
#[cfg(feature = "browser")]
pub mod browser;
pub mod fetcher;
pub mod html;
pub mod reader;
pub mod render;
pub mod script;

pub use assist::VisionAssistant;
#[cfg(feature = "browser")]
pub use browser::BrowserRenderer;
pub use fetcher::{DocumentFetcher, FetchedDocument};
pub use html::HtmlText;
pub use reader::{DocumentKind, TextLayerReader};
pub use render::StaticPageRenderer;
pub use script::ScriptRunner;
