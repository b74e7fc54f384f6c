//! # Map Page Snapshot Source
//!
//! Fetches the remote map page and extracts one [`RawCell`] per `.map-cell`
//! element. The three fragments come from the cell's `.bottom-left-text`,
//! `.bottom-right-text` and `.top-right-text` descendants; text of several
//! matching descendants is concatenated, and the top fragment is trimmed.
//!
//! HTML parsing happens in the synchronous [`extract_cells`] so that no parsed
//! document is ever held across an `.await`.

use scraper::{ElementRef, Html, Selector};

use crate::core::snapshot::{FetchError, RawCell, Snapshot, SnapshotSource};
use crate::retrieve::ky_http::{ApiClient, ClientOptions};

/// Where the map lives unless configured otherwise.
pub const DEFAULT_MAP_URL: &str = "http://api.chatwars.me/webview/map";

struct CellSelectors {
    cell: Selector,
    left: Selector,
    right: Selector,
    top: Selector,
}

impl CellSelectors {
    fn new() -> Result<Self, FetchError> {
        let parse = |css: &str| Selector::parse(css).map_err(|e| FetchError::Parse(e.to_string()));
        Ok(Self {
            cell: parse(".map-cell")?,
            left: parse(".bottom-left-text")?,
            right: parse(".bottom-right-text")?,
            top: parse(".top-right-text")?,
        })
    }
}

fn inner_text(cell: &ElementRef<'_>, selector: &Selector) -> String {
    cell.select(selector).flat_map(|el| el.text()).collect()
}

/// Extracts the cells of a map page in document order.
///
/// # Errors
/// [`FetchError::NoCells`] when the document has no `.map-cell` element.
pub fn extract_cells(html: &str) -> Result<Snapshot, FetchError> {
    let selectors = CellSelectors::new()?;
    let document = Html::parse_document(html);

    let cells: Snapshot = document
        .select(&selectors.cell)
        .map(|cell| RawCell {
            left: inner_text(&cell, &selectors.left),
            right: inner_text(&cell, &selectors.right),
            top: inner_text(&cell, &selectors.top).trim().to_string(),
        })
        .collect();

    if cells.is_empty() {
        return Err(FetchError::NoCells);
    }
    Ok(cells)
}

/// Snapshot source backed by the live map page.
pub struct MapPageSource {
    client: ApiClient,
}

impl MapPageSource {
    /// `map_url` must be absolute; every fetch targets it unchanged.
    pub fn new(map_url: &str, options: &ClientOptions) -> anyhow::Result<Self> {
        Ok(Self {
            client: ApiClient::new(map_url, options)?,
        })
    }
}

impl SnapshotSource for MapPageSource {
    async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
        let response = self
            .client
            .get_text("")
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.success {
            return Err(FetchError::Status(response.status));
        }

        let html = response.data.unwrap_or_default();
        let cells = extract_cells(&html)?;
        tracing::debug!(cells = cells.len(), "Map page parsed");
        Ok(cells)
    }
}
