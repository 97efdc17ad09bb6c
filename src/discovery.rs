use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::date_cursor::{FileReference, TradingDate};
use crate::error::{DiscoveryError, FormatError};
use crate::fetcher::Fetch;
use crate::parser::listing::ListingSelectors;

/// What one crawl of the results listing produced.
#[derive(Debug, Default)]
pub struct Discovery {
    pub references: HashSet<FileReference>,
    /// Entries whose href carries no trading date.
    pub rejected: Vec<FormatError>,
    pub pages_fetched: u32,
}

enum PageVerdict {
    Continue,
    Stop,
}

/// Walks `<listing_url>?page=page-N` from page 1 until the boundary date is crossed.
pub struct LinkDiscoverer<'a, F: Fetch + ?Sized> {
    transport: &'a F,
    listing_url: String,
    selectors: ListingSelectors,
}

impl<'a, F: Fetch + ?Sized> LinkDiscoverer<'a, F> {
    pub fn new(transport: &'a F, listing_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            transport,
            listing_url: listing_url.to_string(),
            selectors: ListingSelectors::new()?,
        })
    }

    pub fn page_url(&self, page: u32) -> String {
        format!("{}?page=page-{}", self.listing_url, page)
    }

    /// Collect every reference dated on or after `earliest`. Pages are walked
    /// strictly in sequence; the first page that crosses the boundary is the last fetched.
    pub async fn discover(
        &self,
        earliest: &TradingDate,
        cancel: &CancellationToken,
    ) -> Result<Discovery, DiscoveryError> {
        info!("Discovering bulletins dated {} or later", earliest);
        let mut found = Discovery::default();
        let mut page = 1u32;
        let mut previous: Vec<String> = Vec::new();

        loop {
            let url = self.page_url(page);
            let html = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                res = self.transport.fetch_text(&url) => {
                    res.map_err(|source| DiscoveryError::Listing { page, source })?
                }
            };
            found.pages_fetched += 1;

            let hrefs = self.selectors.entry_hrefs(&html);
            debug!("Listing page {}: {} entries", page, hrefs.len());
            if !hrefs.is_empty() && hrefs == previous {
                warn!("Listing page {} repeats page {}, stopping", page, page - 1);
                break;
            }

            match scan_page(&hrefs, earliest, &mut found) {
                PageVerdict::Continue => page += 1,
                PageVerdict::Stop => break,
            }
            previous = hrefs;
        }

        info!(
            "Found {} bulletins on {} listing pages ({} undated entries)",
            found.references.len(),
            found.pages_fetched,
            found.rejected.len()
        );
        Ok(found)
    }
}

/// Fold one page's entries into `found` and decide whether the next page is needed.
fn scan_page(hrefs: &[String], earliest: &TradingDate, found: &mut Discovery) -> PageVerdict {
    if hrefs.is_empty() {
        info!("Empty listing page, stopping");
        return PageVerdict::Stop;
    }

    let mut dated = 0usize;
    let mut added = 0usize;
    for href in hrefs {
        let reference = match FileReference::parse(href) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping listing entry: {}", e);
                found.rejected.push(e);
                continue;
            }
        };
        dated += 1;
        if reference.date() < earliest {
            info!("Reached {} (before {}), stopping", reference.date(), earliest);
            return PageVerdict::Stop;
        }
        if found.references.insert(reference) {
            added += 1;
        }
    }

    // A page of undated entries only says nothing about the boundary.
    if dated > 0 && added == 0 {
        warn!("Listing page repeated entries already collected, stopping");
        return PageVerdict::Stop;
    }
    PageVerdict::Continue
}
