use scraper::{Html, Selector};

/// Compiled selectors for the results listing's accordion markup.
pub struct ListingSelectors {
    item: Selector,
    link: Selector,
}

impl ListingSelectors {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            item: compile("div.accordeon-inner div.accordeon-inner__wrap-item")?,
            link: compile("a[href]")?,
        })
    }

    /// Hrefs of the listing entries in page order (newest first on the site).
    pub fn entry_hrefs(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.item)
            .filter_map(|item| {
                let href = item.select(&self.link).next()?.value().attr("href")?.trim();
                (!href.is_empty()).then(|| href.to_string())
            })
            .collect()
    }
}

fn compile(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow::anyhow!("invalid selector '{}': {}", selector, e))
}
