use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_xlsxwriter::Workbook;

use crate::error::FetchError;
use crate::fetcher::Fetch;
use crate::parser::table::{COLUMNS, UNIT_MARKER};

enum Canned {
    Body(Vec<u8>),
    Status(u16),
}

/// URL-keyed canned responses with a log of every request made.
/// Unknown URLs answer 404.
#[derive(Default)]
pub struct StubFetcher {
    responses: HashMap<String, Canned>,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), Canned::Body(body));
        self
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.with_body(url, html.as_bytes().to_vec())
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), Canned::Status(status));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl Fetch for StubFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.responses.get(url) {
            Some(Canned::Body(b)) => Ok(b.clone()),
            Some(Canned::Status(s)) => Err(FetchError::Status {
                url: url.to_string(),
                status: *s,
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// Listing page in the site's accordion markup, one entry per href.
pub fn listing_html<S: AsRef<str>>(hrefs: &[S]) -> String {
    let items: String = hrefs
        .iter()
        .map(|h| {
            let h = h.as_ref();
            format!(
                r#"<div class="accordeon-inner__wrap-item">
                     <div class="accordeon-inner__header">
                       <a class="accordeon-inner__item-title link xls" href="{h}">Бюллетень по итогам торгов</a>
                     </div>
                   </div>"#
            )
        })
        .collect();
    format!(
        r#"<html><body><div class="page-content"><div class="accordeon-inner">{items}</div></div></body></html>"#
    )
}

/// One instrument line of a bulletin: code, name, basis, volume, total, contracts.
pub struct Line<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub basis: &'a str,
    pub volume: Option<f64>,
    pub total: Option<f64>,
    pub count: &'a str,
}

pub fn line<'a>(code: &'a str, volume: f64, total: f64, count: &'a str) -> Line<'a> {
    Line {
        code,
        name: "Бензин (АИ-92-К5) по ГОСТ, ст. Ангарск-группа станций",
        basis: "ст. Ангарск-группа станций",
        volume: Some(volume),
        total: Some(total),
        count,
    }
}

/// Builds an `.xlsx` laid out like the exchange's daily bulletin: a title
/// block, the unit marker, the column header, a section label row, the
/// instrument lines and two trailing total rows.
pub fn bulletin(lines: &[Line<'_>]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 1, "Бюллетень по итогам торгов в Секции «Нефтепродукты»").unwrap();
        sheet.write_string(1, 1, "Дата торгов: 15.04.2024").unwrap();
        sheet.write_string(3, 1, UNIT_MARKER).unwrap();
        for (col, label) in COLUMNS {
            sheet.write_string(4, col as u16, label.replace(' ', "\n")).unwrap();
        }
        sheet.write_string(5, 1, "Нефтепродукты").unwrap();

        let mut row = 6u32;
        for l in lines {
            sheet.write_string(row, 1, l.code).unwrap();
            sheet.write_string(row, 2, l.name).unwrap();
            sheet.write_string(row, 3, l.basis).unwrap();
            if let Some(v) = l.volume {
                sheet.write_number(row, 4, v).unwrap();
            }
            if let Some(t) = l.total {
                sheet.write_number(row, 5, t).unwrap();
            }
            match l.count.parse::<f64>() {
                Ok(n) => sheet.write_number(row, 14, n).unwrap(),
                Err(_) => sheet.write_string(row, 14, l.count).unwrap(),
            };
            row += 1;
        }

        sheet.write_string(row, 1, "Итого по секции:").unwrap();
        sheet.write_number(row, 14, 99.0).unwrap();
        sheet.write_string(row + 1, 1, "Итого:").unwrap();
        sheet.write_number(row + 1, 14, 99.0).unwrap();
    }
    workbook.save_to_buffer().unwrap()
}
