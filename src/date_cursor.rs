use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::FormatError;

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"oil_xls_(\d{8})(\d{6})").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{8}$").unwrap());

/// First day ingested when no boundary is given.
pub const DEFAULT_EARLIEST: &str = "20230101";

/// 8-digit `YYYYMMDD` identifier; string order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TradingDate(String);

impl TradingDate {
    pub fn default_earliest() -> Self {
        TradingDate(DEFAULT_EARLIEST.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TradingDate {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if DATE_RE.is_match(s) {
            Ok(TradingDate(s.to_string()))
        } else {
            Err(FormatError::InvalidDate {
                value: s.to_string(),
            })
        }
    }
}

impl fmt::Display for TradingDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull the trading date out of a published file reference.
pub fn extract_date(reference: &str) -> Result<TradingDate, FormatError> {
    let (date, _) = split_stamp(reference)?;
    Ok(date)
}

fn split_stamp(reference: &str) -> Result<(TradingDate, String), FormatError> {
    let caps = REFERENCE_RE
        .captures(reference)
        .ok_or_else(|| FormatError::NoDateInReference {
            reference: reference.to_string(),
        })?;
    Ok((TradingDate(caps[1].to_string()), caps[2].to_string()))
}

/// A site-issued file locator whose trading date has already been extracted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileReference {
    href: String,
    #[serde(skip)]
    date: TradingDate,
    #[serde(skip)]
    time: String,
}

impl FileReference {
    pub fn parse(href: &str) -> Result<Self, FormatError> {
        let (date, time) = split_stamp(href)?;
        Ok(FileReference {
            href: href.to_string(),
            date,
            time,
        })
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn date(&self) -> &TradingDate {
        &self.date
    }

    /// Full `YYYYMMDDhhmmss` publication stamp; orders republished files of one day.
    pub fn stamp(&self) -> String {
        format!("{}{}", self.date, self.time)
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href)
    }
}
