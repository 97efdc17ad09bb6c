use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::date_cursor::TradingDate;
use crate::error::PersistError;
use crate::parser::records::TradingRecord;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS spimex_trading_results (
        id                    INTEGER PRIMARY KEY,
        exchange_product_id   TEXT NOT NULL,
        exchange_product_name TEXT NOT NULL,
        oil_id                TEXT NOT NULL,
        delivery_basis_id     TEXT NOT NULL,
        delivery_basis_name   TEXT NOT NULL,
        delivery_type_id      TEXT NOT NULL,
        volume                INTEGER NOT NULL CHECK(volume >= 0),
        total                 INTEGER NOT NULL CHECK(total >= 0),
        count                 INTEGER NOT NULL CHECK(count >= 0),
        date                  TEXT NOT NULL,
        created_on            TEXT NOT NULL DEFAULT (datetime('now')),
        updated_on            TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_trading_results_date ON spimex_trading_results(date);

    CREATE TRIGGER IF NOT EXISTS trg_trading_results_updated
    AFTER UPDATE ON spimex_trading_results
    FOR EACH ROW WHEN NEW.updated_on = OLD.updated_on
    BEGIN
        UPDATE spimex_trading_results SET updated_on = datetime('now') WHERE id = OLD.id;
    END;
";

/// How a batch meets rows already in the store. The two modes never mix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistPolicy {
    /// Leave any trading day that already has rows untouched.
    #[default]
    SkipIfDateExists,
    /// Drop and recreate the table, then write the batch.
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistResult {
    pub inserted: usize,
    pub skipped_dates: Vec<TradingDate>,
    pub skipped_records: usize,
}

/// A row as stored, with the timestamps the database assigned.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: i64,
    pub product_code: String,
    pub oil_code: String,
    pub delivery_basis_code: String,
    pub delivery_type_code: String,
    pub volume: i64,
    pub total: i64,
    pub contract_count: i64,
    pub trading_date: String,
    pub created_on: NaiveDateTime,
    pub updated_on: NaiveDateTime,
}

pub struct Repository {
    conn: Connection,
    policy: PersistPolicy,
}

impl Repository {
    pub fn open(path: &Path, policy: PersistPolicy) -> Result<Self, PersistError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn, policy)
    }

    pub fn in_memory(policy: PersistPolicy) -> Result<Self, PersistError> {
        Self::with_connection(Connection::open_in_memory()?, policy)
    }

    fn with_connection(conn: Connection, policy: PersistPolicy) -> Result<Self, PersistError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, policy })
    }

    pub fn policy(&self) -> PersistPolicy {
        self.policy
    }

    /// Write the batch in one transaction. Any error rolls everything back,
    /// including the table drop under `Replace`.
    pub fn save(&self, records: &[TradingRecord]) -> Result<PersistResult, PersistError> {
        if records.is_empty() {
            return Ok(PersistResult::default());
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut result = PersistResult::default();

        let to_write: Vec<&TradingRecord> = match self.policy {
            PersistPolicy::Replace => {
                warn!("Replace policy: dropping spimex_trading_results");
                tx.execute_batch("DROP TABLE IF EXISTS spimex_trading_results;")?;
                tx.execute_batch(SCHEMA)?;
                records.iter().collect()
            }
            PersistPolicy::SkipIfDateExists => {
                let present = dates_present(&tx, records)?;
                let (skip, keep): (Vec<_>, Vec<_>) = records
                    .iter()
                    .partition(|r| present.contains(r.trading_date()));
                for date in &present {
                    info!("{} already loaded, skipping", date);
                }
                result.skipped_dates = present.into_iter().collect();
                result.skipped_records = skip.len();
                keep
            }
        };

        result.inserted = insert_records(&tx, &to_write)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn count_for_date(&self, date: &TradingDate) -> Result<usize, PersistError> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM spimex_trading_results WHERE date = ?1",
            [date.as_str()],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    pub fn fetch_by_date(&self, date: &TradingDate) -> Result<Vec<StoredRecord>, PersistError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, exchange_product_id, oil_id, delivery_basis_id, delivery_type_id,
                    volume, total, count, date, created_on, updated_on
             FROM spimex_trading_results WHERE date = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([date.as_str()], |row| {
                Ok(StoredRecord {
                    id: row.get(0)?,
                    product_code: row.get(1)?,
                    oil_code: row.get(2)?,
                    delivery_basis_code: row.get(3)?,
                    delivery_type_code: row.get(4)?,
                    volume: row.get(5)?,
                    total: row.get(6)?,
                    contract_count: row.get(7)?,
                    trading_date: row.get(8)?,
                    created_on: row.get(9)?,
                    updated_on: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Row count per trading day, oldest first.
    pub fn date_counts(&self) -> Result<Vec<(String, usize)>, PersistError> {
        let mut stmt = self.conn.prepare(
            "SELECT date, COUNT(*) FROM spimex_trading_results GROUP BY date ORDER BY date",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn dates_present(
    tx: &Transaction<'_>,
    records: &[TradingRecord],
) -> Result<BTreeSet<TradingDate>, PersistError> {
    let incoming: BTreeSet<&TradingDate> = records.iter().map(|r| r.trading_date()).collect();
    let mut stmt =
        tx.prepare("SELECT EXISTS(SELECT 1 FROM spimex_trading_results WHERE date = ?1)")?;
    let mut present = BTreeSet::new();
    for date in incoming {
        let exists: bool = stmt.query_row([date.as_str()], |r| r.get(0))?;
        if exists {
            present.insert(date.clone());
        }
    }
    Ok(present)
}

fn insert_records(tx: &Transaction<'_>, records: &[&TradingRecord]) -> Result<usize, PersistError> {
    let mut stmt = tx.prepare(
        "INSERT INTO spimex_trading_results
         (exchange_product_id, exchange_product_name, oil_id, delivery_basis_id,
          delivery_basis_name, delivery_type_id, volume, total, count, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    let mut per_date: BTreeMap<&str, usize> = BTreeMap::new();
    for r in records {
        stmt.execute(rusqlite::params![
            r.product_code(),
            r.product_name(),
            r.oil_code(),
            r.delivery_basis_code(),
            r.delivery_basis_name(),
            r.delivery_type_code(),
            r.volume(),
            r.total(),
            r.contract_count(),
            r.trading_date().as_str(),
        ])?;
        *per_date.entry(r.trading_date().as_str()).or_default() += 1;
    }
    for (date, n) in &per_date {
        info!("Wrote {} rows for {}", n, date);
    }
    Ok(records.len())
}
