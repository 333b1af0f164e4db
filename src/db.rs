//! SQLite schema and persistence for extracted trading results.

use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::info;

use crate::error::ValidationError;

/// One trade record the way it lands in `trading_results`.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRow {
    pub product_code: String,
    pub product_name: String,
    pub oil_code: String,
    pub delivery_basis_code: String,
    pub delivery_basis_name: String,
    pub delivery_type_code: String,
    pub volume: i64,
    pub total: i64,
    pub contract_count: i64,
    pub trade_date: NaiveDate,
}

pub struct Stats {
    pub rows: i64,
    pub dates: i64,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
}

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS trading_results (
            id                  INTEGER PRIMARY KEY,
            product_code        TEXT NOT NULL,
            product_name        TEXT NOT NULL,
            oil_code            TEXT NOT NULL,
            delivery_basis_code TEXT NOT NULL,
            delivery_basis_name TEXT NOT NULL,
            delivery_type_code  TEXT NOT NULL,
            volume              INTEGER NOT NULL,
            total               INTEGER NOT NULL,
            contract_count      INTEGER NOT NULL,
            trade_date          TEXT NOT NULL,
            created_at          TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_results_trade_date
            ON trading_results(trade_date);
        ",
    )?;
    Ok(())
}

// ── Validation ──

// Column widths in the upstream exchange schema.
const LIMITS: [(&str, usize); 6] = [
    ("product_code", 11),
    ("product_name", 255),
    ("oil_code", 4),
    ("delivery_basis_code", 3),
    ("delivery_basis_name", 255),
    ("delivery_type_code", 1),
];

pub fn validate(row: &TradeRow) -> Result<(), ValidationError> {
    let fields = [
        &row.product_code,
        &row.product_name,
        &row.oil_code,
        &row.delivery_basis_code,
        &row.delivery_basis_name,
        &row.delivery_type_code,
    ];
    for ((field, max), value) in LIMITS.into_iter().zip(fields) {
        if value.chars().count() > max {
            return Err(ValidationError {
                field,
                max,
                value: value.clone(),
            });
        }
    }
    Ok(())
}

/// Validate every row, then insert them all inside a single transaction.
/// One invalid row aborts the batch before anything touches the database.
pub fn save_results(conn: &Connection, rows: &[TradeRow]) -> Result<usize> {
    for row in rows {
        validate(row)?;
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO trading_results
                (product_code, product_name, oil_code, delivery_basis_code,
                 delivery_basis_name, delivery_type_code, volume, total,
                 contract_count, trade_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for row in rows {
            stmt.execute(rusqlite::params![
                row.product_code,
                row.product_name,
                row.oil_code,
                row.delivery_basis_code,
                row.delivery_basis_name,
                row.delivery_type_code,
                row.volume,
                row.total,
                row.contract_count,
                row.trade_date.to_string(),
            ])?;
        }
    }
    tx.commit()?;

    info!(rows = rows.len(), "trading results saved");
    Ok(rows.len())
}

// ── Stats ──

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let rows = conn.query_row("SELECT COUNT(*) FROM trading_results", [], |r| r.get(0))?;
    let dates = conn.query_row(
        "SELECT COUNT(DISTINCT trade_date) FROM trading_results",
        [],
        |r| r.get(0),
    )?;
    let (first_date, last_date) = conn.query_row(
        "SELECT MIN(trade_date), MAX(trade_date) FROM trading_results",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(Stats {
        rows,
        dates,
        first_date,
        last_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn row(code: &str, date: NaiveDate) -> TradeRow {
        TradeRow {
            product_code: code.to_string(),
            product_name: "Бензин (АИ-92-К5)".to_string(),
            oil_code: code.chars().take(4).collect(),
            delivery_basis_code: code.chars().skip(4).take(3).collect(),
            delivery_basis_name: "ст. Аллагуват".to_string(),
            delivery_type_code: code.chars().last().unwrap().to_string(),
            volume: 300,
            total: 17_000_000,
            contract_count: 5,
            trade_date: date,
        }
    }

    #[test]
    fn batch_insert_across_files() {
        let conn = mem();
        let d1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let rows = vec![
            row("A100ANK060F", d1),
            row("A100NVY060F", d1),
            row("A592ACH005A", d2),
            row("A592UFM005A", d2),
        ];

        let saved = save_results(&conn, &rows).unwrap();
        assert_eq!(saved, 4);

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.dates, 2);
        assert_eq!(stats.first_date.as_deref(), Some("2024-06-01"));
        assert_eq!(stats.last_date.as_deref(), Some("2024-06-02"));
    }

    #[test]
    fn invalid_row_aborts_batch() {
        let conn = mem();
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut bad = row("A100ANK060F", date);
        bad.product_name = "x".repeat(256);
        let rows = vec![row("A592ACH005A", date), bad];

        assert!(save_results(&conn, &rows).is_err());

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.rows, 0);
    }

    #[test]
    fn length_limits() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let ok = row("A100ANK060F", date);
        assert!(validate(&ok).is_ok());

        let cases: [(&str, fn(&mut TradeRow)); 4] = [
            ("product_code", |r| r.product_code = "x".repeat(12)),
            ("oil_code", |r| r.oil_code = "AAAAA".to_string()),
            ("delivery_basis_code", |r| {
                r.delivery_basis_code = "AAAA".to_string()
            }),
            ("delivery_type_code", |r| {
                r.delivery_type_code = "FF".to_string()
            }),
        ];
        for (field, mutate) in cases {
            let mut bad = row("A100ANK060F", date);
            mutate(&mut bad);
            let err = validate(&bad).unwrap_err();
            assert_eq!(err.field, field);
        }
    }

    #[test]
    fn limits_count_chars() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut r = row("A100ANK060F", date);
        // 255 Cyrillic characters are 510 bytes but still fit
        r.delivery_basis_name = "ж".repeat(255);
        assert!(validate(&r).is_ok());

        r.delivery_basis_name = "ж".repeat(256);
        assert!(validate(&r).is_err());
    }

    #[test]
    fn empty_stats() {
        let conn = mem();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.rows, 0);
        assert_eq!(stats.dates, 0);
        assert_eq!(stats.first_date, None);
        assert_eq!(stats.last_date, None);
    }
}
