use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::model::{CrawlResult, DocumentStatus, ListingRecord};

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS crawl_runs (
            id                     INTEGER PRIMARY KEY,
            base_url               TEXT NOT NULL,
            result_count           INTEGER,
            pages_total            INTEGER NOT NULL,
            pages_skipped          INTEGER NOT NULL,
            pages_not_attempted    INTEGER NOT NULL,
            links_found            INTEGER NOT NULL,
            listings_ok            INTEGER NOT NULL,
            listings_skipped       INTEGER NOT NULL,
            listings_not_attempted INTEGER NOT NULL,
            cancelled              BOOLEAN NOT NULL,
            started_at             TEXT NOT NULL,
            finished_at            TEXT NOT NULL
        );

        -- Latest capture of each listing; re-crawls overwrite.
        CREATE TABLE IF NOT EXISTS listings (
            url          TEXT PRIMARY KEY,
            run_id       INTEGER NOT NULL REFERENCES crawl_runs(id),
            status       TEXT NOT NULL CHECK(status IN ('fetched','unreachable')),
            reason       TEXT,
            title        TEXT,
            cold_rent    REAL,
            warm_rent    REAL,
            fields       TEXT NOT NULL,
            captured_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_listings_run ON listings(run_id);
        CREATE INDEX IF NOT EXISTS idx_listings_status ON listings(status);
        ",
    )?;
    Ok(())
}

/// Store one run and upsert its records. Returns the run id.
pub fn save_crawl(conn: &Connection, base_url: &str, result: &CrawlResult) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO crawl_runs
         (base_url, result_count, pages_total, pages_skipped, pages_not_attempted,
          links_found, listings_ok, listings_skipped, listings_not_attempted, cancelled,
          started_at, finished_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
        rusqlite::params![
            base_url,
            result.result_count.map(|c| c as i64),
            result.pages_total as i64,
            result.pages_skipped as i64,
            result.pages_not_attempted as i64,
            result.links_found as i64,
            result.listings_ok() as i64,
            result.listings_skipped as i64,
            result.listings_not_attempted as i64,
            result.cancelled,
            result.started_at.to_rfc3339(),
            result.finished_at.to_rfc3339(),
        ],
    )?;
    let run_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO listings
             (url, run_id, status, reason, title, cold_rent, warm_rent, fields, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for record in &result.records {
            save_one(&mut stmt, run_id, record)?;
        }
    }
    tx.commit()?;
    Ok(run_id)
}

fn save_one(stmt: &mut rusqlite::Statement, run_id: i64, record: &ListingRecord) -> Result<()> {
    let (status, reason) = match record.status() {
        DocumentStatus::Fetched => ("fetched", None),
        DocumentStatus::Unreachable { reason } => ("unreachable", Some(reason.as_str())),
    };
    let fields = serde_json::to_string(record.fields())?;
    stmt.execute(rusqlite::params![
        record.link().as_str(),
        run_id,
        status,
        reason,
        record.field("title").value().and_then(|v| v.as_text()),
        record.field("cold_rent").value().and_then(|v| v.as_decimal()),
        record.field("warm_rent").value().and_then(|v| v.as_decimal()),
        fields,
        record.captured_at().to_rfc3339(),
    ])?;
    Ok(())
}

pub struct Stats {
    pub runs: usize,
    pub listings: usize,
    pub fetched: usize,
    pub unreachable: usize,
    pub last_run: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let runs: usize = conn.query_row("SELECT COUNT(*) FROM crawl_runs", [], |r| r.get(0))?;
    let listings: usize = conn.query_row("SELECT COUNT(*) FROM listings", [], |r| r.get(0))?;
    let unreachable: usize = conn.query_row(
        "SELECT COUNT(*) FROM listings WHERE status = 'unreachable'",
        [],
        |r| r.get(0),
    )?;
    let last_run: Option<String> =
        conn.query_row("SELECT MAX(finished_at) FROM crawl_runs", [], |r| r.get(0))?;
    Ok(Stats {
        runs,
        listings,
        fetched: listings - unreachable,
        unreachable,
        last_run,
    })
}

/// One stored listing as exported.
#[derive(Debug, Serialize)]
pub struct StoredListing {
    pub url: String,
    pub run_id: i64,
    pub status: String,
    pub reason: Option<String>,
    pub captured_at: String,
    pub fields: serde_json::Value,
}

pub fn fetch_listings(conn: &Connection, limit: Option<usize>) -> Result<Vec<StoredListing>> {
    let sql = match limit {
        Some(n) => format!(
            "SELECT url, run_id, status, reason, captured_at, fields FROM listings ORDER BY url LIMIT {}",
            n
        ),
        None => "SELECT url, run_id, status, reason, captured_at, fields FROM listings ORDER BY url"
            .to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(url, run_id, status, reason, captured_at, fields)| -> Result<StoredListing> {
            let fields = serde_json::from_str::<serde_json::Value>(&fields)
                .with_context(|| format!("Corrupt fields column for {}", url))?;
            Ok(StoredListing {
                url,
                run_id,
                status,
                reason,
                captured_at,
                fields,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use url::Url;

    use super::*;
    use crate::model::{FieldResult, FieldValue, ListingLink};

    fn record(id: &str, rent: Option<f64>, status: DocumentStatus) -> ListingRecord {
        let link = ListingLink::canonical(
            Url::parse(&format!("https://www.immowelt.de/expose/{id}")).unwrap(),
        )
        .unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("title", FieldResult::Present(FieldValue::Text(format!("Wohnung {id}"))));
        fields.insert("cold_rent", rent.map(FieldValue::Decimal).into());
        ListingRecord::new(link, fields, Utc::now(), status)
    }

    fn result(records: Vec<ListingRecord>) -> CrawlResult {
        let listings_skipped = records.iter().filter(|r| r.is_unreachable()).count();
        CrawlResult {
            links_found: records.len(),
            records,
            result_count: Some(2),
            pages_total: 1,
            pages_skipped: 0,
            pages_not_attempted: 0,
            listings_skipped,
            listings_not_attempted: 0,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn saves_runs_and_listings() {
        let conn = conn();
        let crawl = result(vec![
            record("a1", Some(900.0), DocumentStatus::Fetched),
            record(
                "b2",
                None,
                DocumentStatus::Unreachable {
                    reason: "fetch failed: HTTP 404".into(),
                },
            ),
        ]);
        save_crawl(&conn, "https://www.immowelt.de/liste", &crawl).unwrap();

        let s = get_stats(&conn).unwrap();
        assert_eq!(s.runs, 1);
        assert_eq!(s.listings, 2);
        assert_eq!(s.fetched, 1);
        assert_eq!(s.unreachable, 1);
        assert!(s.last_run.is_some());

        let cold: Option<f64> = conn
            .query_row(
                "SELECT cold_rent FROM listings WHERE url LIKE '%a1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(cold, Some(900.0));
    }

    #[test]
    fn cancelled_run_keeps_page_counters() {
        let conn = conn();
        let crawl = CrawlResult {
            pages_total: 5,
            pages_skipped: 1,
            pages_not_attempted: 3,
            cancelled: true,
            ..result(Vec::new())
        };
        let id = save_crawl(&conn, "u", &crawl).unwrap();

        let (skipped, not_attempted, cancelled): (i64, i64, bool) = conn
            .query_row(
                "SELECT pages_skipped, pages_not_attempted, cancelled FROM crawl_runs WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!((skipped, not_attempted, cancelled), (1, 3, true));
    }

    #[test]
    fn recrawl_overwrites_listing() {
        let conn = conn();
        save_crawl(&conn, "u", &result(vec![record("a1", Some(900.0), DocumentStatus::Fetched)]))
            .unwrap();
        let second =
            save_crawl(&conn, "u", &result(vec![record("a1", Some(950.0), DocumentStatus::Fetched)]))
                .unwrap();

        let rows = fetch_listings(&conn, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].run_id, second);
        assert_eq!(rows[0].fields["cold_rent"], 950.0);
        assert_eq!(get_stats(&conn).unwrap().runs, 2);
    }

    #[test]
    fn export_keeps_absent_fields_as_null() {
        let conn = conn();
        save_crawl(&conn, "u", &result(vec![record("c3", None, DocumentStatus::Fetched)])).unwrap();
        let rows = fetch_listings(&conn, Some(10)).unwrap();
        assert_eq!(rows[0].status, "fetched");
        assert!(rows[0].fields["cold_rent"].is_null());
        assert_eq!(rows[0].fields["title"], "Wohnung c3");
    }
}
