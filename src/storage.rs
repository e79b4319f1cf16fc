use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags};

use crate::compliance::AlertType;
use crate::pipeline::FrameReport;

/// A persisted report and its row id.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredReport {
    pub id: i64,
    pub report: FrameReport,
}

/// Aggregate statistics over a window of stored reports.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComplianceSummary {
    pub frames: u64,
    pub mean_compliance_rate: f32,
    pub warnings: u64,
    pub critical: u64,
}

pub trait ReportStore {
    /// Persist one frame report, returning its id.
    fn append(&mut self, report: &FrameReport) -> Result<i64>;

    /// Reports with id greater than `after_id`, oldest first.
    fn reports_after(&mut self, after_id: i64, limit: usize) -> Result<Vec<StoredReport>>;

    /// Statistics over reports captured at or after `since` (unix seconds).
    fn summary_since(&mut self, since: u64) -> Result<ComplianceSummary>;
}

pub struct SqliteReportStore {
    conn: Connection,
}

impl SqliteReportStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = if db_path.starts_with("file:") {
            Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )?
        } else {
            Connection::open(db_path)?
        };
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS frame_reports (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              captured_at INTEGER NOT NULL,
              frame_digest TEXT NOT NULL,
              total_persons INTEGER NOT NULL,
              compliance_rate REAL NOT NULL,
              alert_type TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reports_captured ON frame_reports(captured_at);
            "#,
        )?;
        Ok(())
    }
}

impl ReportStore for SqliteReportStore {
    fn append(&mut self, report: &FrameReport) -> Result<i64> {
        let captured_at = i64::try_from(report.captured_at)
            .map_err(|_| anyhow!("captured_at exceeds i64 range"))?;
        let payload_json = serde_json::to_string(report)?;

        self.conn.execute(
            r#"
            INSERT INTO frame_reports(captured_at, frame_digest, total_persons, compliance_rate, alert_type, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                captured_at,
                report.frame_digest,
                report.result.total_persons,
                f64::from(report.result.compliance_rate),
                report.result.alert_type.as_str(),
                payload_json
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn reports_after(&mut self, after_id: i64, limit: usize) -> Result<Vec<StoredReport>> {
        let rows = {
            let mut stmt = self.conn.prepare(
                "SELECT id, payload_json FROM frame_reports WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![after_id, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let payload: String = row.get(1)?;
                out.push((id, payload));
            }
            out
        };

        rows.into_iter()
            .map(|(id, payload)| {
                let report: FrameReport = serde_json::from_str(&payload)
                    .map_err(|e| anyhow!("corrupt report {}: {}", id, e))?;
                Ok(StoredReport { id, report })
            })
            .collect()
    }

    fn summary_since(&mut self, since: u64) -> Result<ComplianceSummary> {
        let since = i64::try_from(since).map_err(|_| anyhow!("since exceeds i64 range"))?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT COUNT(*),
                   COALESCE(AVG(compliance_rate), 0.0),
                   COALESCE(SUM(CASE WHEN alert_type = ?2 THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN alert_type = ?3 THEN 1 ELSE 0 END), 0)
            FROM frame_reports WHERE captured_at >= ?1
            "#,
        )?;
        let summary = stmt.query_row(
            params![
                since,
                AlertType::Avertissement.as_str(),
                AlertType::Critique.as_str()
            ],
            |row| {
                let frames: i64 = row.get(0)?;
                let mean: f64 = row.get(1)?;
                let warnings: i64 = row.get(2)?;
                let critical: i64 = row.get(3)?;
                Ok(ComplianceSummary {
                    frames: frames.max(0) as u64,
                    mean_compliance_rate: mean as f32,
                    warnings: warnings.max(0) as u64,
                    critical: critical.max(0) as u64,
                })
            },
        )?;
        Ok(summary)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryReportStore {
    reports: Vec<StoredReport>,
}

impl InMemoryReportStore {
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl ReportStore for InMemoryReportStore {
    fn append(&mut self, report: &FrameReport) -> Result<i64> {
        let id = self.reports.last().map(|r| r.id + 1).unwrap_or(1);
        self.reports.push(StoredReport {
            id,
            report: report.clone(),
        });
        Ok(id)
    }

    fn reports_after(&mut self, after_id: i64, limit: usize) -> Result<Vec<StoredReport>> {
        Ok(self
            .reports
            .iter()
            .filter(|stored| stored.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn summary_since(&mut self, since: u64) -> Result<ComplianceSummary> {
        let window: Vec<&FrameReport> = self
            .reports
            .iter()
            .map(|stored| &stored.report)
            .filter(|report| report.captured_at >= since)
            .collect();
        if window.is_empty() {
            return Ok(ComplianceSummary::default());
        }

        let total: f64 = window
            .iter()
            .map(|r| f64::from(r.result.compliance_rate))
            .sum();
        let count_alert = |alert: AlertType| {
            window
                .iter()
                .filter(|r| r.result.alert_type == alert)
                .count() as u64
        };
        Ok(ComplianceSummary {
            frames: window.len() as u64,
            mean_compliance_rate: (total / window.len() as f64) as f32,
            warnings: count_alert(AlertType::Avertissement),
            critical: count_alert(AlertType::Critique),
        })
    }
}
