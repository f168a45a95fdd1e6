//! SQLite storage implementation.
//!
//! File-based canonical store. Identifier columns use AUTOINCREMENT so
//! ids are monotonically increasing and never reused, even across
//! failed transactions; the foreign key from findings to source units
//! is enforced by the database itself.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::{AnalysisError, Result};
use crate::traits::store::{
    Completeness, IntegrityReport, MergeStore, UnitStore, ValidationStore, ValidationUpdate,
};
use crate::types::{
    finding::{Finding, FindingKinds, Presence, Provenance, ValidationStatus},
    unit::{GroupKey, SourceUnit, UnitKey},
};

/// SQLite-based analysis store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite:./analysis.db?mode=rwc` - File, created if missing
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 5).await
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// A single connection: every pooled connection to `:memory:` would
    /// otherwise open its own empty database.
    pub async fn in_memory() -> Result<Self> {
        Self::with_max_connections("sqlite::memory:", 1).await
    }

    async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        // Applied per connection, so the pragma survives pooling
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AnalysisError::storage(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS source_units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book TEXT NOT NULL,
                chapter INTEGER NOT NULL,
                verse INTEGER NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(book, chapter, verse)
            );

            CREATE INDEX IF NOT EXISTS idx_units_group ON source_units(book, chapter);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unit_id INTEGER NOT NULL REFERENCES source_units(id),
                metaphor TEXT NOT NULL DEFAULT 'no',
                simile TEXT NOT NULL DEFAULT 'no',
                personification TEXT NOT NULL DEFAULT 'no',
                idiom TEXT NOT NULL DEFAULT 'no',
                hyperbole TEXT NOT NULL DEFAULT 'no',
                metonymy TEXT NOT NULL DEFAULT 'no',
                excerpt TEXT NOT NULL,
                explanation TEXT NOT NULL,
                model TEXT NOT NULL,
                strategy INTEGER NOT NULL,
                attempts INTEGER NOT NULL,
                prompt_hash TEXT NOT NULL,
                validation TEXT NOT NULL DEFAULT 'unvalidated',
                validation_note TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_findings_unit ON findings(unit_id);
            CREATE INDEX IF NOT EXISTS idx_findings_validation ON findings(validation);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Distinguish constraint rejections from other storage failures so
/// the reconciler can apply its sanitize-and-retry-once policy.
fn map_db_err(e: sqlx::Error) -> AnalysisError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() || db.is_unique_violation() => {
            AnalysisError::ConstraintViolation(db.to_string())
        }
        _ => AnalysisError::storage(e.to_string()),
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct UnitRow {
    id: i64,
    book: String,
    chapter: i64,
    verse: i64,
    text: String,
    created_at: String,
}

impl UnitRow {
    fn into_source_unit(self) -> Result<SourceUnit> {
        Ok(SourceUnit {
            id: self.id,
            key: UnitKey::new(self.book, self.chapter as u32, self.verse as u32),
            text: self.text,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct FindingRow {
    id: i64,
    unit_id: i64,
    metaphor: String,
    simile: String,
    personification: String,
    idiom: String,
    hyperbole: String,
    metonymy: String,
    excerpt: String,
    explanation: String,
    model: String,
    strategy: i64,
    attempts: i64,
    prompt_hash: String,
    validation: String,
    validation_note: Option<String>,
    created_at: String,
}

impl FindingRow {
    fn into_finding(self) -> Result<Finding> {
        Ok(Finding {
            id: self.id,
            unit_id: self.unit_id,
            kinds: FindingKinds {
                metaphor: Presence::coerce(&self.metaphor),
                simile: Presence::coerce(&self.simile),
                personification: Presence::coerce(&self.personification),
                idiom: Presence::coerce(&self.idiom),
                hyperbole: Presence::coerce(&self.hyperbole),
                metonymy: Presence::coerce(&self.metonymy),
            },
            excerpt: self.excerpt,
            explanation: self.explanation,
            provenance: Provenance {
                model: self.model,
                strategy: self.strategy as usize,
                attempts: self.attempts as u32,
                prompt_hash: self.prompt_hash,
            },
            validation: ValidationStatus::parse(&self.validation),
            validation_note: self.validation_note,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| AnalysisError::storage(format!("invalid timestamp: {e}")))
}

const FINDING_COLUMNS: &str = "id, unit_id, metaphor, simile, personification, idiom, \
     hyperbole, metonymy, excerpt, explanation, model, strategy, attempts, prompt_hash, \
     validation, validation_note, created_at";

const UNIT_COLUMNS: &str = "id, book, chapter, verse, text, created_at";

/// Validation is complete when a status was assigned and its derived
/// note survived; either missing makes the record recovery-eligible.
const COMPLETE_PREDICATE: &str = "(validation != 'unvalidated' AND validation_note IS NOT NULL)";

#[async_trait]
impl UnitStore for SqliteStore {
    async fn insert_source_unit(&self, key: &UnitKey, text: &str) -> Result<i64> {
        // Idempotent on the composite key: the existing row wins
        sqlx::query(
            r#"
            INSERT INTO source_units (book, chapter, verse, text, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(book, chapter, verse) DO NOTHING
            "#,
        )
        .bind(&key.book)
        .bind(key.chapter as i64)
        .bind(key.verse as i64)
        .bind(text)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        let row = sqlx::query(
            "SELECT id FROM source_units WHERE book = ? AND chapter = ? AND verse = ?",
        )
        .bind(&key.book)
        .bind(key.chapter as i64)
        .bind(key.verse as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn get_source_unit(&self, key: &UnitKey) -> Result<Option<SourceUnit>> {
        let row = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM source_units WHERE book = ? AND chapter = ? AND verse = ?"
        ))
        .bind(&key.book)
        .bind(key.chapter as i64)
        .bind(key.verse as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(r.into_source_unit()?)),
            None => Ok(None),
        }
    }

    async fn insert_analysis_records(
        &self,
        unit_id: i64,
        findings: &[Finding],
    ) -> Result<Vec<i64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;

        let mut ids = Vec::with_capacity(findings.len());
        for finding in findings {
            let result = sqlx::query(
                r#"
                INSERT INTO findings (
                    unit_id, metaphor, simile, personification, idiom, hyperbole,
                    metonymy, excerpt, explanation, model, strategy, attempts,
                    prompt_hash, validation, validation_note, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(unit_id)
            .bind(finding.kinds.metaphor.as_str())
            .bind(finding.kinds.simile.as_str())
            .bind(finding.kinds.personification.as_str())
            .bind(finding.kinds.idiom.as_str())
            .bind(finding.kinds.hyperbole.as_str())
            .bind(finding.kinds.metonymy.as_str())
            .bind(&finding.excerpt)
            .bind(&finding.explanation)
            .bind(&finding.provenance.model)
            .bind(finding.provenance.strategy as i64)
            .bind(finding.provenance.attempts as i64)
            .bind(&finding.provenance.prompt_hash)
            .bind(finding.validation.as_str())
            .bind(&finding.validation_note)
            .bind(finding.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

            ids.push(result.last_insert_rowid());
        }

        tx.commit()
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;
        Ok(ids)
    }

    async fn findings_for_unit(&self, unit_id: i64) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, FindingRow>(&format!(
            "SELECT {FINDING_COLUMNS} FROM findings WHERE unit_id = ? ORDER BY id"
        ))
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        rows.into_iter().map(|r| r.into_finding()).collect()
    }

    async fn count_units(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM source_units")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;
        Ok(count.0 as u64)
    }

    async fn count_findings(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM findings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;
        Ok(count.0 as u64)
    }
}

#[async_trait]
impl MergeStore for SqliteStore {
    async fn export_source_units(&self) -> Result<Vec<SourceUnit>> {
        let rows = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM source_units ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        rows.into_iter().map(|r| r.into_source_unit()).collect()
    }

    async fn export_findings(&self) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, FindingRow>(&format!(
            "SELECT {FINDING_COLUMNS} FROM findings ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        rows.into_iter().map(|r| r.into_finding()).collect()
    }

    async fn max_unit_id(&self) -> Result<i64> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM source_units")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;
        Ok(row.0.unwrap_or(0))
    }

    async fn max_finding_id(&self) -> Result<i64> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM findings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;
        Ok(row.0.unwrap_or(0))
    }

    async fn finding_fingerprints(&self) -> Result<HashSet<String>> {
        let units = self.export_source_units().await?;
        let by_id: std::collections::HashMap<i64, &UnitKey> =
            units.iter().map(|u| (u.id, &u.key)).collect();

        Ok(self
            .export_findings()
            .await?
            .iter()
            .filter_map(|f| by_id.get(&f.unit_id).map(|key| f.fingerprint(key)))
            .collect())
    }

    async fn import_merge(&self, units: &[SourceUnit], findings: &[Finding]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;

        for unit in units {
            sqlx::query(
                r#"
                INSERT INTO source_units (id, book, chapter, verse, text, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(unit.id)
            .bind(&unit.key.book)
            .bind(unit.key.chapter as i64)
            .bind(unit.key.verse as i64)
            .bind(&unit.text)
            .bind(unit.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        for finding in findings {
            sqlx::query(
                r#"
                INSERT INTO findings (
                    id, unit_id, metaphor, simile, personification, idiom, hyperbole,
                    metonymy, excerpt, explanation, model, strategy, attempts,
                    prompt_hash, validation, validation_note, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(finding.id)
            .bind(finding.unit_id)
            .bind(finding.kinds.metaphor.as_str())
            .bind(finding.kinds.simile.as_str())
            .bind(finding.kinds.personification.as_str())
            .bind(finding.kinds.idiom.as_str())
            .bind(finding.kinds.hyperbole.as_str())
            .bind(finding.kinds.metonymy.as_str())
            .bind(&finding.excerpt)
            .bind(&finding.explanation)
            .bind(&finding.provenance.model)
            .bind(finding.provenance.strategy as i64)
            .bind(finding.provenance.attempts as i64)
            .bind(&finding.provenance.prompt_hash)
            .bind(finding.validation.as_str())
            .bind(&finding.validation_note)
            .bind(finding.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        // Invariant check inside the merge transaction: a violation
        // rolls everything back, never a partial merge
        let report = integrity_report(&mut tx).await?;
        if let Err(violation) = report.into_result() {
            tx.rollback()
                .await
                .map_err(|e| AnalysisError::storage(e.to_string()))?;
            return Err(violation);
        }

        tx.commit()
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;
        Ok(())
    }

    async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;
        let report = integrity_report(&mut tx).await?;
        tx.rollback().await.ok();
        Ok(report)
    }
}

async fn integrity_report(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
) -> Result<IntegrityReport> {
    let orphaned: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM findings f
        LEFT JOIN source_units u ON f.unit_id = u.id
        WHERE u.id IS NULL
        "#,
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AnalysisError::storage(e.to_string()))?;

    let dup_units: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM (SELECT id FROM source_units GROUP BY id HAVING COUNT(*) > 1)",
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AnalysisError::storage(e.to_string()))?;

    let dup_findings: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM (SELECT id FROM findings GROUP BY id HAVING COUNT(*) > 1)",
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AnalysisError::storage(e.to_string()))?;

    Ok(IntegrityReport {
        orphaned_findings: orphaned.0 as u64,
        duplicate_unit_ids: dup_units.0 as u64,
        duplicate_finding_ids: dup_findings.0 as u64,
    })
}

#[async_trait]
impl ValidationStore for SqliteStore {
    async fn groups(&self) -> Result<Vec<GroupKey>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT DISTINCT book, chapter FROM source_units ORDER BY book, chapter",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(book, chapter)| GroupKey {
                book,
                chapter: chapter as u32,
            })
            .collect())
    }

    async fn validation_completeness(&self, group: &GroupKey) -> Result<Completeness> {
        let row: (i64, i64) = sqlx::query_as(&format!(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN {COMPLETE_PREDICATE} THEN 1 ELSE 0 END), 0)
            FROM findings f
            JOIN source_units u ON f.unit_id = u.id
            WHERE u.book = ? AND u.chapter = ?
            "#
        ))
        .bind(&group.book)
        .bind(group.chapter as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        Ok(Completeness {
            total: row.0 as u64,
            complete: row.1 as u64,
        })
    }

    async fn incomplete_for_group(
        &self,
        group: &GroupKey,
    ) -> Result<Vec<(SourceUnit, Finding)>> {
        let unit_rows = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM source_units WHERE book = ? AND chapter = ? ORDER BY id"
        ))
        .bind(&group.book)
        .bind(group.chapter as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnalysisError::storage(e.to_string()))?;

        let mut pairs = Vec::new();
        for unit_row in unit_rows {
            let unit = unit_row.into_source_unit()?;
            let rows = sqlx::query_as::<_, FindingRow>(&format!(
                "SELECT {FINDING_COLUMNS} FROM findings \
                 WHERE unit_id = ? AND NOT {COMPLETE_PREDICATE} ORDER BY id"
            ))
            .bind(unit.id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;

            for row in rows {
                pairs.push((unit.clone(), row.into_finding()?));
            }
        }
        Ok(pairs)
    }

    async fn overwrite_validation(&self, updates: &[ValidationUpdate]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;

        for update in updates {
            sqlx::query("UPDATE findings SET validation = ?, validation_note = ? WHERE id = ?")
                .bind(update.status.as_str())
                .bind(&update.note)
                .bind(update.finding_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| AnalysisError::storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AnalysisError::storage(e.to_string()))?;
        Ok(())
    }
}
