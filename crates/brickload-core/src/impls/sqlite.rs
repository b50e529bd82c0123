//! SQLite-backed job store and catalog.
//!
//! One `SqliteDatabase` handle per process; several processes may open the
//! same file. Lease acquisition and commit run inside `BEGIN IMMEDIATE`
//! transactions, so the compare-and-swap holds across processes too.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::domain::upsert::{Existing, plan};
use crate::domain::{
    CatalogRecord, ColorRecord, ElementRecord, ImportStamp, JobDescriptor, JobId, Lease,
    LeaseToken, PartRecord, Phase, UpsertContext, UpsertOutcome,
};
use crate::ports::{CatalogStore, Clock, JobStore, LeaseAttempt, StoreError, SystemClock};

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(format!("sqlite: {e}"))
    }
}

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_import_jobs_table",
        sql: include_str!("sql/001_create_import_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_catalog_tables",
        sql: include_str!("sql/002_create_catalog.sql"),
    },
    Migration {
        version: 3,
        description: "add_import_position_to_catalog",
        sql: include_str!("sql/003_add_import_position.sql"),
    },
];

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "running migration"
        );
        conn.execute_batch(migration.sql).map_err(|e| {
            StoreError::Backend(format!("migration v{} failed: {e}", migration.version))
        })?;
        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
    }
    Ok(())
}

/// Thread-safe handle over a single rusqlite connection. Clones share it.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open (or create) the database file and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("cannot create '{}': {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;

        tracing::info!(path = %path.display(), "database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Locked access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Run `f` on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

fn load_job(conn: &Connection, id: JobId) -> Result<Option<JobDescriptor>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT descriptor FROM import_jobs WHERE job_id = ?1",
            params![id.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn save_job(
    conn: &Connection,
    job: &JobDescriptor,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let json = serde_json::to_string(job)?;
    let changed = conn.execute(
        "UPDATE import_jobs SET status = ?2, descriptor = ?3, updated_at = ?4 WHERE job_id = ?1",
        params![
            job.id.to_string(),
            job.status.as_str(),
            json,
            now.to_rfc3339()
        ],
    )?;
    Ok(changed)
}

/// Descriptor store over the `import_jobs` table.
///
/// `updated_at` comes from the store's clock, the system clock unless
/// replaced with `with_clock`.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: SqliteDatabase,
    clock: Arc<dyn Clock>,
}

impl SqliteJobStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, id: JobId) -> Result<Option<JobDescriptor>, StoreError> {
        self.db.run(move |conn| load_job(conn, id)).await
    }

    async fn insert(&self, descriptor: &JobDescriptor) -> Result<(), StoreError> {
        let job = descriptor.clone();
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO import_jobs (job_id, status, descriptor, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![
                        job.id.to_string(),
                        job.status.as_str(),
                        serde_json::to_string(&job)?,
                        job.created_at.to_rfc3339()
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn try_acquire_lease(&self, id: JobId, lease: Lease) -> Result<LeaseAttempt, StoreError> {
        let now = self.clock.now();
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let Some(mut job) = load_job(&tx, id)? else {
                    return Ok(LeaseAttempt::Missing);
                };
                if let Some(current) = job.lease
                    && current.is_live(lease.acquired_at)
                {
                    return Ok(LeaseAttempt::Held(current));
                }
                job.lease = Some(lease);
                save_job(&tx, &job, now)?;
                tx.commit()?;
                Ok(LeaseAttempt::Acquired(job))
            })
            .await
    }

    async fn commit(&self, descriptor: &JobDescriptor, owner: LeaseToken) -> Result<bool, StoreError> {
        let mut job = descriptor.clone();
        let now = self.clock.now();
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let holds = load_job(&tx, job.id)?.is_some_and(|stored| stored.holds_lease(owner));
                if !holds {
                    return Ok(false);
                }
                job.lease = None;
                save_job(&tx, &job, now)?;
                tx.commit()?;
                Ok(true)
            })
            .await
    }

    async fn release_lease(&self, id: JobId, owner: LeaseToken) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if let Some(mut job) = load_job(&tx, id)?
                    && job.holds_lease(owner)
                {
                    job.lease = None;
                    save_job(&tx, &job, now)?;
                    tx.commit()?;
                }
                Ok(())
            })
            .await
    }

    async fn replace(&self, descriptor: &JobDescriptor) -> Result<(), StoreError> {
        let job = descriptor.clone();
        let now = self.clock.now();
        self.db
            .run(move |conn| match save_job(conn, &job, now)? {
                0 => Err(StoreError::Backend(format!("job {} not found", job.id))),
                _ => Ok(()),
            })
            .await
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        self.db
            .run(move |conn| {
                let n = conn.execute(
                    "DELETE FROM import_jobs WHERE job_id = ?1",
                    params![id.to_string()],
                )?;
                Ok(n > 0)
            })
            .await
    }

    async fn list(&self) -> Result<Vec<JobDescriptor>, StoreError> {
        self.db
            .run(|conn| {
                let mut stmt =
                    conn.prepare("SELECT descriptor FROM import_jobs ORDER BY created_at")?;
                let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
                let mut jobs = Vec::new();
                for raw in rows {
                    jobs.push(serde_json::from_str(&raw?)?);
                }
                Ok(jobs)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

const STAMP_COLUMNS: &str = "import_job, import_row, import_outcome";

/// Rows written before the position columns existed have no usable stamp.
fn read_stamp(r: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<Option<ImportStamp>> {
    let job: Option<String> = r.get(first)?;
    let row: Option<i64> = r.get(first + 1)?;
    let outcome: Option<String> = r.get(first + 2)?;
    Ok(match (job, row, outcome) {
        (Some(job), Some(row), Some(outcome)) => Some(ImportStamp {
            job_id: match job.parse() {
                Ok(id) => id,
                Err(_) => return Ok(None),
            },
            row: row.max(0) as u64,
            outcome: match UpsertOutcome::parse(&outcome) {
                Some(o) => o,
                None => return Ok(None),
            },
        }),
        _ => None,
    })
}

fn stamp_params(ctx: &UpsertContext, outcome: UpsertOutcome) -> (String, i64, &'static str) {
    let stamp = ctx.stamp(outcome);
    (
        stamp.job_id.to_string(),
        i64::try_from(stamp.row).unwrap_or(i64::MAX),
        stamp.outcome.as_str(),
    )
}

fn upsert_color(
    conn: &Connection,
    color: &ColorRecord,
    ctx: &UpsertContext,
) -> Result<UpsertOutcome, StoreError> {
    let existing = conn
        .query_row(
            &format!("SELECT name, rgb, is_trans, {STAMP_COLUMNS} FROM rb_colors WHERE id = ?1"),
            params![color.id],
            |r| {
                Ok((
                    ColorRecord {
                        id: color.id,
                        name: r.get(0)?,
                        rgb: r.get(1)?,
                        is_trans: r.get(2)?,
                    },
                    read_stamp(r, 3)?,
                ))
            },
        )
        .optional()?;
    let decision = plan(
        existing.as_ref().map(|(value, stamp)| Existing {
            value,
            stamp: *stamp,
        }),
        color,
        ctx,
    );
    if decision.write_payload {
        conn.execute(
            "INSERT INTO rb_colors (id, name, rgb, is_trans) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, rgb = excluded.rgb, is_trans = excluded.is_trans",
            params![color.id, color.name, color.rgb, color.is_trans],
        )?;
    }
    if decision.write_stamp {
        let (job, row, outcome) = stamp_params(ctx, decision.outcome);
        conn.execute(
            "UPDATE rb_colors SET import_job = ?2, import_row = ?3, import_outcome = ?4
             WHERE id = ?1",
            params![color.id, job, row, outcome],
        )?;
    }
    Ok(decision.outcome)
}

fn upsert_part(
    conn: &Connection,
    part: &PartRecord,
    ctx: &UpsertContext,
) -> Result<UpsertOutcome, StoreError> {
    let existing = conn
        .query_row(
            &format!("SELECT name, part_cat_id, {STAMP_COLUMNS} FROM rb_parts WHERE part_num = ?1"),
            params![part.part_num],
            |r| {
                Ok((
                    PartRecord {
                        part_num: part.part_num.clone(),
                        name: r.get(0)?,
                        part_cat_id: r.get(1)?,
                    },
                    read_stamp(r, 2)?,
                ))
            },
        )
        .optional()?;
    let decision = plan(
        existing.as_ref().map(|(value, stamp)| Existing {
            value,
            stamp: *stamp,
        }),
        part,
        ctx,
    );
    if decision.write_payload {
        conn.execute(
            "INSERT INTO rb_parts (part_num, name, part_cat_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(part_num) DO UPDATE SET
                name = excluded.name, part_cat_id = excluded.part_cat_id",
            params![part.part_num, part.name, part.part_cat_id],
        )?;
    }
    if decision.write_stamp {
        let (job, row, outcome) = stamp_params(ctx, decision.outcome);
        conn.execute(
            "UPDATE rb_parts SET import_job = ?2, import_row = ?3, import_outcome = ?4
             WHERE part_num = ?1",
            params![part.part_num, job, row, outcome],
        )?;
    }
    Ok(decision.outcome)
}

fn upsert_element(
    conn: &Connection,
    element: &ElementRecord,
    ctx: &UpsertContext,
) -> Result<UpsertOutcome, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO rb_parts (part_num) VALUES (?1)",
        params![element.part_num],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO rb_colors (id) VALUES (?1)",
        params![element.color_id],
    )?;

    let existing = conn
        .query_row(
            &format!(
                "SELECT element_id, {STAMP_COLUMNS} FROM rb_elements
                 WHERE part_num = ?1 AND color_id = ?2"
            ),
            params![element.part_num, element.color_id],
            |r| {
                Ok((
                    ElementRecord {
                        element_id: r.get(0)?,
                        part_num: element.part_num.clone(),
                        color_id: element.color_id,
                    },
                    read_stamp(r, 1)?,
                ))
            },
        )
        .optional()?;
    let decision = plan(
        existing.as_ref().map(|(value, stamp)| Existing {
            value,
            stamp: *stamp,
        }),
        element,
        ctx,
    );
    if decision.write_payload {
        conn.execute(
            "INSERT INTO rb_elements (part_num, color_id, element_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(part_num, color_id) DO UPDATE SET element_id = excluded.element_id",
            params![element.part_num, element.color_id, element.element_id],
        )?;
    }
    if decision.write_stamp {
        let (job, row, outcome) = stamp_params(ctx, decision.outcome);
        conn.execute(
            "UPDATE rb_elements SET import_job = ?3, import_row = ?4, import_outcome = ?5
             WHERE part_num = ?1 AND color_id = ?2",
            params![element.part_num, element.color_id, job, row, outcome],
        )?;
    }
    Ok(decision.outcome)
}

/// Catalog tables `rb_colors`, `rb_parts`, `rb_elements`.
///
/// Each upsert is its own transaction, so a record is durable as soon as
/// the call returns.
#[derive(Clone)]
pub struct SqliteCatalog {
    db: SqliteDatabase,
}

impl SqliteCatalog {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn upsert(
        &self,
        record: &CatalogRecord,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome, StoreError> {
        let record = record.clone();
        let ctx = *ctx;
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let outcome = match &record {
                    CatalogRecord::Color(c) => upsert_color(&tx, c, &ctx)?,
                    CatalogRecord::Part(p) => upsert_part(&tx, p, &ctx)?,
                    CatalogRecord::Element(e) => upsert_element(&tx, e, &ctx)?,
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await
    }

    async fn count(&self, phase: Phase) -> Result<u64, StoreError> {
        let sql = match phase {
            Phase::Colors => "SELECT COUNT(*) FROM rb_colors",
            Phase::Parts => "SELECT COUNT(*) FROM rb_parts",
            Phase::Elements => "SELECT COUNT(*) FROM rb_elements",
        };
        self.db
            .run(move |conn| Ok(conn.query_row(sql, [], |r| r.get::<_, i64>(0))? as u64))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DuplicateKeyPolicy, PhaseProgress};
    use chrono::TimeDelta;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn descriptor() -> JobDescriptor {
        JobDescriptor::new(
            JobId::from_ulid(Ulid::new()),
            vec![PhaseProgress::new(Phase::Parts, PathBuf::from("parts.csv"), 2)],
            100,
            None,
            Utc::now(),
        )
    }

    fn ctx(job_id: JobId) -> UpsertContext {
        UpsertContext::new(job_id, DuplicateKeyPolicy::LastWins).at_row(1)
    }

    #[test]
    fn migrations_are_recorded() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let count: u32 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[tokio::test]
    async fn lease_cas_and_commit() {
        let store = SqliteJobStore::new(SqliteDatabase::open_in_memory().unwrap());
        let job = descriptor();
        store.insert(&job).await.unwrap();

        let now = Utc::now();
        let ours = Lease::new(LeaseToken::from_ulid(Ulid::new()), now, TimeDelta::seconds(60));
        let theirs = Lease::new(LeaseToken::from_ulid(Ulid::new()), now, TimeDelta::seconds(60));

        let LeaseAttempt::Acquired(mut leased) = store.try_acquire_lease(job.id, ours).await.unwrap()
        else {
            panic!("expected lease");
        };
        assert!(matches!(
            store.try_acquire_lease(job.id, theirs).await.unwrap(),
            LeaseAttempt::Held(_)
        ));

        leased.phases[0].advance(1, None);
        assert!(!store.commit(&leased, theirs.owner).await.unwrap());
        assert!(store.commit(&leased, ours.owner).await.unwrap());

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.phases[0].cursor, 1);
        assert!(stored.lease.is_none());
    }

    #[tokio::test]
    async fn element_upsert_keeps_referential_integrity() {
        let catalog = SqliteCatalog::new(SqliteDatabase::open_in_memory().unwrap());
        let job = JobId::from_ulid(Ulid::new());
        let element = CatalogRecord::Element(ElementRecord {
            element_id: "300121".into(),
            part_num: "3001".into(),
            color_id: 4,
        });

        assert_eq!(
            catalog.upsert(&element, &ctx(job)).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(catalog.count(Phase::Parts).await.unwrap(), 1);
        assert_eq!(catalog.count(Phase::Colors).await.unwrap(), 1);

        // another job, same payload
        let next = JobId::from_ulid(Ulid::new());
        assert_eq!(
            catalog.upsert(&element, &ctx(next)).await.unwrap(),
            UpsertOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("brickload.db");
        let job = descriptor();

        {
            let store = SqliteJobStore::new(SqliteDatabase::open(&path).unwrap());
            store.insert(&job).await.unwrap();
        }

        let store = SqliteJobStore::new(SqliteDatabase::open(&path).unwrap());
        let back = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reread_row_repeats_its_outcome_and_duplicates_do_not() {
        let catalog = SqliteCatalog::new(SqliteDatabase::open_in_memory().unwrap());
        let c = ctx(JobId::from_ulid(Ulid::new()));
        let part = CatalogRecord::Part(PartRecord {
            part_num: "3001".into(),
            name: "Brick 2 x 4".into(),
            part_cat_id: Some(11),
        });

        assert_eq!(catalog.upsert(&part, &c).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(catalog.upsert(&part, &c).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(
            catalog.upsert(&part, &c.at_row(7)).await.unwrap(),
            UpsertOutcome::Updated
        );
    }

    #[tokio::test]
    async fn updated_at_follows_the_injected_clock() {
        use crate::ports::FixedClock;
        use chrono::TimeZone;

        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let db = SqliteDatabase::open_in_memory().unwrap();
        let store = SqliteJobStore::new(db.clone()).with_clock(FixedClock::new(at));
        let job = descriptor();
        store.insert(&job).await.unwrap();
        store.replace(&job).await.unwrap();

        let id = job.id.to_string();
        let updated: String = db
            .with_conn(move |conn| {
                Ok(conn.query_row(
                    "SELECT updated_at FROM import_jobs WHERE job_id = ?1",
                    params![id],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(updated, at.to_rfc3339());
    }
}
