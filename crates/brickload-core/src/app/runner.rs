//! Batch runner - 1 回の呼び出しで 1 スライスだけ進める
//!
//! # 手順
//! 1. descriptor を読む（NotFound / Expired を区別）
//! 2. 終端（done / failed）ならスナップショットをそのまま返す
//! 3. lease を CAS で取る。取れなければ Conflict（状態は一切変えない）
//! 4. batch size を clamp し、現在フェーズの cursor からスライスを読む
//! 5. 行ごとに parse → upsert。行エラーは数えるだけ
//! 6. cursor を進め、フェーズ完了なら次へ
//! 7. commit（lease を持っている場合だけ書ける）して lease を解放
//!
//! storage write エラーだけが job を failed にする。
//! source / descriptor store のエラーは呼び出しだけを中断し、cursor は動かない。

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::app::Importer;
use crate::app::status::{BatchReport, ProgressSnapshot};
use crate::domain::{
    Checkpoint, Counters, JobDescriptor, JobId, Lease, LeaseToken, UpsertContext, parse_row,
};
use crate::error::ImportError;
use crate::ports::{LeaseAttempt, SourceRow, StoreError};

/// Row messages kept per batch response.
pub const MAX_BATCH_MESSAGES: usize = 20;

/// Why a slice stopped short.
enum SliceFault {
    /// Reading the source failed; nothing is persisted.
    Source(ImportError),
    /// The target store rejected a write after `processed` rows.
    Storage(StoreError),
}

impl Importer {
    /// Advance `job_id` by at most one batch and return the new snapshot.
    ///
    /// `batch_size` (if given) is clamped and becomes the job's batch size
    /// for later calls.
    #[tracing::instrument(skip(self))]
    pub async fn run_batch(
        &self,
        job_id: &str,
        batch_size: Option<u32>,
    ) -> Result<ProgressSnapshot, ImportError> {
        let id = Self::parse_job_id(job_id)?;

        let job = self.load_live(id).await?;
        if job.status.is_finished() {
            return Ok(ProgressSnapshot::from(&job));
        }

        let now = self.clock.now();
        let lease = Lease::new(self.ids.generate_lease_token(), now, self.config.lease_ttl());
        let mut job = match self.jobs.try_acquire_lease(id, lease).await? {
            LeaseAttempt::Acquired(job) => job,
            LeaseAttempt::Held(held) => {
                tracing::debug!(until = %held.expires_at, "lease held by another call");
                return Err(ImportError::Conflict {
                    job_id: id,
                    until: held.expires_at,
                });
            }
            LeaseAttempt::Missing => return Err(ImportError::NotFound(id.to_string())),
        };

        // state may have moved between the first read and the lease
        if job.is_expired(now, self.config.job_ttl()) {
            self.jobs.release_lease(id, lease.owner).await?;
            return Err(ImportError::Expired(id));
        }
        if job.status.is_finished() {
            self.jobs.release_lease(id, lease.owner).await?;
            return Ok(ProgressSnapshot::from(&job));
        }

        job.batch_size = self
            .config
            .clamp_batch(batch_size.or(Some(job.batch_size)));

        match self.advance(&mut job).await {
            Ok(report) => self.finish(&mut job, lease.owner, report).await,
            Err(SliceFault::Source(e)) => {
                tracing::warn!(error = %e, "reading the source failed, cursor unchanged");
                self.jobs.release_lease(id, lease.owner).await?;
                Err(e)
            }
            Err(SliceFault::Storage(source)) => {
                let reason = format!("storage write failed: {source}");
                job.mark_failed(reason, self.clock.now());
                tracing::error!(phase = %job.phase, error = %source, "job failed");
                self.release_job_scratch(&mut job);
                self.commit(&job, lease.owner).await?;
                Err(ImportError::StorageWrite { job_id: id, source })
            }
        }
    }

    /// Read and apply one slice of the current phase.
    ///
    /// On a storage fault the rows processed before it are already applied
    /// to `job`; the caller persists them together with the failure.
    async fn advance(&self, job: &mut JobDescriptor) -> Result<BatchReport, SliceFault> {
        self.complete_exhausted_phases(job);

        let Some(progress) = job.current() else {
            return Ok(BatchReport::default());
        };
        let phase = progress.phase;
        let cursor = progress.cursor;
        let take = u64::from(job.batch_size).min(progress.remaining()) as usize;

        let rows = self
            .read_slice(progress.source.clone(), cursor, progress.checkpoint, take)
            .await
            .map_err(SliceFault::Source)?;
        let short_read = rows.len() < take;

        let ctx = UpsertContext::new(job.id, self.config.duplicate_key_policy);
        let mut report = BatchReport {
            phase: Some(phase),
            ..BatchReport::default()
        };
        let mut checkpoint = None;
        let mut fault = None;

        for source_row in rows {
            let SourceRow { end, row } = source_row;
            let parsed = row.and_then(|raw| parse_row(phase, &raw));
            match parsed {
                Ok(record) => match self.catalog.upsert(&record, &ctx.at_row(end.record)).await {
                    Ok(outcome) => report.counters.record(outcome),
                    Err(e) => {
                        tracing::error!(key = %record.natural_key(), error = %e, "upsert failed");
                        fault = Some(e);
                        break;
                    }
                },
                Err(e) => {
                    report.counters.record_error();
                    if report.messages.len() < MAX_BATCH_MESSAGES {
                        report.messages.push(format!("{phase} {e}"));
                    }
                }
            }
            report.rows_read += 1;
            checkpoint = Some(end);
        }

        let Some(progress) = job.progress_mut(phase) else {
            return Ok(report);
        };
        progress.advance(report.rows_read, checkpoint);
        progress.counters.add(&report.counters);

        if let Some(e) = fault {
            return Err(SliceFault::Storage(e));
        }

        if short_read && progress.remaining() > 0 {
            let warning = format!(
                "{phase} source ended at row {} of {}",
                progress.cursor, progress.total_rows
            );
            tracing::warn!(phase = %phase, cursor = progress.cursor, "{warning}");
            progress.total_rows = progress.cursor;
            job.warnings.push(warning);
        }

        if job.current().is_some_and(|p| p.remaining() == 0) {
            let next = job.complete_current_phase();
            tracing::info!(phase = %phase, next = %next, "phase complete");
            self.complete_exhausted_phases(job);
        }
        Ok(report)
    }

    /// Complete every phase at the front that has nothing left to read.
    fn complete_exhausted_phases(&self, job: &mut JobDescriptor) {
        while let Some(progress) = job.current()
            && progress.remaining() == 0
        {
            let phase = progress.phase;
            let next = job.complete_current_phase();
            tracing::info!(phase = %phase, next = %next, "empty phase complete");
        }
    }

    async fn read_slice(
        &self,
        source: PathBuf,
        cursor: u64,
        checkpoint: Option<Checkpoint>,
        take: usize,
    ) -> Result<Vec<SourceRow>, ImportError> {
        if take == 0 {
            return Ok(Vec::new());
        }
        let factory = self.sources.clone();
        let path = source.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut reader = factory.open(&path)?;
            reader.seek(cursor, checkpoint)?;
            reader.read_next(take)
        });
        match task.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(ImportError::io(source, std::io::Error::other(e))),
        }
    }

    async fn finish(
        &self,
        job: &mut JobDescriptor,
        owner: LeaseToken,
        report: BatchReport,
    ) -> Result<ProgressSnapshot, ImportError> {
        let now = self.clock.now();
        job.touch(now);
        if job.status.is_finished() {
            self.release_job_scratch(job);
        }
        self.commit(job, owner).await?;

        let totals: Counters = report.counters;
        tracing::info!(
            phase = %job.phase,
            status = job.status.as_str(),
            rows = report.rows_read,
            created = totals.created,
            updated = totals.updated,
            skipped = totals.skipped,
            errors = totals.errors,
            "batch committed"
        );
        Ok(ProgressSnapshot::from(&*job).with_batch(report))
    }

    /// Persist `job` if `owner` still holds its lease; otherwise `Conflict`.
    ///
    /// A store fault releases the lease so the call can be retried at once.
    async fn commit(&self, job: &JobDescriptor, owner: LeaseToken) -> Result<(), ImportError> {
        let committed = match self.jobs.commit(job, owner).await {
            Ok(committed) => committed,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "commit failed, batch not recorded");
                if let Err(release) = self.jobs.release_lease(job.id, owner).await {
                    tracing::warn!(job_id = %job.id, error = %release, "failed to release lease");
                }
                return Err(e.into());
            }
        };
        if committed {
            return Ok(());
        }
        let until = self.current_lease_expiry(job.id).await;
        tracing::warn!(job_id = %job.id, "lease lost before commit, batch discarded");
        Err(ImportError::Conflict {
            job_id: job.id,
            until,
        })
    }

    async fn current_lease_expiry(&self, id: JobId) -> DateTime<Utc> {
        match self.jobs.get(id).await {
            Ok(Some(job)) => job.lease.map(|l| l.expires_at).unwrap_or_else(Utc::now),
            _ => Utc::now(),
        }
    }

    fn release_job_scratch(&self, job: &mut JobDescriptor) {
        if let Some(dir) = job.scratch_dir.take() {
            self.discard_scratch(&dir);
        }
    }
}
