//! Archive preparation: validate the upload, extract and normalize each
//! row source into the job's scratch directory, count rows, store the
//! initial descriptor.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::app::Importer;
use crate::config::ImportConfig;
use crate::domain::row::required_columns;
use crate::domain::{JobDescriptor, JobId, Phase, PhaseProgress};
use crate::error::ImportError;
use crate::impls::summarize;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";
const ALLOWED_EXTENSIONS: &[&str] = &[".zip", ".csv", ".csv.gz", ".gz"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub name: Phase,
    pub total_rows: u64,
}

/// Result of a successful prepare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReport {
    pub job_id: JobId,
    pub phases: Vec<PhaseSummary>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
struct Extracted {
    sources: Vec<PhaseProgress>,
    warnings: Vec<String>,
}

/// Which phase a file name stands for, if any (`colors.csv`, `parts.csv.gz`, ...).
fn phase_for_member(name: &str) -> Option<Phase> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .to_ascii_lowercase();
    let stem = base.strip_suffix(".gz").unwrap_or(base.as_str());
    Phase::ALL.into_iter().find(|p| stem == p.file_name())
}

/// Classify a lone CSV upload by its name.
fn classify_single(name: &str) -> Phase {
    let lower = name.to_ascii_lowercase();
    if lower.contains("color") && !lower.contains("part") && !lower.contains("element") {
        Phase::Colors
    } else if lower.contains("element") {
        Phase::Elements
    } else {
        Phase::Parts
    }
}

/// Decompressed-bytes budget shared by all sources of one upload.
struct Budget {
    limit: u64,
    used: u64,
}

impl Budget {
    fn exceeded(&self, actual: u64) -> ImportError {
        ImportError::SizeLimitExceeded {
            what: "extracted sources".into(),
            limit: self.limit,
            actual,
        }
    }
}

/// Copy one source into `dest`, decompressing if needed.
fn copy_source<R: Read>(
    reader: R,
    member: &str,
    dest: &Path,
    gzipped: bool,
    budget: &mut Budget,
) -> Result<(), ImportError> {
    if gzipped {
        normalize_into(GzDecoder::new(reader), member, dest, budget)
    } else {
        normalize_into(reader, member, dest, budget)
    }
}

/// Copy plain CSV bytes into `dest`, dropping a leading BOM and enforcing the budget.
///
/// Read failures are the upload's fault (`Validation`); write failures are ours.
fn normalize_into<R: Read>(
    reader: R,
    member: &str,
    dest: &Path,
    budget: &mut Budget,
) -> Result<(), ImportError> {
    let corrupt = |e: io::Error| ImportError::Validation(format!("cannot read {member}: {e}"));

    let mut reader = BufReader::new(reader);
    if reader.fill_buf().map_err(corrupt)?.starts_with(UTF8_BOM) {
        reader.consume(UTF8_BOM.len());
    }

    let out = File::create(dest).map_err(|e| ImportError::io(dest, e))?;
    let mut out = BufWriter::new(out);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(corrupt)?;
        if n == 0 {
            break;
        }
        budget.used += n as u64;
        if budget.used > budget.limit {
            return Err(budget.exceeded(budget.used));
        }
        out.write_all(&buf[..n]).map_err(|e| ImportError::io(dest, e))?;
    }
    out.flush().map_err(|e| ImportError::io(dest, e))?;
    Ok(())
}

fn starts_with_magic(path: &Path, magic: &[u8]) -> Result<bool, ImportError> {
    let mut head = Vec::with_capacity(magic.len());
    File::open(path)
        .map_err(|e| ImportError::io(path, e))?
        .take(magic.len() as u64)
        .read_to_end(&mut head)
        .map_err(|e| ImportError::io(path, e))?;
    Ok(head == magic)
}

fn extract_zip<R: Read + Seek>(
    archive: R,
    dir: &Path,
    budget: &mut Budget,
    warnings: &mut Vec<String>,
) -> Result<Vec<Phase>, ImportError> {
    let mut archive = zip::ZipArchive::new(archive)
        .map_err(|e| ImportError::Validation(format!("corrupt zip archive: {e}")))?;

    let mut found = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| ImportError::Validation(format!("corrupt zip entry #{index}: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let Some(phase) = phase_for_member(&name) else {
            continue;
        };
        if found.contains(&phase) {
            warnings.push(format!("ignoring duplicate {} source '{name}'", phase));
            continue;
        }
        let gzipped = name.to_ascii_lowercase().ends_with(".gz");
        copy_source(entry, &name, &dir.join(phase.file_name()), gzipped, budget)?;
        found.push(phase);
    }
    Ok(found)
}

/// Synchronous part of prepare; runs on the blocking pool.
fn extract(upload: &Path, dir: &Path, config: &ImportConfig) -> Result<Extracted, ImportError> {
    let name = upload
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let mut budget = Budget {
        limit: config.max_extracted_size,
        used: 0,
    };
    let mut extracted = Extracted::default();

    let present = if starts_with_magic(upload, ZIP_MAGIC)? {
        let file = File::open(upload).map_err(|e| ImportError::io(upload, e))?;
        let present = extract_zip(file, dir, &mut budget, &mut extracted.warnings)?;
        if present.is_empty() {
            return Err(ImportError::Validation(
                "archive contains none of colors.csv, parts.csv, elements.csv".into(),
            ));
        }
        present
    } else {
        let lower = name.to_ascii_lowercase();
        if !lower.ends_with(".csv") && !lower.ends_with(".csv.gz") {
            return Err(ImportError::Validation(format!(
                "unsupported file type '{name}'"
            )));
        }
        let phase = classify_single(&name);
        let gzipped = starts_with_magic(upload, GZIP_MAGIC)?;
        let file = File::open(upload).map_err(|e| ImportError::io(upload, e))?;
        copy_source(file, &name, &dir.join(phase.file_name()), gzipped, &mut budget)?;
        vec![phase]
    };

    for phase in present {
        let path = dir.join(phase.file_name());
        let summary = summarize(&path)
            .map_err(|e| ImportError::Validation(format!("{}: {e}", phase.file_name())))?;

        if summary.headers.is_empty() {
            extracted
                .warnings
                .push(format!("{} is empty and was skipped", phase.file_name()));
            std::fs::remove_file(&path).map_err(|e| ImportError::io(&path, e))?;
            continue;
        }
        for group in required_columns(phase) {
            if !group.iter().any(|c| summary.headers.iter().any(|h| h == c)) {
                return Err(ImportError::Validation(format!(
                    "{}: missing required column '{}'",
                    phase.file_name(),
                    group[0]
                )));
            }
        }
        if summary.rows > config.max_rows_per_entity {
            return Err(ImportError::SizeLimitExceeded {
                what: format!("{phase} rows"),
                limit: config.max_rows_per_entity,
                actual: summary.rows,
            });
        }
        extracted
            .sources
            .push(PhaseProgress::new(phase, path, summary.rows));
    }
    Ok(extracted)
}

impl Importer {
    /// Validate `upload` and create a job for it.
    ///
    /// Accepts a ZIP holding any of `colors.csv`, `parts.csv`, `elements.csv`
    /// (each optionally `.gz`), or a single `.csv` / `.csv.gz` classified by name.
    #[tracing::instrument(skip(self, upload), fields(upload = %upload.display()))]
    pub async fn prepare(&self, upload: &Path) -> Result<PrepareReport, ImportError> {
        let name = upload
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !ALLOWED_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            return Err(ImportError::Validation(format!(
                "unsupported file type '{name}' (expected .zip, .csv or .csv.gz)"
            )));
        }

        let size = std::fs::metadata(upload)
            .map_err(|e| ImportError::io(upload, e))?
            .len();
        if size > self.config.max_archive_size {
            return Err(ImportError::SizeLimitExceeded {
                what: "archive".into(),
                limit: self.config.max_archive_size,
                actual: size,
            });
        }

        let job_id = self.ids.generate_job_id();
        let dir = self
            .scratch
            .allocate(job_id)
            .map_err(|e| ImportError::io(PathBuf::from(job_id.to_string()), e))?;

        let task = {
            let upload = upload.to_path_buf();
            let dir = dir.clone();
            let config = self.config.clone();
            tokio::task::spawn_blocking(move || extract(&upload, &dir, &config))
        };
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(ImportError::io(upload, io::Error::other(e))),
        };
        let extracted = match result {
            Ok(extracted) => extracted,
            Err(e) => {
                self.discard_scratch(&dir);
                return Err(e);
            }
        };

        let mut job = JobDescriptor::new(
            job_id,
            extracted.sources,
            self.config.batch_size_default,
            Some(dir.clone()),
            self.clock.now(),
        );
        job.warnings = extracted.warnings;
        if job.status.is_finished() {
            self.discard_scratch(&dir);
            job.scratch_dir = None;
        }

        if let Err(e) = self.jobs.insert(&job).await {
            self.discard_scratch(&dir);
            return Err(e.into());
        }

        let report = PrepareReport {
            job_id,
            phases: job
                .phases
                .iter()
                .map(|p| PhaseSummary {
                    name: p.phase,
                    total_rows: p.total_rows,
                })
                .collect(),
            warnings: job.warnings.clone(),
        };
        tracing::info!(
            job_id = %job_id,
            phases = report.phases.len(),
            warnings = report.warnings.len(),
            first_phase = %job.phase,
            "import prepared"
        );
        Ok(report)
    }

    /// Best-effort scratch release; failures are logged, not returned.
    pub(crate) fn discard_scratch(&self, dir: &Path) {
        if let Err(e) = self.scratch.release(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to release scratch directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("colors.csv", Some(Phase::Colors))]
    #[case("rebrickable/Parts.CSV.gz", Some(Phase::Parts))]
    #[case("dump\\elements.csv", Some(Phase::Elements))]
    #[case("part_categories.csv", None)]
    #[case("colors.csv.bak", None)]
    fn zip_members_are_matched_by_basename(#[case] name: &str, #[case] expected: Option<Phase>) {
        assert_eq!(phase_for_member(name), expected);
    }

    #[rstest]
    #[case("colors.csv", Phase::Colors)]
    #[case("my_colors_2024.csv.gz", Phase::Colors)]
    #[case("elements.csv", Phase::Elements)]
    #[case("part_colors.csv", Phase::Parts)]
    #[case("whatever.csv", Phase::Parts)]
    fn single_files_are_classified_by_name(#[case] name: &str, #[case] expected: Phase) {
        assert_eq!(classify_single(name), expected);
    }

    #[test]
    fn bom_is_stripped_and_budget_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("colors.csv");
        let mut budget = Budget {
            limit: 1024,
            used: 0,
        };
        normalize_into(&b"\xef\xbb\xbfid,name\n1,Blue\n"[..], "colors.csv", &dest, &mut budget)
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"id,name\n1,Blue\n");

        let mut tight = Budget { limit: 4, used: 0 };
        let err = normalize_into(&b"id,name\n"[..], "colors.csv", &dest, &mut tight)
            .unwrap_err();
        assert!(matches!(err, ImportError::SizeLimitExceeded { .. }));
    }

    #[test]
    fn corrupt_gzip_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("parts.csv");
        let mut budget = Budget {
            limit: 1024,
            used: 0,
        };
        let err = copy_source(&b"\x1f\x8bnot really gzip"[..], "parts.csv.gz", &dest, true, &mut budget)
            .unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
    }
}
