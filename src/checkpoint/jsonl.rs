//! Append-only JSON Lines checkpoint log

use crate::checkpoint::record::{AttemptRecord, LoggedAttempt};
use crate::checkpoint::reduce::{reduce, Reduction};
use crate::checkpoint::traits::{CheckpointResult, CheckpointStore};
use crate::unit::UnitKey;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Checkpoint log backed by a single `.jsonl` file
///
/// All writes (appends and compaction) go through one lock around the append
/// handle, so a record is always written as one whole line.
pub struct JsonlCheckpoint {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonlCheckpoint {
    /// Opens (or creates) the log at `path`
    ///
    /// If a previous process died mid-write and left a partial last line, a
    /// newline is added so the next record starts on a line of its own.
    pub fn open(path: &Path) -> CheckpointResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = open_append(path)?;
        if !ends_with_newline(path)? {
            tracing::warn!(
                "Checkpoint log {} ends mid-line; terminating the partial record",
                path.display()
            );
            file.write_all(b"\n")?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CheckpointStore for JsonlCheckpoint {
    fn append(&self, record: &AttemptRecord) -> CheckpointResult<()> {
        let mut line = record.to_line()?;
        line.push('\n');

        let mut file = self.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn load(&self) -> CheckpointResult<Vec<LoggedAttempt>> {
        let _guard = self.lock();
        load_attempts(&self.path)
    }

    fn compact(&self, keys: &HashSet<UnitKey>) -> CheckpointResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut file = self.lock();
        let mut kept = String::new();
        let mut removed = 0;

        for (_, line) in read_lines(&self.path)? {
            let stale = matches!(
                LoggedAttempt::parse(&line),
                Ok(Some(ref attempt)) if keys.contains(&attempt.key) && attempt.is_stale_failure()
            );
            if stale {
                removed += 1;
            } else {
                kept.push_str(&line);
                kept.push('\n');
            }
        }

        if removed == 0 {
            return Ok(0);
        }

        // Write the compacted log beside the original and swap it in
        let tmp_path = self.path.with_extension("jsonl.compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(kept.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        // The old handle points at the replaced file
        *file = open_append(&self.path)?;

        tracing::info!(
            "Compacted {}: removed {} stale failure records",
            self.path.display(),
            removed
        );
        Ok(removed)
    }
}

/// Reads the success lines of a checkpoint log as raw JSON
///
/// This is the downstream contract: failure lines, repeated attempts and
/// unreadable lines are skipped. A missing file reads as empty.
pub fn read_success_lines(path: &Path) -> CheckpointResult<Vec<Value>> {
    let mut lines = Vec::new();

    for (line_no, line) in read_lines(path)? {
        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Skipping line {} of {}: {}", line_no, path.display(), e);
                continue;
            }
        };
        if value.get("status").and_then(Value::as_str) == Some("success") {
            lines.push(value);
        }
    }

    Ok(lines)
}

/// Reduces a log without opening it for writing
///
/// Used by read-only modes. A missing file reduces to nothing.
pub fn reduce_log(path: &Path) -> CheckpointResult<Reduction> {
    Ok(reduce(&load_attempts(path)?))
}

fn load_attempts(path: &Path) -> CheckpointResult<Vec<LoggedAttempt>> {
    let mut attempts = Vec::new();

    for (line_no, line) in read_lines(path)? {
        match LoggedAttempt::parse(&line) {
            Ok(Some(attempt)) => attempts.push(attempt),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                "Skipping unreadable line {} of {}: {}",
                line_no,
                path.display(),
                e
            ),
        }
    }

    Ok(attempts)
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Non-empty lines with their 1-based line numbers
fn read_lines(path: &Path) -> std::io::Result<Vec<(usize, String)>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut lines = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push((idx + 1, trimmed.to_string()));
        }
    }
    Ok(lines)
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::record::AttemptStatus;
    use crate::state::{FailureReason, UnitStatus};
    use crate::unit::WorkUnit;
    use serde_json::Map;
    use std::sync::Arc;

    fn unit(page: u64) -> WorkUnit {
        WorkUnit {
            key: UnitKey::page(1, page),
            target_url: format!("https://example.com/book/1/{}", page),
        }
    }

    fn line_count(path: &Path) -> usize {
        read_lines(path).unwrap().len()
    }

    #[test]
    fn test_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlCheckpoint::open(&dir.path().join("log.jsonl")).unwrap();

        log.append(&AttemptRecord::success(&unit(1), Map::new()))
            .unwrap();
        log.append(&AttemptRecord::failure(
            &unit(2),
            FailureReason::EmptyResponse,
            "Empty",
        ))
        .unwrap();

        let attempts = log.load().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].status, AttemptStatus::Success);
        assert_eq!(attempts[1].reason, Some(FailureReason::EmptyResponse));
    }

    #[test]
    fn test_concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = Arc::new(JsonlCheckpoint::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let mut payload = Map::new();
                        payload.insert("filler".to_string(), Value::from("x".repeat(2048)));
                        log.append(&AttemptRecord::success(&unit(worker * 100 + i), payload))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = read_lines(&path).unwrap();
        assert_eq!(lines.len(), 400);
        for (_, line) in lines {
            assert!(LoggedAttempt::parse(&line).unwrap().is_some());
        }
    }

    #[test]
    fn test_compaction_keeps_success_and_benign_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = JsonlCheckpoint::open(&path).unwrap();

        // Unit 1 has a success plus a stale failure
        log.append(&AttemptRecord::failure(&unit(1), FailureReason::ProxyFailure, "x"))
            .unwrap();
        log.append(&AttemptRecord::success(&unit(1), Map::new()))
            .unwrap();
        // Unit 2 only has retryable failures
        log.append(&AttemptRecord::failure(&unit(2), FailureReason::EmptyResponse, "x"))
            .unwrap();
        log.append(&AttemptRecord::failure(&unit(2), FailureReason::ChallengePage, "y"))
            .unwrap();
        // Unit 3 is benign terminal
        log.append(&AttemptRecord::failure(
            &unit(3),
            FailureReason::NoTargetEntities,
            "z",
        ))
        .unwrap();

        let keys: HashSet<UnitKey> = (1..=3).map(|p| UnitKey::page(1, p)).collect();
        let removed = log.compact(&keys).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(line_count(&path), 2);

        let reduction = log.reduce().unwrap();
        assert_eq!(reduction.status_of(&UnitKey::page(1, 1)), UnitStatus::Done);
        assert_eq!(
            reduction.status_of(&UnitKey::page(1, 2)),
            UnitStatus::Unattempted
        );
        assert_eq!(reduction.status_of(&UnitKey::page(1, 3)), UnitStatus::Done);
    }

    #[test]
    fn test_compaction_leaves_other_units_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = JsonlCheckpoint::open(&path).unwrap();

        log.append(&AttemptRecord::failure(&unit(1), FailureReason::ProxyFailure, "x"))
            .unwrap();
        log.append(&AttemptRecord::failure(&unit(2), FailureReason::ProxyFailure, "x"))
            .unwrap();

        let keys: HashSet<UnitKey> = [UnitKey::page(1, 1)].into_iter().collect();
        assert_eq!(log.compact(&keys).unwrap(), 1);

        let reduction = log.reduce().unwrap();
        assert_eq!(
            reduction.status_of(&UnitKey::page(1, 2)),
            UnitStatus::RetryEligible
        );
    }

    #[test]
    fn test_appends_after_compaction_reach_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = JsonlCheckpoint::open(&path).unwrap();

        log.append(&AttemptRecord::failure(&unit(1), FailureReason::ProxyFailure, "x"))
            .unwrap();
        let keys: HashSet<UnitKey> = [UnitKey::page(1, 1)].into_iter().collect();
        log.compact(&keys).unwrap();
        log.append(&AttemptRecord::success(&unit(1), Map::new()))
            .unwrap();

        assert_eq!(line_count(&path), 1);
        assert_eq!(
            log.reduce().unwrap().status_of(&UnitKey::page(1, 1)),
            UnitStatus::Done
        );
    }

    #[test]
    fn test_unreadable_lines_survive_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(
            &path,
            "{broken\n{\"status\":\"failed\",\"book_id\":1,\"page_number\":1,\"reason\":\"proxy_failure\"}\n",
        )
        .unwrap();

        let log = JsonlCheckpoint::open(&path).unwrap();
        assert_eq!(log.load().unwrap().len(), 1);

        let keys: HashSet<UnitKey> = [UnitKey::page(1, 1)].into_iter().collect();
        assert_eq!(log.compact(&keys).unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{broken\n");
    }

    #[test]
    fn test_partial_last_line_is_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"status\":\"succ").unwrap();

        let log = JsonlCheckpoint::open(&path).unwrap();
        log.append(&AttemptRecord::success(&unit(5), Map::new()))
            .unwrap();

        let attempts = log.load().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].key, UnitKey::page(1, 5));
    }

    #[test]
    fn test_read_success_lines_filters_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = JsonlCheckpoint::open(&path).unwrap();
        log.append(&AttemptRecord::failure(&unit(1), FailureReason::ProxyFailure, "x"))
            .unwrap();
        log.append(&AttemptRecord::success(&unit(2), Map::new()))
            .unwrap();
        log.append(&AttemptRecord::success(&unit(2), Map::new()))
            .unwrap();

        let lines = read_success_lines(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l["page_number"] == 2));
    }

    #[test]
    fn test_reduce_log_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");

        assert!(reduce_log(&path).unwrap().is_empty());
        assert!(!path.exists());
    }
}
