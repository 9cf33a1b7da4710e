//! Integration tests for complete backup passes

use ::hfbr::compression::decompress_file;
use ::hfbr::guard::DIGEST_FILE;
use ::hfbr::*;
use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use filetime::{set_file_mtime, FileTime};
use sha2::{Digest, Sha512};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Reference point for generated histories: 2023-11-14 22:13:20 UTC
const BASE_TS: i64 = 1_700_000_000;

const DAY: i64 = 86_400;

/// Test harness around a backup directory of generated snapshots
pub struct BackupHarness {
    pub backup_dir: TempDir,
}

impl Default for BackupHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupHarness {
    pub fn new() -> Self {
        Self {
            backup_dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.backup_dir.path()
    }

    /// Write a snapshot file with the given modification time
    pub fn add_snapshot(&self, name: &str, timestamp: i64) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(timestamp, 0)).unwrap();
        path
    }

    /// Base names of the snapshots still on disk, sorted
    pub fn remaining(&self) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(self.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| catalog::is_snapshot_name(name))
            .collect();
        names.sort();
        names
    }
}

fn daily_history(harness: &BackupHarness, days: i64) -> Vec<PathBuf> {
    (0..days)
        .map(|i| harness.add_snapshot(&format!("day{i:02}.db.lz4"), BASE_TS - i * DAY))
        .collect()
}

#[test]
fn test_unchanged_target_is_captured_once() {
    let target_dir = TempDir::new().unwrap();
    let harness = BackupHarness::new();
    let target = target_dir.path().join("data.txt");
    fs::write(&target, b"abc").unwrap();

    let guard = ChangeGuard::new(&target, harness.path());
    let sink = MemorySink::new();

    let when = Local.with_ymd_and_hms(2024, 3, 4, 5, 6, 0).single().unwrap();
    let first = guard.capture_at(when, &sink).unwrap();
    let snapshot = first.snapshot().unwrap().to_path_buf();
    assert_eq!(snapshot, harness.path().join("20240304-0506.txt.lz4"));
    assert_eq!(decompress_file(&snapshot).unwrap(), b"abc");

    let expected = Sha512::digest(b"abc").to_vec();
    assert_eq!(fs::read(harness.path().join(DIGEST_FILE)).unwrap(), expected);

    let later = Local.with_ymd_and_hms(2024, 3, 4, 5, 7, 0).single().unwrap();
    let second = guard.capture_at(later, &sink).unwrap();
    assert_eq!(
        second,
        GuardOutcome::Unchanged {
            digest: expected.clone()
        }
    );
    assert_eq!(harness.remaining(), vec!["20240304-0506.txt.lz4"]);
    assert_eq!(fs::read(harness.path().join(DIGEST_FILE)).unwrap(), expected);
}

#[test]
fn test_changed_target_gets_new_snapshot_and_digest() {
    let target_dir = TempDir::new().unwrap();
    let harness = BackupHarness::new();
    let target = target_dir.path().join("data.txt");
    let guard = ChangeGuard::new(&target, harness.path());
    let sink = MemorySink::new();

    fs::write(&target, b"abc").unwrap();
    guard
        .capture_at(Local.with_ymd_and_hms(2024, 3, 4, 5, 6, 0).single().unwrap(), &sink)
        .unwrap();
    fs::write(&target, b"abcd").unwrap();
    let outcome = guard
        .capture_at(Local.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).single().unwrap(), &sink)
        .unwrap();

    assert_eq!(
        outcome,
        GuardOutcome::Captured {
            snapshot: harness.path().join("20240304-0600.txt.lz4"),
            digest: Sha512::digest(b"abcd").to_vec(),
        }
    );
    assert_eq!(harness.remaining().len(), 2);
    assert_eq!(
        decompress_file(&harness.path().join("20240304-0506.txt.lz4")).unwrap(),
        b"abc"
    );
}

#[test]
fn test_daily_rule_keeps_three_newest_days() {
    let harness = BackupHarness::new();
    daily_history(&harness, 10);

    let report = BackupTarget::retention_only(harness.path())
        .policy(RetentionPolicy::new(vec![Rule::new(
            "1 day".parse().unwrap(),
            Quantity::Limited(3),
        )]))
        .run(&MemorySink::new())
        .unwrap();

    assert_eq!(report.prune.pruned.len(), 7);
    assert_eq!(
        harness.remaining(),
        vec!["day00.db.lz4", "day01.db.lz4", "day02.db.lz4"]
    );
}

#[test]
fn test_pinned_snapshot_survives_retention() {
    let harness = BackupHarness::new();
    daily_history(&harness, 10);

    let report = BackupTarget::retention_only(harness.path())
        .policy(RetentionPolicy::new(vec![Rule::new(
            Granularity::FixedDuration(DAY as u64),
            Quantity::Limited(3),
        )]))
        .pin("day09.db.lz4")
        .run(&MemorySink::new())
        .unwrap();

    assert_eq!(report.prune.kept.len(), 4);
    assert_eq!(
        harness.remaining(),
        vec!["day00.db.lz4", "day01.db.lz4", "day02.db.lz4", "day09.db.lz4"]
    );
}

#[test]
fn test_vacuous_plan_keeps_everything() {
    let harness = BackupHarness::new();
    daily_history(&harness, 10);
    let sink = MemorySink::new();

    let report = BackupTarget::retention_only(harness.path())
        .policy(RetentionPolicy::new(vec![
            Rule::new(Granularity::Year, Quantity::Unbounded),
            Rule::new(Granularity::Unbucketed, Quantity::Unbounded),
        ]))
        .run(&sink)
        .unwrap();

    assert!(report.evaluation.vacuous);
    assert_eq!(harness.remaining().len(), 10);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, RetentionEvent::PolicyVacuous { .. })));
}

fn default_plan() -> RetentionPolicy {
    RetentionPolicy::new(vec![
        Rule::new(Granularity::Year, Quantity::Unbounded),
        Rule::new(Granularity::Month, Quantity::Limited(9)),
        Rule::new("1 week".parse().unwrap(), Quantity::Limited(6)),
        Rule::new("1 day".parse().unwrap(), Quantity::Limited(5)),
        Rule::new("1 hour".parse().unwrap(), Quantity::Limited(18)),
        Rule::latest(10),
    ])
}

/// Bucket key computed independently of the engine
fn bucket(granularity: &Granularity, modified: DateTime<Utc>) -> i64 {
    match granularity {
        Granularity::Unbucketed => modified.timestamp(),
        Granularity::FixedDuration(secs) => modified.timestamp().div_euclid(*secs as i64),
        Granularity::Month => {
            let local = modified.with_timezone(&Local);
            local.year() as i64 * 12 + local.month() as i64
        }
        Granularity::Year => modified.with_timezone(&Local).year() as i64,
    }
}

#[test]
fn test_dense_history_under_default_plan() {
    // Every 3 hours for a little over two years
    let snapshots: Vec<Snapshot> = (0..6_000)
        .map(|i| Snapshot {
            path: PathBuf::from(format!("/backup/s{i:05}.lz4")),
            name: format!("s{i:05}.lz4"),
            modified: DateTime::from_timestamp(BASE_TS - i * 3 * 3_600, 0).unwrap(),
            pinned: false,
        })
        .collect();
    let mut catalog = SnapshotCatalog::from_snapshots("/backup", snapshots);
    let policy = default_plan();
    let sink = MemorySink::new();

    let evaluation = RetentionEngine::new(policy.clone()).evaluate(&mut catalog, &sink);
    assert!(!evaluation.vacuous);

    let report = PruneExecutor::new(PruneMode::DryRun).execute(&catalog, &sink);
    assert_eq!(report.kept.len(), evaluation.kept);
    assert_eq!(report.kept.len() + report.pruned.len(), 6_000);

    let kept: BTreeSet<&str> = catalog.pinned().map(|s| s.name.as_str()).collect();
    let years: BTreeSet<i64> = catalog
        .iter()
        .map(|(_, s)| bucket(&Granularity::Year, s.modified))
        .collect();

    // Nothing beyond what the rules can account for
    let bound: usize = 9 + 6 + 5 + 18 + 10 + years.len();
    assert!(kept.len() <= bound, "{} kept, bound {}", kept.len(), bound);

    for rule in policy.rules() {
        let mut buckets: BTreeMap<i64, Vec<&Snapshot>> = BTreeMap::new();
        for (_, s) in catalog.iter() {
            buckets.entry(bucket(&rule.granularity, s.modified)).or_default().push(s);
        }
        let limit = match rule.quantity {
            Quantity::Unbounded => buckets.len(),
            Quantity::Limited(n) => n,
        };

        // Each of the newest buckets holds at least one survivor
        for (key, members) in buckets.iter().rev().take(limit) {
            assert!(
                members.iter().any(|s| kept.contains(s.name.as_str())),
                "rule {} left bucket {} empty",
                rule,
                key
            );
        }
    }

    // The ten most recent snapshots are all kept
    for i in 0..10 {
        assert!(kept.contains(format!("s{i:05}.lz4").as_str()));
    }

    let expected = representatives(&catalog, &policy);
    let expected: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    assert_eq!(kept, expected);
}

/// Rule-by-rule union of representatives, computed without the engine.
///
/// A bucket's representative is a snapshot pinned by an earlier rule if
/// there is one, else its oldest member.
fn representatives(catalog: &SnapshotCatalog, policy: &RetentionPolicy) -> BTreeSet<String> {
    let snapshots: Vec<&Snapshot> = catalog.iter().map(|(_, s)| s).collect();
    let mut pinned: BTreeSet<String> = BTreeSet::new();

    for rule in policy.rules() {
        let mut buckets: BTreeMap<i64, Vec<&Snapshot>> = BTreeMap::new();
        for s in &snapshots {
            buckets.entry(bucket(&rule.granularity, s.modified)).or_default().push(s);
        }
        let limit = match rule.quantity {
            Quantity::Unbounded => buckets.len(),
            Quantity::Limited(n) => n,
        };

        let chosen: Vec<String> = buckets
            .values()
            .rev()
            .take(limit)
            .filter_map(|members| {
                members
                    .iter()
                    .min_by_key(|s| (!pinned.contains(&s.name), s.modified))
                    .map(|s| s.name.clone())
            })
            .collect();
        pinned.extend(chosen);
    }

    pinned
}

#[test]
fn test_repeated_passes_are_stable() {
    let harness = BackupHarness::new();
    daily_history(&harness, 20);
    let target = BackupTarget::retention_only(harness.path()).policy(RetentionPolicy::new(vec![
        Rule::new(Granularity::FixedDuration(7 * DAY as u64), Quantity::Limited(2)),
        Rule::latest(2),
    ]));

    target.run(&MemorySink::new()).unwrap();
    let after_first = harness.remaining();
    let second = target.run(&MemorySink::new()).unwrap();

    assert!(second.prune.pruned.is_empty());
    assert_eq!(harness.remaining(), after_first);
}

#[test]
fn test_settings_driven_run() {
    let work = TempDir::new().unwrap();
    let target = work.path().join("db.sqlite");
    let backup = work.path().join("backup");
    fs::create_dir(&backup).unwrap();
    fs::write(&target, b"rows").unwrap();

    let json = format!(
        r#"{{
            "plans": {{"keep-two": [[null, 2]]}},
            "targets": [
                {{"target_path": {:?}, "backup_dir": {:?}, "retention_plan": "keep-two"}}
            ]
        }}"#,
        target, backup
    );
    let settings = Settings::from_json(&json).unwrap();
    let targets = settings.targets().unwrap();
    let summary = run_targets(&targets, &MemorySink::new());

    assert!(summary.all_succeeded());
    let names: Vec<_> = fs::read_dir(&backup)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.ends_with(".sqlite.lz4")));
    assert!(names.iter().any(|n| n == DIGEST_FILE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_pass_is_logged() {
        let harness = BackupHarness::new();
        daily_history(&harness, 4);

        BackupTarget::retention_only(harness.path())
            .policy(RetentionPolicy::new(vec![Rule::latest(1)]))
            .run(&TracingSink)
            .unwrap();

        assert!(logs_contain("Keep"));
        assert!(logs_contain("day03.db.lz4"));
        assert_eq!(harness.remaining(), vec!["day00.db.lz4"]);
    }

    #[test]
    fn test_target_failure_is_isolated() {
        let harness = BackupHarness::new();
        daily_history(&harness, 3);

        let targets = vec![
            BackupTarget::retention_only(harness.path().join("missing")),
            BackupTarget::retention_only(harness.path())
                .policy(RetentionPolicy::new(vec![Rule::latest(1)])),
        ];
        let summary = run_targets(&targets, &MemorySink::new());

        assert_eq!(summary.failed.len(), 1);
        assert!(matches!(summary.failed[0].1, HfbrError::CatalogAccess { .. }));
        assert_eq!(summary.completed.len(), 1);
        assert_eq!(harness.remaining(), vec!["day00.db.lz4"]);
    }
}
