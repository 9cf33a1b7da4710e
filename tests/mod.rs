//! Main test module for hfbr
//!
//! This module includes all test suites:
//! - Integration tests for complete backup passes
//! - Property-based tests for retention invariants

pub mod integration;

#[cfg(test)]
mod edge_cases {
    use ::hfbr::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_backup_dir() {
        let temp_dir = TempDir::new().unwrap();
        let sink = MemorySink::new();

        let report = BackupTarget::retention_only(temp_dir.path())
            .policy(RetentionPolicy::new(vec![Rule::latest(3)]))
            .run(&sink)
            .unwrap();

        assert_eq!(report.evaluation.kept, 0);
        assert!(report.prune.kept.is_empty());
        assert!(report.prune.pruned.is_empty());
    }

    #[test]
    fn test_foreign_files_are_never_touched() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["last_hash", "notes.txt", "archive.lz4.bak", ".lz4"] {
            fs::write(temp_dir.path().join(name), b"keep me").unwrap();
        }
        fs::create_dir(temp_dir.path().join("dir.lz4")).unwrap();
        fs::write(temp_dir.path().join("20240101-0000.db.lz4"), b"x").unwrap();

        let report = BackupTarget::retention_only(temp_dir.path())
            .policy(RetentionPolicy::new(vec![Rule::latest(0)]))
            .run(&MemorySink::new())
            .unwrap();

        assert_eq!(report.prune.pruned.len(), 1);
        for name in ["last_hash", "notes.txt", "archive.lz4.bak", ".lz4", "dir.lz4"] {
            assert!(temp_dir.path().join(name).exists(), "{name} was removed");
        }
    }

    #[test]
    fn test_empty_target_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("empty.log");
        fs::write(&file, b"").unwrap();

        let outcome = ChangeGuard::new(&file, temp_dir.path())
            .run(&MemorySink::new())
            .unwrap();
        let snapshot = outcome.snapshot().unwrap();
        assert!(snapshot.exists());
        assert!(snapshot.to_string_lossy().ends_with(".log.lz4"));
    }

    #[test]
    fn test_pin_of_missing_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let snap = temp_dir.path().join("20240101-0000.db.lz4");
        fs::write(&snap, b"x").unwrap();
        set_file_mtime(&snap, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

        let report = BackupTarget::retention_only(temp_dir.path())
            .policy(RetentionPolicy::new(vec![Rule::latest(1)]))
            .pin("19990101-0000.db.lz4")
            .run(&MemorySink::new())
            .unwrap();

        assert_eq!(report.prune.kept, vec![snap]);
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..5 {
            let path = temp_dir.path().join(format!("s{i}.lz4"));
            fs::write(&path, b"x").unwrap();
            set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000 + i * 60, 0)).unwrap();
        }

        let sink = MemorySink::new();
        let report = BackupTarget::retention_only(temp_dir.path())
            .policy(RetentionPolicy::new(vec![Rule::latest(2)]))
            .mode(PruneMode::DryRun)
            .run(&sink)
            .unwrap();

        assert!(report.prune.dry_run);
        assert_eq!(report.prune.pruned.len(), 3);
        assert_eq!(sink.pruned().len(), 3);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 5);
    }
}
