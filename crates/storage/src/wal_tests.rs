// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use arche_core::test_support::sample_lab;
use std::io::Write as _;

fn lab_created(id: &str) -> Change {
    Change::LabCreated {
        lab: sample_lab(id),
    }
}

#[test]
fn append_assigns_increasing_sequences() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = Wal::open(&dir.path().join("events.wal")).unwrap();
    assert_eq!(wal.append(&lab_created("lab-1")).unwrap(), 1);
    assert_eq!(wal.append(&lab_created("lab-2")).unwrap(), 2);
    assert_eq!(wal.write_seq(), 2);
}

#[test]
fn entries_survive_reopen_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.wal");
    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&lab_created("lab-1")).unwrap();
        wal.append(&lab_created("lab-2")).unwrap();
        wal.flush().unwrap();
    }
    let wal = Wal::open(&path).unwrap();
    assert_eq!(wal.write_seq(), 2);
    let entries = wal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].seq, 2);
}

#[test]
fn unflushed_entries_are_not_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.wal");
    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&lab_created("lab-1")).unwrap();
        // dropped without flush
    }
    let wal = Wal::open(&path).unwrap();
    assert_eq!(wal.write_seq(), 0);
}

#[test]
fn entries_after_skips_processed_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.wal");
    let mut wal = Wal::open(&path).unwrap();
    for i in 0..5 {
        wal.append(&lab_created(&format!("lab-{i}"))).unwrap();
    }
    wal.flush().unwrap();
    let entries = wal.entries_after(3).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 4);
}

#[test]
fn corrupt_tail_is_rotated_preserving_valid_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.wal");
    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&lab_created("lab-1")).unwrap();
        wal.flush().unwrap();
    }
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"{this is not json\n").unwrap();
    }
    let wal = Wal::open(&path).unwrap();
    assert_eq!(wal.write_seq(), 1);
    assert_eq!(wal.entries_after(0).unwrap().len(), 1);
    assert!(path.with_extension("bak").exists());
}

#[test]
fn truncate_through_drops_checkpointed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.wal");
    let mut wal = Wal::open(&path).unwrap();
    for i in 0..4 {
        wal.append(&lab_created(&format!("lab-{i}"))).unwrap();
    }
    wal.flush().unwrap();
    wal.truncate_through(2).unwrap();
    let entries = wal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 3);
    // appends continue from the old sequence
    assert_eq!(wal.append(&lab_created("lab-9")).unwrap(), 5);
}
