//! Unit tests for backup archive naming and name parsing.

use std::path::Path;

use chrono::NaiveDate;
use server_warden::models::backup::{artifact_file_name, ArtifactPattern};

fn stamp(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, s)
        .unwrap()
}

#[test]
fn file_name_embeds_creation_time() {
    let name = artifact_file_name("enshrouded_backup", stamp(2024, 3, 9, 7, 5, 1));
    assert_eq!(name, "enshrouded_backup_20240309_070501.zip");
}

#[test]
fn generated_names_parse_back_to_creation_time() {
    let created = stamp(2023, 12, 31, 23, 59, 59);
    let pattern = ArtifactPattern::new("backup").unwrap();
    let name = artifact_file_name("backup", created);

    let artifact = pattern
        .parse(&Path::new("/backups").join(&name))
        .expect("parseable");

    assert_eq!(artifact.created_at, created);
    assert_eq!(artifact.path, Path::new("/backups").join(name));
}

#[test]
fn malformed_or_foreign_names_do_not_parse() {
    let pattern = ArtifactPattern::new("backup").unwrap();
    let rejected = [
        "backup_2024_01.zip",
        "backup_20241301_000000.zip",
        "backup_20240101_000000.tar",
        "other_20240101_000000.zip",
        "backup_20240101_000000.zip.partial",
        "xbackup_20240101_000000.zip",
    ];
    for name in rejected {
        assert!(pattern.parse(Path::new(name)).is_none(), "parsed {name}");
    }
}

#[test]
fn regex_metacharacters_in_prefix_are_literal() {
    let pattern = ArtifactPattern::new("world.1+").unwrap();

    assert!(pattern
        .parse(Path::new("world.1+_20240101_000000.zip"))
        .is_some());
    assert!(pattern
        .parse(Path::new("worldx11_20240101_000000.zip"))
        .is_none());
}
