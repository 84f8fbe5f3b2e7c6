//! Parameterised classification and resolution tests for `keystone-classify`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use keystone_classify::{
    classify_asset, classify_item, content_type, resolve, AssetClass, Classification,
    ConflictStrategy, Resolution, Side,
};
use keystone_core::types::FileState;
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

fn state(offset_secs: i64, hash: &str) -> FileState {
    FileState::present(t0() + Duration::seconds(offset_secs), hash)
}

// ---------------------------------------------------------------------------
// Item classification
// ---------------------------------------------------------------------------

#[rstest]
#[case(0, 0)]
#[case(0, 3600)]
#[case(3600, 0)]
#[case(-86_400, 86_400)]
fn equal_hashes_are_unchanged_regardless_of_mtime(#[case] local_off: i64, #[case] remote_off: i64) {
    let local = state(local_off, "h1");
    let remote = state(remote_off, "h1");
    assert_eq!(classify_item(&local, &remote), Classification::Unchanged);
}

#[test]
fn one_sided_paths() {
    let present = state(0, "h1");
    let missing = FileState::missing();
    assert_eq!(classify_item(&present, &missing), Classification::LocalOnly);
    assert_eq!(classify_item(&missing, &present), Classification::RemoteOnly);
    assert_eq!(classify_item(&missing, &missing), Classification::Unchanged);
}

#[test]
fn differing_hashes_conflict() {
    assert_eq!(
        classify_item(&state(0, "h1"), &state(10, "h2")),
        Classification::Conflict
    );
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[rstest]
#[case(ConflictStrategy::RemoteWins, 10, 0, Resolution::TakeRemote)]
#[case(ConflictStrategy::RemoteWins, 0, 10, Resolution::TakeRemote)]
#[case(ConflictStrategy::LocalWins, 0, 10, Resolution::TakeLocal)]
#[case(ConflictStrategy::NewestWins, 0, 10, Resolution::TakeRemote)]
#[case(ConflictStrategy::NewestWins, 10, 0, Resolution::TakeLocal)]
#[case(ConflictStrategy::NewestWins, 5, 5, Resolution::TakeLocal)]
#[case(ConflictStrategy::BackupBoth, 0, 10, Resolution::BackupBoth { winner: Side::Remote })]
#[case(ConflictStrategy::BackupBoth, 5, 5, Resolution::BackupBoth { winner: Side::Local })]
#[case(ConflictStrategy::Manual, 0, 10, Resolution::Unresolved)]
fn resolution_table(
    #[case] strategy: ConflictStrategy,
    #[case] local_off: i64,
    #[case] remote_off: i64,
    #[case] expected: Resolution,
) {
    let local = state(local_off, "h1");
    let remote = state(remote_off, "h2");
    assert_eq!(resolve(&local, &remote, strategy), expected);
}

#[test]
fn resolution_winner() {
    assert_eq!(Resolution::TakeLocal.winner(), Some(Side::Local));
    assert_eq!(
        Resolution::BackupBoth {
            winner: Side::Remote
        }
        .winner(),
        Some(Side::Remote)
    );
    assert_eq!(Resolution::Unresolved.winner(), None);
}

// ---------------------------------------------------------------------------
// Static assets
// ---------------------------------------------------------------------------

#[rstest]
#[case("app.css", AssetClass::Cacheable)]
#[case("js/app.JS", AssetClass::Cacheable)]
#[case("index.html", AssetClass::Cacheable)]
#[case("robots.txt", AssetClass::Cacheable)]
#[case("icons/logo.svg", AssetClass::Cacheable)]
#[case("logo.png", AssetClass::StorageOnly)]
#[case("video.mp4", AssetClass::StorageOnly)]
#[case("fonts/inter.woff2", AssetClass::StorageOnly)]
#[case("archive.unknownext", AssetClass::StorageOnly)]
#[case("Makefile", AssetClass::StorageOnly)]
fn asset_classes(#[case] path: &str, #[case] expected: AssetClass) {
    assert_eq!(classify_asset(path), expected);
}

#[test]
fn content_types_for_cacheable_assets() {
    assert_eq!(content_type("a.css"), Some("text/css"));
    assert_eq!(content_type("A.HTM"), Some("text/html"));
    assert_eq!(content_type("logo.png"), None);
}
