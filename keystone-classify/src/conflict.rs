//! Diff classification and conflict resolution.

use keystone_core::types::{Classification, ConflictStrategy, FileState, Resolution, Side};

/// Classify a path from its local and remote states.
///
/// Equal hashes are `Unchanged` regardless of mtime skew; a pair with
/// differing (or unknown) hashes on both sides is a `Conflict`.
pub fn classify_item(local: &FileState, remote: &FileState) -> Classification {
    match (local.exists, remote.exists) {
        (false, false) => Classification::Unchanged,
        (true, false) => Classification::LocalOnly,
        (false, true) => Classification::RemoteOnly,
        (true, true) => match (&local.hash, &remote.hash) {
            (Some(l), Some(r)) if l == r => Classification::Unchanged,
            _ => Classification::Conflict,
        },
    }
}

/// The side with the strictly newer mtime. An exact tie, or missing mtimes,
/// favour the local side.
pub fn newer_side(local: &FileState, remote: &FileState) -> Side {
    match (local.mtime, remote.mtime) {
        (Some(l), Some(r)) if r > l => Side::Remote,
        (None, Some(_)) => Side::Remote,
        _ => Side::Local,
    }
}

/// Decide what to do with a conflicting pair.
pub fn resolve(local: &FileState, remote: &FileState, strategy: ConflictStrategy) -> Resolution {
    match strategy {
        ConflictStrategy::RemoteWins => Resolution::TakeRemote,
        ConflictStrategy::LocalWins => Resolution::TakeLocal,
        ConflictStrategy::NewestWins => match newer_side(local, remote) {
            Side::Local => Resolution::TakeLocal,
            Side::Remote => Resolution::TakeRemote,
        },
        ConflictStrategy::BackupBoth => Resolution::BackupBoth {
            winner: newer_side(local, remote),
        },
        ConflictStrategy::Manual => Resolution::Unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn missing_hash_on_one_side_is_a_conflict() {
        let now = Utc::now();
        let local = FileState::present(now, "abc");
        let remote = FileState {
            exists: true,
            mtime: Some(now),
            hash: None,
        };
        assert_eq!(classify_item(&local, &remote), Classification::Conflict);
    }

    #[test]
    fn tie_goes_to_local() {
        let now = Utc::now();
        let local = FileState::present(now, "a");
        let remote = FileState::present(now, "b");
        assert_eq!(newer_side(&local, &remote), Side::Local);
        assert_eq!(
            resolve(&local, &remote, ConflictStrategy::NewestWins),
            Resolution::TakeLocal
        );
    }

    #[test]
    fn backup_both_follows_newest_rule() {
        let now = Utc::now();
        let local = FileState::present(now, "a");
        let remote = FileState::present(now + Duration::seconds(1), "b");
        assert_eq!(
            resolve(&local, &remote, ConflictStrategy::BackupBoth),
            Resolution::BackupBoth {
                winner: Side::Remote
            }
        );
    }
}
