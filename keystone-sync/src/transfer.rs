//! TRANSFER phase: one unit copies one path in one direction, snapshotting
//! the destination first when asked.

use std::io::ErrorKind;

use keystone_core::Side;

use crate::diff::Sides;
use crate::error::{io_err, SyncError};
use crate::local::backup_path;
use crate::report::{BackupRecord, PlannedAction, TransferKind};

/// What one unit committed.
#[derive(Debug, Clone)]
pub(crate) struct Transferred {
    pub path: String,
    pub backup: Option<BackupRecord>,
    pub content: Vec<u8>,
}

/// Structured settings must parse before they are applied: JSON for
/// `.json`, YAML otherwise.
pub fn validate_settings(path: &str, bytes: &[u8]) -> Result<(), SyncError> {
    let invalid = |message: String| SyncError::Validation {
        path: path.to_string(),
        message,
    };
    if path.to_ascii_lowercase().ends_with(".json") {
        serde_json::from_slice::<serde_json::Value>(bytes)
            .map(drop)
            .map_err(|e| invalid(e.to_string()))
    } else {
        serde_yaml::from_slice::<serde_yaml::Value>(bytes)
            .map(drop)
            .map_err(|e| invalid(e.to_string()))
    }
}

async fn read_side(sides: &Sides, side: Side, path: &str) -> Result<Option<Vec<u8>>, SyncError> {
    match side {
        Side::Local => sides.local.read(path).await,
        Side::Remote => sides.backend.get(&sides.bucket, path).await,
    }
}

/// Copy the destination's current bytes to `<path>.backup-<stamp>` on the
/// same side. Nothing is recorded when the destination does not exist.
async fn snapshot(
    sides: &Sides,
    side: Side,
    path: &str,
    stamp: &str,
) -> Result<Option<BackupRecord>, SyncError> {
    let backup = match side {
        Side::Local => sides.local.backup(path, stamp).await?,
        Side::Remote => match sides.backend.get(&sides.bucket, path).await? {
            Some(bytes) => {
                let key = backup_path(path, stamp);
                sides.backend.put(&sides.bucket, &key, bytes).await?;
                Some(key)
            }
            None => None,
        },
    };
    Ok(backup.map(|backup| BackupRecord {
        side,
        original: path.to_string(),
        backup,
    }))
}

pub(crate) async fn transfer(
    sides: &Sides,
    action: &PlannedAction,
    stamp: &str,
    validate: bool,
) -> Result<Transferred, SyncError> {
    let path = action.path.as_str();
    let from = action.kind.source();
    let to = action.kind.destination();

    let content = read_side(sides, from, path).await?.ok_or_else(|| {
        io_err(
            path,
            std::io::Error::new(ErrorKind::NotFound, format!("{from} copy vanished before transfer")),
        )
    })?;
    if validate {
        validate_settings(path, &content)?;
    }

    let backup = if action.backup {
        snapshot(sides, to, path, stamp).await?
    } else {
        None
    };

    match action.kind {
        TransferKind::Pull => sides.local.write_atomic(path, &content).await?,
        TransferKind::Push => {
            sides
                .backend
                .put(&sides.bucket, path, content.clone())
                .await?
        }
    }
    tracing::debug!(path, kind = ?action.kind, backup = backup.is_some(), "transferred");

    Ok(Transferred {
        path: path.to_string(),
        backup,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("app.yaml", "debug: true\nport: 8080\n", true)]
    #[case("app.yml", "- a\n- b\n", true)]
    #[case("app.yaml", "key: [unclosed\n", false)]
    #[case("app.json", "{\"debug\": true}", true)]
    #[case("APP.JSON", "{\"debug\": }", false)]
    #[case("app.json", "debug: true", false)]
    fn settings_validation(#[case] path: &str, #[case] body: &str, #[case] ok: bool) {
        assert_eq!(validate_settings(path, body.as_bytes()).is_ok(), ok);
    }
}
