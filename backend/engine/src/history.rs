//! Append-only audit trail.
//!
//! Writes happen after the core transaction commits: a failed history append
//! must not roll back a successful payment application, but it is surfaced
//! to operators through the log.

use sqlx::SqlitePool;
use tracing::error;

use crate::db;

/// One recorded change, written alongside a state mutation.
pub struct Change<'a> {
    pub change_type: &'a str,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub note: Option<String>,
}

impl<'a> Change<'a> {
    pub fn status(change_type: &'a str, old: &str, new: &str) -> Self {
        Change {
            change_type,
            old_value: Some(old.to_string()),
            new_value: Some(new.to_string()),
            note: None,
        }
    }

    pub fn noted(change_type: &'a str, note: impl Into<String>) -> Self {
        Change {
            change_type,
            old_value: None,
            new_value: None,
            note: Some(note.into()),
        }
    }
}

/// Best-effort append of a batch of changes for one proposal.
pub async fn append(
    pool: &SqlitePool,
    proposal_id: &str,
    actor_id: &str,
    actor_role: &str,
    changes: &[Change<'_>],
) {
    for change in changes {
        let result: crate::errors::Result<()> = async {
            let mut conn = pool.acquire().await?;
            db::insert_history(
                &mut conn,
                proposal_id,
                actor_id,
                actor_role,
                change.change_type,
                change.old_value.as_deref(),
                change.new_value.as_deref(),
                change.note.as_deref(),
            )
            .await
        }
        .await;

        if let Err(e) = result {
            error!(
                proposal_id,
                change_type = change.change_type,
                "history append failed: {e}"
            );
        }
    }
}
