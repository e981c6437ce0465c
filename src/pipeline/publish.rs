// Dedup gate between admission and the edit/publish queue.
//
// Marking a URL published and enqueueing it happen in one storage
// transaction, so a URL is never marked without its queue entry. Two tasks
// admitting the same URL at once are serialized by storage; only the first
// enqueues. A failed publish leaves the candidate tracked, and the next
// refresh or crawl that admits it tries again.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::db::models::TweetSnapshot;
use crate::db::Database;

/// Hand an admitted candidate downstream exactly once.
///
/// Returns `true` when this call enqueued it. Either way the candidate
/// leaves the working set, since a published URL is never tracked again.
pub async fn promote(db: &dyn Database, snapshot: &TweetSnapshot) -> Result<bool> {
    let first = db
        .publish(snapshot)
        .await
        .context("Failed to hand candidate to the edit queue")?;

    if first {
        info!(
            id = %snapshot.id,
            url = %snapshot.url,
            growth_speed = snapshot.growth_speed,
            "Promoted candidate"
        );
    } else {
        debug!(url = %snapshot.url, "Already published, skipping hand-off");
    }

    db.delete_snapshot(&snapshot.id).await?;
    Ok(first)
}
