//! Periodic release/expiry pass.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::content::{ContentService, ContentServiceError, ScheduledRun};

/// Run one pass at `now` and log what happened.
pub async fn run_once(
    service: &ContentService,
    now: OffsetDateTime,
) -> Result<ScheduledRun, ContentServiceError> {
    let run = service.publish_scheduled(now).await?;
    if !run.is_empty() {
        info!(
            published = run.published.len(),
            unpublished = run.unpublished.len(),
            refused = run.refused.len(),
            "Scheduled publishing pass finished"
        );
    }
    Ok(run)
}

/// Spawn the pass on an interval. The first tick is skipped so start-up does
/// not race the initial cache warm-up.
pub fn spawn_scheduler(service: ContentService, cadence: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = run_once(&service, OffsetDateTime::now_utc()).await {
                error!(error = %err, "Scheduled publishing pass failed");
            }
        }
    })
}
