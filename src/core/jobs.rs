//! Polling loop for asynchronous generation jobs.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::api::client::ApiClient;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polling stops after this many attempts (~5 minutes) so a job the backend
/// lost can never pin a task forever.
pub const MAX_POLL_ATTEMPTS: u32 = 150;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent {
    Resolved { generation_id: String, url: String },
    GaveUp { generation_id: String },
}

/// Poll one generation job until its result URL appears: one immediate poll,
/// then a fixed interval. Failed polls count as "not ready yet". Pollers for
/// distinct generation ids are independent of each other and of the stream.
pub fn spawn_job_poll(api: ApiClient, generation_id: String, tx: mpsc::UnboundedSender<JobEvent>) {
    spawn_job_poll_with(api, generation_id, tx, POLL_INTERVAL, MAX_POLL_ATTEMPTS)
}

pub fn spawn_job_poll_with(
    api: ApiClient,
    generation_id: String,
    tx: mpsc::UnboundedSender<JobEvent>,
    interval: Duration,
    max_attempts: u32,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        for _ in 0..max_attempts {
            ticker.tick().await;
            if let Some(status) = api.get_job_status(&generation_id).await {
                if let Some(url) = status.url {
                    let _ = tx.send(JobEvent::Resolved { generation_id, url });
                    return;
                }
            }
        }
        tracing::warn!("generation {generation_id} never resolved, giving up");
        let _ = tx.send(JobEvent::GaveUp { generation_id });
    });
}
