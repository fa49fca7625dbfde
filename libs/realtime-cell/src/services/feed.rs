use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    ChangeAction, ChangeCollection, ConnectionStatus, RealtimeError, ScheduleEvent,
};
use crate::services::bridge::ScheduleSyncBridge;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const PAGE_LIMIT: usize = 100;

/// Doubling backoff, capped.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

fn parse_timestamp(row: &Value, field: &str) -> Option<DateTime<Utc>> {
    row.get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_therapist_id(row: &Value) -> Option<Uuid> {
    row.get("therapist_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Drives the bridge from the store: polls the watched collections'
/// `updated_at` cursors, translates changed rows into `ScheduleEvent`s and
/// owns the reconnect loop. Store failures surface as bridge status, never
/// as errors thrown at subscribers.
pub struct StoreChangeFeed {
    supabase: SupabaseClient,
    bridge: Arc<ScheduleSyncBridge>,
    poll_interval: Duration,
    cursors: HashMap<ChangeCollection, DateTime<Utc>>,
}

impl StoreChangeFeed {
    pub fn new(config: &AppConfig, bridge: Arc<ScheduleSyncBridge>) -> Self {
        let started_at = Utc::now();
        let cursors = ChangeCollection::all()
            .into_iter()
            .map(|collection| (collection, started_at))
            .collect();

        Self {
            supabase: SupabaseClient::new(config),
            bridge,
            poll_interval: config
                .realtime_poll_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            cursors,
        }
    }

    /// Start observing from a fixed point instead of "now".
    pub fn since(mut self, timestamp: DateTime<Utc>) -> Self {
        for cursor in self.cursors.values_mut() {
            *cursor = timestamp;
        }
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// One pass over all watched collections. Returns the number of events
    /// fanned out; advances cursors per collection as it goes.
    pub async fn poll_once(&mut self) -> Result<usize, RealtimeError> {
        let mut published = 0;

        for collection in ChangeCollection::all() {
            let cursor = self.cursors[&collection];
            let path = format!(
                "/rest/v1/{}?updated_at=gt.{}&order=updated_at.asc&limit={}",
                collection.table(),
                cursor.to_rfc3339_opts(SecondsFormat::Micros, true),
                PAGE_LIMIT
            );

            let rows: Vec<Value> = self.supabase.request(
                Method::GET,
                &path,
                None,
                None,
            ).await?;

            for row in rows {
                let Some(updated_at) = parse_timestamp(&row, "updated_at") else {
                    debug!("Skipping {} row without updated_at", collection);
                    continue;
                };

                let action = match parse_timestamp(&row, "created_at") {
                    Some(created_at) if created_at == updated_at => ChangeAction::Created,
                    _ => ChangeAction::Updated,
                };

                let event = ScheduleEvent::new(collection, action, parse_therapist_id(&row), row);
                self.bridge.publish(event).await;
                published += 1;

                let cursor = self.cursors.get_mut(&collection);
                if let Some(cursor) = cursor {
                    if updated_at > *cursor {
                        *cursor = updated_at;
                    }
                }
            }
        }

        Ok(published)
    }

    /// Poll forever, reporting store health through the bridge status:
    /// `connected` while polls succeed, `disconnected` then `reconnecting`
    /// with capped doubling backoff while they fail.
    pub async fn run(mut self) {
        info!("Store change feed starting, polling every {:?}", self.poll_interval);
        let mut backoff = BASE_BACKOFF;

        loop {
            match self.poll_once().await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Fanned out {} change events", count);
                    }
                    backoff = BASE_BACKOFF;
                    self.bridge.set_status(ConnectionStatus::Connected).await;
                    sleep(self.poll_interval).await;
                }
                Err(err) => {
                    warn!("Change feed poll failed: {}", err);
                    if self.bridge.status().await == ConnectionStatus::Connected {
                        self.bridge.set_status(ConnectionStatus::Disconnected).await;
                    }
                    self.bridge.set_status(ConnectionStatus::Reconnecting).await;
                    sleep(backoff).await;
                    backoff = next_backoff(backoff, MAX_BACKOFF);
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let max = Duration::from_secs(60);
        let mut backoff = Duration::from_secs(1);

        let mut observed = Vec::new();
        for _ in 0..8 {
            backoff = next_backoff(backoff, max);
            observed.push(backoff.as_secs());
        }

        assert_eq!(observed, vec![2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn action_inference_from_row_timestamps() {
        let created = serde_json::json!({
            "created_at": "2025-03-10T09:00:00Z",
            "updated_at": "2025-03-10T09:00:00Z"
        });
        let updated = serde_json::json!({
            "created_at": "2025-03-10T09:00:00Z",
            "updated_at": "2025-03-10T10:00:00Z"
        });

        let created_at = parse_timestamp(&created, "created_at").unwrap();
        let updated_at = parse_timestamp(&created, "updated_at").unwrap();
        assert_eq!(created_at, updated_at);

        let updated_ts = parse_timestamp(&updated, "updated_at").unwrap();
        assert!(updated_ts > parse_timestamp(&updated, "created_at").unwrap());
    }
}
