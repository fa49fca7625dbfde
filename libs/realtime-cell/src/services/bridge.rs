use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::error::ConflictKind;

use crate::models::{
    BridgeConfig, ConflictRecord, ConnectionStatus, RealtimeError, ScheduleEvent,
    SyncNotification,
};

pub type EventSender = broadcast::Sender<ScheduleEvent>;
pub type EventReceiver = broadcast::Receiver<ScheduleEvent>;

/// Owned subscription handle. Dropping it (or calling `close`) stops
/// delivery immediately; the bridge prunes the emptied per-therapist
/// channel on its next publish. No global mutable registration slots.
pub struct ScheduleSubscription {
    receiver: EventReceiver,
    therapist_id: Option<Uuid>,
}

impl ScheduleSubscription {
    /// Next event, skipping over anything lost to channel lag. `None` once
    /// the bridge side is gone.
    pub async fn recv(&mut self) -> Option<ScheduleEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Subscription lagged, {} events dropped", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn therapist_id(&self) -> Option<Uuid> {
        self.therapist_id
    }

    pub fn close(self) {
        // Dropping the receiver is the whole deregistration.
    }
}

/// Fan-out layer over store change events. Not a source of truth: it keeps
/// bounded recent-history buffers for late joiners and broadcasts live
/// events to subscribers, but consumers always re-resolve availability
/// before acting.
pub struct ScheduleSyncBridge {
    config: BridgeConfig,
    global_sender: EventSender,
    channels: RwLock<HashMap<Uuid, EventSender>>,
    events: RwLock<VecDeque<ScheduleEvent>>,
    conflicts: RwLock<VecDeque<ConflictRecord>>,
    notifications: RwLock<VecDeque<SyncNotification>>,
    status: RwLock<ConnectionStatus>,
    status_sender: broadcast::Sender<ConnectionStatus>,
}

impl Default for ScheduleSyncBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl ScheduleSyncBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (global_sender, _) = broadcast::channel(config.channel_capacity);
        let (status_sender, _) = broadcast::channel(16);

        Self {
            config,
            global_sender,
            channels: RwLock::new(HashMap::new()),
            events: RwLock::new(VecDeque::new()),
            conflicts: RwLock::new(VecDeque::new()),
            notifications: RwLock::new(VecDeque::new()),
            status: RwLock::new(ConnectionStatus::Disconnected),
            status_sender,
        }
    }

    // ----- subscriptions ------------------------------------------------------

    /// Subscribe to the global firehose, or to one therapist's events.
    pub async fn subscribe(&self, filter: Option<Uuid>) -> ScheduleSubscription {
        let receiver = match filter {
            None => self.global_sender.subscribe(),
            Some(therapist_id) => {
                let mut channels = self.channels.write().await;
                let sender = channels.entry(therapist_id).or_insert_with(|| {
                    debug!("Creating channel for therapist {}", therapist_id);
                    broadcast::channel(self.config.channel_capacity).0
                });
                sender.subscribe()
            }
        };

        ScheduleSubscription {
            receiver,
            therapist_id: filter,
        }
    }

    /// Push an event into the recent buffer and fan it out to the global
    /// channel plus the matching per-therapist channel.
    pub async fn publish(&self, event: ScheduleEvent) {
        {
            let mut events = self.events.write().await;
            events.push_back(event.clone());
            while events.len() > self.config.event_buffer_size {
                events.pop_front();
            }
        }

        if let Some(therapist_id) = event.therapist_id {
            let mut channels = self.channels.write().await;
            if let Some(sender) = channels.get(&therapist_id) {
                if sender.receiver_count() == 0 {
                    debug!("Pruning dead channel for therapist {}", therapist_id);
                    channels.remove(&therapist_id);
                } else if let Err(e) = sender.send(event.clone()) {
                    warn!("Failed to fan out event to therapist {}: {}", therapist_id, e);
                }
            }
        }

        // Global firehose; no subscribers is not an error.
        if self.global_sender.send(event.clone()).is_err() {
            debug!("No global subscribers for {} event", event.collection);
        }
    }

    /// Most recent events, oldest first.
    pub async fn recent_events(&self) -> Vec<ScheduleEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    pub async fn active_channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    // ----- conflicts ----------------------------------------------------------

    /// Record a detected conflict and raise a matching notification.
    /// Conflicts recoverable by resubmission get an auto-hide timer; an
    /// unreachable store stays on screen until dismissed.
    pub async fn record_conflict(
        &self,
        kind: ConflictKind,
        involved_appointment_ids: Vec<Uuid>,
        message: &str,
    ) -> ConflictRecord {
        let record = ConflictRecord::new(kind, involved_appointment_ids, message.to_string());
        info!("Conflict recorded: {} ({})", record.id, kind);

        {
            let mut conflicts = self.conflicts.write().await;
            conflicts.push_back(record.clone());
            while conflicts.len() > self.config.conflict_buffer_size {
                conflicts.pop_front();
            }
        }

        let auto_hide = if kind.is_recoverable_by_resubmit() {
            Some(10)
        } else {
            None
        };
        self.notify("Booking conflict", message, auto_hide).await;

        record
    }

    /// Mark a conflict resolved. Acknowledging an id the buffer no longer
    /// holds is a not-found, not a silent no-op.
    pub async fn acknowledge_conflict(&self, id: &Uuid) -> Result<ConflictRecord, RealtimeError> {
        let mut conflicts = self.conflicts.write().await;
        let record = conflicts
            .iter_mut()
            .find(|record| record.id == *id)
            .ok_or_else(|| RealtimeError::NotFound(format!("Conflict {} not found", id)))?;

        record.resolved = true;
        debug!("Conflict {} acknowledged", id);
        Ok(record.clone())
    }

    /// All buffered conflicts, oldest first, resolved ones included.
    pub async fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.read().await.iter().cloned().collect()
    }

    pub async fn active_conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts
            .read()
            .await
            .iter()
            .filter(|record| !record.resolved)
            .cloned()
            .collect()
    }

    // ----- notifications ------------------------------------------------------

    pub async fn notify(
        &self,
        title: &str,
        body: &str,
        auto_hide_after_seconds: Option<u64>,
    ) -> SyncNotification {
        let notification = SyncNotification::new(title, body, auto_hide_after_seconds);

        let mut notifications = self.notifications.write().await;
        notifications.push_back(notification.clone());
        while notifications.len() > self.config.notification_buffer_size {
            notifications.pop_front();
        }

        notification
    }

    /// Live notifications, oldest first. Expired auto-hide entries are
    /// pruned here rather than by a background timer.
    pub async fn notifications(&self) -> Vec<SyncNotification> {
        let now = Utc::now();
        let mut notifications = self.notifications.write().await;
        notifications.retain(|n| !n.is_expired(now));
        notifications.iter().cloned().collect()
    }

    pub async fn dismiss_notification(&self, id: &Uuid) -> Result<(), RealtimeError> {
        let mut notifications = self.notifications.write().await;
        let before = notifications.len();
        notifications.retain(|n| n.id != *id);

        if notifications.len() == before {
            return Err(RealtimeError::NotFound(format!(
                "Notification {} not found",
                id
            )));
        }
        Ok(())
    }

    // ----- connection status --------------------------------------------------

    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: ConnectionStatus) {
        let mut current = self.status.write().await;
        if *current != status {
            info!("Bridge status changing from {} to {}", *current, status);
            *current = status;
            let _ = self.status_sender.send(status);
        }
    }

    pub fn status_changes(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status_sender.subscribe()
    }
}
