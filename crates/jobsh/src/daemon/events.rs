//! Typed daemon events.
//!
//! Events are published by the owner loop after a mutation has been applied
//! and persisted. Subscribers see them in publish order; a subscriber that
//! falls behind loses the oldest events and is told how many.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::jobs::JobStatus;
use crate::registry::ExecutionStatus;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    JobAdded {
        job_id: String,
        name: String,
    },
    JobStarted {
        job_id: String,
        execution_id: String,
        attempt: u32,
        pid: Option<u32>,
    },
    JobCompleted {
        job_id: String,
        execution_id: String,
        status: ExecutionStatus,
        job_status: JobStatus,
        exit_code: Option<i32>,
        duration_ms: Option<u64>,
    },
    JobStopped {
        job_id: String,
        execution_id: String,
    },
    JobRemoved {
        job_id: String,
    },
}

impl DaemonEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobAdded { .. } => "job_added",
            Self::JobStarted { .. } => "job_started",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobStopped { .. } => "job_stopped",
            Self::JobRemoved { .. } => "job_removed",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::JobAdded { job_id, .. }
            | Self::JobStarted { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobStopped { job_id, .. }
            | Self::JobRemoved { job_id } => job_id,
        }
    }
}

/// Fan-out channel for [`DaemonEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish to current subscribers. Having none is fine.
    pub fn publish(&self, event: DaemonEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Attach a subscriber that logs each event at INFO. The task ends when
    /// the bus is dropped.
    pub fn spawn_logger(&self) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event logger fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn log_event(event: &DaemonEvent) {
    match event {
        DaemonEvent::JobAdded { job_id, name } => info!(%job_id, %name, "job added"),
        DaemonEvent::JobStarted {
            job_id,
            execution_id,
            attempt,
            pid,
        } => info!(%job_id, %execution_id, attempt, pid, "job started"),
        DaemonEvent::JobCompleted {
            job_id,
            execution_id,
            status,
            job_status,
            exit_code,
            duration_ms,
        } => info!(
            %job_id,
            %execution_id,
            status = %status,
            job_status = %job_status,
            exit_code,
            duration_ms,
            "job completed"
        ),
        DaemonEvent::JobStopped {
            job_id,
            execution_id,
        } => info!(%job_id, %execution_id, "job stopped"),
        DaemonEvent::JobRemoved { job_id } => info!(%job_id, "job removed"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(DaemonEvent::JobAdded {
            job_id: "job-1".into(),
            name: "a".into(),
        });
        bus.publish(DaemonEvent::JobRemoved {
            job_id: "job-1".into(),
        });
        assert_eq!(rx.recv().await.unwrap().event_type(), "job_added");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "job_removed");
        assert_eq!(second.job_id(), "job-1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(DaemonEvent::JobRemoved {
            job_id: "job-x".into(),
        });
        let logger = bus.spawn_logger();
        assert_eq!(bus.subscriber_count(), 1);
        drop(bus);
        logger.await.unwrap();
    }
}
