use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of persisted events, one channel per worker or project id.
/// A calendar view subscribes to a worker and recomputes its lanes on every event.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a worker or project. Creates the channel if needed.
    pub fn subscribe(&self, id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Fan a persisted event out to every worker and project it touches.
    /// A move reaches both the old and the new owner.
    pub fn publish(&self, event: &Event) {
        for id in event.worker_ids().into_iter().chain(event.project_ids()) {
            self.send(id, event);
        }
    }

    /// Drop a channel once its worker or project is gone.
    pub fn remove(&self, id: &Ulid) {
        self.channels.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{day, Assignment, DateRange};

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let wid = Ulid::new();
        let mut rx = hub.subscribe(wid);

        let event = Event::WorkerDeleted { id: wid };
        hub.send(wid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let wid = Ulid::new();
        hub.send(wid, &Event::WorkerDeleted { id: wid });
    }

    #[tokio::test]
    async fn channels_are_per_id() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(b, &Event::WorkerDeleted { id: b });
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_reaches_both_sides_of_a_move() {
        let hub = NotifyHub::new();
        let (from, to, project) = (Ulid::new(), Ulid::new(), Ulid::new());
        let mut rx_from = hub.subscribe(from);
        let mut rx_to = hub.subscribe(to);
        let mut rx_project = hub.subscribe(project);

        let event = Event::AssignmentUpdated {
            assignment: Assignment {
                id: Ulid::new(),
                project_id: project,
                worker_id: to,
                range: DateRange::new(day("2024-01-01"), day("2024-01-02")),
            },
            previous_worker_id: from,
            previous_project_id: project,
        };
        hub.publish(&event);

        assert_eq!(rx_from.recv().await.unwrap(), event);
        assert_eq!(rx_to.recv().await.unwrap(), event);
        assert_eq!(rx_project.recv().await.unwrap(), event);
        // Same project before and after: one delivery, not two.
        assert!(rx_project.try_recv().is_err());
    }

    #[tokio::test]
    async fn project_events_skip_worker_channels() {
        let hub = NotifyHub::new();
        let worker = Ulid::new();
        let project = Ulid::new();
        let mut rx_worker = hub.subscribe(worker);
        let mut rx_project = hub.subscribe(project);

        hub.publish(&Event::ProjectDeleted { id: project });
        assert_eq!(
            rx_project.recv().await.unwrap(),
            Event::ProjectDeleted { id: project }
        );
        assert!(rx_worker.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_channel_closes_receivers() {
        let hub = NotifyHub::new();
        let wid = Ulid::new();
        let mut rx = hub.subscribe(wid);
        hub.remove(&wid);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
