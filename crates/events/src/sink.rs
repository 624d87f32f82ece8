//! Destinations for grid progress events.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::event::GridEvent;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The subscriber went away; nothing further can be delivered.
    #[error("Progress subscriber disconnected")]
    Closed,

    #[error("Failed to deliver progress event: {0}")]
    Delivery(String),
}

/// Accepts the events of one run, in order.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn send(&self, event: GridEvent) -> Result<(), SinkError>;
}

/// Forwards events into an mpsc channel, typically drained by a WebSocket
/// writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<GridEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<GridEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<GridEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn send(&self, event: GridEvent) -> Result<(), SinkError> {
        self.sender.send(event).await.map_err(|_| {
            tracing::debug!("Progress channel closed, dropping event");
            SinkError::Closed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.send(GridEvent::image("/a.png", 1, None)).await.unwrap();
        sink.send(GridEvent::complete()).await.unwrap();

        assert_eq!(rx.recv().await, Some(GridEvent::image("/a.png", 1, None)));
        assert_eq!(rx.recv().await, Some(GridEvent::complete()));
    }

    #[tokio::test]
    async fn closed_receiver_reports_closed() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        let result = sink.send(GridEvent::complete()).await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }
}
