//! Output channels for streamed command output.
//!
//! A channel is an ordered, append-only sink with exactly one consumer.
//! It is bounded; what happens when the consumer lags is chosen up front:
//! - `Backpressure`: the producer waits, which in turn stalls PTY reads
//! - `DropOldest`: the oldest undelivered chunks are discarded and counted
//!
//! A consumer that goes away never stops the producer; later sends are
//! simply discarded.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::job::ExecutionOutcome;

/// Event delivered to the consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Text chunk, either audit context or process output
    Data(String),
    /// Terminal event, always last
    Finished(ExecutionOutcome),
}

/// What to do when the consumer falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Backpressure,
    DropOldest,
}

#[derive(Clone)]
enum Sender {
    Bounded(mpsc::Sender<OutputEvent>),
    Ring(broadcast::Sender<OutputEvent>),
}

/// Producer side of an output channel.
#[derive(Clone)]
pub struct OutputChannel {
    sender: Sender,
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl OutputChannel {
    /// Create a channel holding at most `capacity` undelivered events.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> (OutputChannel, OutputReceiver) {
        let capacity = capacity.max(1);
        match policy {
            OverflowPolicy::Backpressure => {
                let (tx, rx) = mpsc::channel(capacity);
                (
                    OutputChannel {
                        sender: Sender::Bounded(tx),
                    },
                    OutputReceiver {
                        receiver: Receiver::Bounded(rx),
                        dropped: 0,
                    },
                )
            }
            OverflowPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(capacity);
                (
                    OutputChannel {
                        sender: Sender::Ring(tx),
                    },
                    OutputReceiver {
                        receiver: Receiver::Ring(rx),
                        dropped: 0,
                    },
                )
            }
        }
    }

    /// Backpressure channel.
    pub fn bounded(capacity: usize) -> (OutputChannel, OutputReceiver) {
        Self::new(capacity, OverflowPolicy::Backpressure)
    }

    /// Channel whose consumer is already gone. Useful for fire-and-forget
    /// callers.
    pub fn discard() -> OutputChannel {
        let (channel, _receiver) = Self::bounded(1);
        channel
    }

    /// Send an event. Returns `false` when the consumer is gone.
    pub async fn send(&self, event: OutputEvent) -> bool {
        match &self.sender {
            Sender::Bounded(tx) => tx.send(event).await.is_ok(),
            Sender::Ring(tx) => tx.send(event).is_ok(),
        }
    }

    /// Send a text chunk.
    pub async fn data(&self, text: impl Into<String>) -> bool {
        self.send(OutputEvent::Data(text.into())).await
    }

    /// Send the terminal event.
    pub async fn finish(&self, outcome: ExecutionOutcome) -> bool {
        self.send(OutputEvent::Finished(outcome)).await
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        match &self.sender {
            Sender::Bounded(tx) => tx.is_closed(),
            Sender::Ring(tx) => tx.receiver_count() == 0,
        }
    }
}

enum Receiver {
    Bounded(mpsc::Receiver<OutputEvent>),
    Ring(broadcast::Receiver<OutputEvent>),
}

/// Consumer side of an output channel.
pub struct OutputReceiver {
    receiver: Receiver,
    dropped: u64,
}

impl OutputReceiver {
    /// Next event, or `None` once every producer is gone and the buffer is
    /// drained.
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        match &mut self.receiver {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Ring(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        self.dropped += skipped;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Number of events discarded by the `DropOldest` policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drain until the channel closes or a `Finished` event arrives.
    pub async fn collect(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let finished = matches!(event, OutputEvent::Finished(_));
            events.push(event);
            if finished {
                break;
            }
        }
        events
    }
}

/// Concatenated text of all `Data` events.
pub fn text_of(events: &[OutputEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            OutputEvent::Data(text) => Some(text.as_str()),
            OutputEvent::Finished(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ordered_delivery() {
        let (channel, mut receiver) = OutputChannel::bounded(8);
        assert!(channel.data("one").await);
        assert!(channel.data("two").await);
        assert!(channel.finish(ExecutionOutcome::Succeeded).await);

        let events = receiver.collect().await;
        assert_eq!(text_of(&events), "onetwo");
        assert_eq!(
            events.last(),
            Some(&OutputEvent::Finished(ExecutionOutcome::Succeeded))
        );
    }

    #[tokio::test]
    async fn test_backpressure_waits_for_consumer() {
        let (channel, mut receiver) = OutputChannel::bounded(1);
        assert!(channel.data("first").await);

        let producer = tokio::spawn({
            let channel = channel.clone();
            async move { channel.data("second").await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        assert_eq!(receiver.recv().await, Some(OutputEvent::Data("first".into())));
        assert!(producer.await.unwrap());
        assert_eq!(receiver.recv().await, Some(OutputEvent::Data("second".into())));
    }

    #[tokio::test]
    async fn test_drop_oldest_counts_losses() {
        let (channel, mut receiver) = OutputChannel::new(2, OverflowPolicy::DropOldest);
        for i in 0..5 {
            assert!(channel.data(format!("{i}")).await);
        }
        drop(channel);

        let mut seen = Vec::new();
        while let Some(OutputEvent::Data(text)) = receiver.recv().await {
            seen.push(text);
        }
        assert_eq!(seen, vec!["3".to_string(), "4".to_string()]);
        assert_eq!(receiver.dropped(), 3);
    }

    #[tokio::test]
    async fn test_send_after_consumer_left() {
        let (channel, receiver) = OutputChannel::bounded(4);
        drop(receiver);
        assert!(channel.is_closed());
        assert!(!channel.data("lost").await);

        let ring = OutputChannel::discard();
        assert!(!ring.data("lost").await);
    }
}
