//! Transfer-event fan-out. The stream is an opaque collaborator: the ledger
//! publishes, SSE subscribers consume, and slow subscribers lose events
//! rather than applying backpressure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    pub amount: i64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StreamHub {
    sender: broadcast::Sender<TransferEvent>,
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Fan an event out to current subscribers. Dropped silently when
    /// nobody is listening.
    pub fn publish(&self, event: TransferEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.sender.subscribe()
    }

    /// Emit synthetic transfers on an interval until the returned handle is
    /// aborted. Demo aid behind `QAZNA_STREAM_DEMO`.
    pub fn start_demo(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let corridors = [
                ("astana-hub", "almaty-hub"),
                ("almaty-hub", "tashkent-hub"),
                ("tashkent-hub", "astana-hub"),
            ];
            let mut ticker = tokio::time::interval(period);
            let mut step: usize = 0;
            loop {
                ticker.tick().await;
                let (from, to) = corridors[step % corridors.len()];
                hub.publish(TransferEvent {
                    from: from.to_string(),
                    to: to.to_string(),
                    amount: 1_000 + (step as i64 * 757) % 50_000,
                    currency: "QZN".to_string(),
                    timestamp: Utc::now(),
                });
                step = step.wrapping_add(1);
            }
        })
    }
}
