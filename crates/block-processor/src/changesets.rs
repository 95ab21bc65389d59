//! Per-block changeset fan-out.
//!
//! One producer feeds a bounded queue; a forwarding task copies every
//! changeset to each subscriber. Dropping the producer closes every
//! subscriber queue once the backlog is forwarded.

use meridian_store::state::Changeset;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) const CHANGESET_QUEUE_SIZE: usize = 1_000;

#[derive(Debug, Default)]
pub(crate) struct ChangesetFanout {
    subscribers: Vec<(&'static str, mpsc::Sender<Changeset>)>,
}

impl ChangesetFanout {
    pub(crate) fn subscribe(&mut self, name: &'static str) -> mpsc::Receiver<Changeset> {
        let (tx, rx) = mpsc::channel(CHANGESET_QUEUE_SIZE);
        self.subscribers.push((name, tx));
        rx
    }

    /// Starts forwarding. The returned task ends after the producer is
    /// dropped and the queue is drained.
    pub(crate) fn start(self) -> (mpsc::Sender<Changeset>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Changeset>(CHANGESET_QUEUE_SIZE);
        let mut subscribers = self.subscribers;

        let task = tokio::spawn(async move {
            let mut forwarded = 0_usize;

            while let Some(changeset) = rx.recv().await {
                forwarded = forwarded.saturating_add(1);

                let mut closed = Vec::new();
                for (idx, (name, subscriber)) in subscribers.iter().enumerate() {
                    if subscriber.send(changeset.clone()).await.is_err() {
                        warn!(%name, "Changeset subscriber went away");
                        closed.push(idx);
                    }
                }

                for idx in closed.into_iter().rev() {
                    drop(subscribers.swap_remove(idx));
                }
            }

            debug!(forwarded, "Changeset fan-out drained");
        });

        (tx, task)
    }
}
