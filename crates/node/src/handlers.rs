//! Inbound stream handlers.
//!
//! Responders answer a fixed-size request with the object or the single byte
//! `NO_DATA`. Announcement handlers pull what they lack over the announcing
//! stream, falling back to fetching from all peers, then store it and announce
//! it onward to everyone but the source.

use meridian_network::IncomingStream;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::protocols::{
    BLK_ANN_PROTOCOL, BLK_HEIGHT_PROTOCOL, BLK_PROTOCOL, TX_ANN_PROTOCOL, TX_PROTOCOL,
};
use crate::Node;

mod block;
mod tx;

impl Node {
    /// Serves an inbound stream on its own task.
    pub fn handle_stream(&self, incoming: IncomingStream) {
        let node = self.clone();

        drop(tokio::spawn(async move {
            node.dispatch(incoming).await;
        }));
    }

    async fn dispatch(self, incoming: IncomingStream) {
        let IncomingStream {
            peer,
            protocol,
            mut stream,
        } = incoming;

        let result = match protocol.as_ref() {
            TX_PROTOCOL => self.serve_tx(&mut stream).await,
            TX_ANN_PROTOCOL => self.handle_tx_ann(peer, &mut stream).await,
            BLK_PROTOCOL => self.serve_blk(&mut stream).await,
            BLK_HEIGHT_PROTOCOL => self.serve_blk_by_height(&mut stream).await,
            BLK_ANN_PROTOCOL => self.handle_blk_ann(peer, &mut stream).await,
            _ => {
                debug!(%peer, %protocol, "Ignoring stream for unknown protocol");
                Ok(())
            }
        };

        if let Err(err) = result {
            debug!(%peer, %protocol, %err, "Failed to handle stream");
        }

        let _ignored = stream.shutdown().await;
    }
}
