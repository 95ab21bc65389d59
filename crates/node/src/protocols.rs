//! Stream protocol identifiers of the sync protocol.

use libp2p::StreamProtocol;

pub const TX_PROTOCOL: &str = "/meridian/tx/1.0.0";
pub const TX_ANN_PROTOCOL: &str = "/meridian/tx-ann/1.0.0";
pub const BLK_PROTOCOL: &str = "/meridian/blk/1.0.0";
pub const BLK_HEIGHT_PROTOCOL: &str = "/meridian/blk-height/1.0.0";
pub const BLK_ANN_PROTOCOL: &str = "/meridian/blk-ann/1.0.0";

/// Transaction by hash.
pub const TX: StreamProtocol = StreamProtocol::new(TX_PROTOCOL);
/// Transaction advertisement.
pub const TX_ANN: StreamProtocol = StreamProtocol::new(TX_ANN_PROTOCOL);
/// Block by hash.
pub const BLK: StreamProtocol = StreamProtocol::new(BLK_PROTOCOL);
/// Block by height.
pub const BLK_HEIGHT: StreamProtocol = StreamProtocol::new(BLK_HEIGHT_PROTOCOL);
/// Committed block advertisement.
pub const BLK_ANN: StreamProtocol = StreamProtocol::new(BLK_ANN_PROTOCOL);

/// Every protocol the node serves.
pub const ALL: [StreamProtocol; 5] = [TX, TX_ANN, BLK, BLK_HEIGHT, BLK_ANN];
