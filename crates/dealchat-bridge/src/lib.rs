//! Request/reply boundary between the primary app and the backbone process.
//!
//! Frames are 4-byte big-endian length prefixed JSON (`BridgeRequest` /
//! `BridgeReply`). The client side bounds every call and folds timeouts and
//! transport errors into the same empty results the backbone itself returns,
//! so the app keeps working while the bridge is down or restarting.

pub mod client;
pub mod server;

use tokio_util::codec::LengthDelimitedCodec;

pub use client::BridgeClient;
pub use server::BridgeServer;

/// Largest frame either side accepts.
const MAX_FRAME_SIZE: usize = 64 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}
