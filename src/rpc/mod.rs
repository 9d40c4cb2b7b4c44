//! Peer-to-peer protocol between crawling nodes: length-prefixed JSON frames
//! over TCP, one request/reply pair at a time per connection.

pub mod client;
pub mod codec;
pub mod message;
pub mod server;


pub use client::{RpcClient, RpcConnection, DEFAULT_CALL_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL};
pub use message::{RpcCall, RpcEnvelope, RpcReply};
pub use server::RpcServer;
