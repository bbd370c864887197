//! The LDM-7 control protocol (§6): one TCP connection per downstream
//! session, carrying `subscribe` (the one call-and-reply procedure) plus
//! six fire-and-forget procedures in both directions.

mod channel;
mod dispatcher;
mod io;
mod message;
mod wire;

pub use channel::{OutboundFrame, RpcChannel, RpcError};
pub use dispatcher::{run_downstream_dispatcher, run_upstream_dispatcher, DownstreamHandler, UpstreamHandler};
pub use io::{read_frame, write_frame, FrameIoError};
pub use message::{Frame, SubscribeReply};
pub use wire::{decode, encode, WireError};
