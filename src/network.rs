// Node-to-node RPC over TCP: frame codec and message types, the outbound
// `Sender` capability and the inbound server that feeds a `Receiver`.

pub mod protocol;
pub mod sender;
pub mod server;

pub use protocol::*;
pub use sender::*;
pub use server::*;
