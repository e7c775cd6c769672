//! # Protocol
//!
//! Stage progression, stage-gated message routing, and RPC dispatch.

pub mod registry;
pub mod rpc;
pub mod stage;

pub use registry::StageRegistry;
pub use rpc::RpcDispatcher;
pub use stage::Stage;
