//! # siphon-bridge
//!
//! TCP client for the siphon memory-tap service: length-prefixed MessagePack
//! messages carrying input state, frame captures and memory attribute access.
//! [`SiphonClient`] implements the environment's [`GameInterface`], so it
//! plugs straight into a `SiphonEnv`.
//!
//! [`GameInterface`]: siphon_rl_env::GameInterface

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{ReadyInfo, SiphonClient, SiphonClientConfig};
pub use protocol::{SiphonMessage, decode, encode};
pub use transport::{MAX_MESSAGE_BYTES, read_message, write_message};
