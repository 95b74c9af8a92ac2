//! VenomBroadcast - shared memory broadcast notifications
//!
//! Processes on one host announce events ("segment 42 now exists") through
//! a named shared memory region without knowing who is listening.
//!
//! # Architecture
//!
//! - **Header**: magic, version, queue offset and the timestamp of the last write
//! - **Queue**: fixed-capacity ring of 32-byte messages, overwriting the oldest
//! - **Channel**: per-process handle holding a read cursor; writers take
//!   exclusive access, readers copy the region under shared access and scan
//!   the private copy
//!
//! ```no_run
//! use std::time::Duration;
//! use venom_broadcast::{BroadcastChannel, ChannelConfig, MessageType};
//!
//! let mut channel = BroadcastChannel::new(ChannelConfig::default());
//! channel.create("registration", 64)?;
//! channel.broadcast(42, MessageType::Created)?;
//! for message in channel.receive_broadcast(Duration::from_secs(5), false)? {
//!     println!("{} {:?}", message.payload_id, message.message_type);
//! }
//! # Ok::<(), venom_broadcast::BroadcastError>(())
//! ```

pub mod error;
pub mod clock;
mod codec;
pub mod shm;
pub mod queue;
pub mod header;
pub mod channel;
pub mod bindings;

pub use error::{Access, BroadcastError, Result};
pub use clock::Timestamp;
pub use queue::{BroadcastMessage, MessageType};
pub use channel::{BroadcastChannel, ChannelConfig, DEFAULT_LOCK_TIMEOUT};
