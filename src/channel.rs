//! Broadcast channel over a named shared memory region
//!
//! Every process that calls [`BroadcastChannel::create`] with the same name
//! and capacity shares one ring of notifications. Writers stamp each message
//! with a monotonic timestamp; readers keep a cursor and only return
//! messages newer than the last write they saw.

use crate::clock::{self, Timestamp};
use crate::error::{BroadcastError, Result};
use crate::header::{self, BroadcastHeader, HEADER_SIZE};
use crate::queue::{self, BroadcastMessage, MessageQueue, MessageQueueMut, MessageType};
use crate::shm::MemFile;
use std::time::Duration;

/// Default bound on waiting for region access
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(200);

/// Channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Identity stamped on outgoing messages and used for loopback filtering
    pub process_id: u64,
    /// Maximum wait for shared or exclusive access to the region
    pub lock_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            process_id: u64::from(std::process::id()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

struct Session {
    shm: MemFile,
    /// Private copy of the whole region, refreshed on every receive
    snapshot: Vec<u8>,
    name: String,
    capacity: usize,
}

enum Lifecycle {
    Uninitialized,
    Created(Session),
    Destroyed,
}

/// Per-process handle on a broadcast channel
pub struct BroadcastChannel {
    config: ChannelConfig,
    state: Lifecycle,
    last_seen: Timestamp,
}

impl BroadcastChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: Lifecycle::Uninitialized,
            last_seen: 0,
        }
    }

    /// Create the named region, or attach to it if it exists
    ///
    /// A region that does not carry the broadcast magic yet is initialized
    /// with an empty queue of `max_queue_size` messages. A region written by
    /// another layout version is left untouched and reported as
    /// [`BroadcastError::IncompatibleVersion`].
    pub fn create(&mut self, name: &str, max_queue_size: usize) -> Result<()> {
        match self.state {
            Lifecycle::Uninitialized => {}
            Lifecycle::Created(_) => return Err(BroadcastError::AlreadyCreated),
            Lifecycle::Destroyed => return Err(BroadcastError::Destroyed),
        }

        let required = queue::checked_byte_size(max_queue_size)
            .and_then(|size| size.checked_add(HEADER_SIZE))
            .ok_or(BroadcastError::CapacityTooLarge {
                capacity: max_queue_size,
            })?;
        let mut shm = match MemFile::create(name, required) {
            Ok(shm) => shm,
            Err(err) if err.is_already_exists() => {
                log::debug!("broadcast memory file '{}' exists, attaching", name);
                MemFile::open(name)?
            }
            Err(err) => return Err(err),
        };

        if shm.max_data_size() < required {
            log::error!(
                "invalid broadcast memory file size for '{}': {} < {}",
                name,
                shm.max_data_size(),
                required
            );
            return Err(BroadcastError::RegionTooSmall {
                required,
                actual: shm.max_data_size(),
            });
        }

        {
            let mut access = shm.write_access(self.config.lock_timeout)?;
            let region = access.bytes_mut();
            if !header::is_initialized(region) {
                log::debug!("initializing broadcast memory file '{}'", name);
                header::reset(region, max_queue_size, clock::now())?;
            }
            let found = BroadcastHeader::decode(region)?;
            if let Err(err) = found.validate() {
                log::error!("broadcast memory file '{}' is not compatible: {}", name, err);
                return Err(err);
            }
            let queue = MessageQueue::attach(found.queue_bytes(region)?)?;
            if queue.capacity() != max_queue_size {
                return Err(BroadcastError::CapacityMismatch {
                    requested: max_queue_size,
                    found: queue.capacity(),
                });
            }
        }

        let snapshot = vec![0u8; shm.max_data_size()];
        self.state = Lifecycle::Created(Session {
            shm,
            snapshot,
            name: name.to_string(),
            capacity: max_queue_size,
        });
        Ok(())
    }

    /// Release the region
    ///
    /// If this process created the region its name is unlinked; processes
    /// still attached keep their mapping. A destroyed channel cannot be
    /// created again.
    pub fn destroy(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, Lifecycle::Destroyed) {
            Lifecycle::Created(session) => session.shm.destroy(false),
            Lifecycle::Uninitialized => {
                self.state = Lifecycle::Uninitialized;
                Err(BroadcastError::NotCreated)
            }
            Lifecycle::Destroyed => Err(BroadcastError::Destroyed),
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        match &mut self.state {
            Lifecycle::Created(session) => Ok(session),
            Lifecycle::Uninitialized => Err(BroadcastError::NotCreated),
            Lifecycle::Destroyed => Err(BroadcastError::Destroyed),
        }
    }

    /// Announce `payload_id` to every attached process
    ///
    /// Returns the timestamp written with the message.
    pub fn broadcast(&mut self, payload_id: u64, message_type: MessageType) -> Result<Timestamp> {
        let process_id = self.config.process_id;
        let timeout = self.config.lock_timeout;
        let session = self.session()?;

        let mut access = match session.shm.write_access(timeout) {
            Ok(access) => access,
            Err(err) => {
                log::warn!(
                    "could not acquire write access on broadcast memory file '{}': {}",
                    session.name,
                    err
                );
                return Err(err);
            }
        };

        let region = access.bytes_mut();
        let found = BroadcastHeader::decode(region)?;
        let timestamp = clock::next_after(found.last_timestamp);
        MessageQueueMut::attach(found.queue_bytes_mut(region)?)?.push(&BroadcastMessage {
            sender_process_id: process_id,
            timestamp,
            payload_id,
            message_type,
        });
        header::set_last_timestamp(region, timestamp)?;

        Ok(timestamp)
    }

    /// Messages written since the previous receive, newest first
    ///
    /// Messages older than `timeout` are skipped; a zero `timeout` disables
    /// expiry. Messages sent by this process are skipped unless `loopback`
    /// is set. The cursor moves to the latest write either way.
    pub fn receive_broadcast(
        &mut self,
        timeout: Duration,
        loopback: bool,
    ) -> Result<Vec<BroadcastMessage>> {
        let process_id = self.config.process_id;
        let lock_timeout = self.config.lock_timeout;
        let last_seen = self.last_seen;
        let session = self.session()?;

        {
            let access = match session.shm.read_access(lock_timeout) {
                Ok(access) => access,
                Err(err) => {
                    log::warn!(
                        "could not acquire read access on broadcast memory file '{}': {}",
                        session.name,
                        err
                    );
                    return Err(err);
                }
            };
            access.read_into(&mut session.snapshot, 0)?;
        }

        let snapshot = &session.snapshot;
        let found = BroadcastHeader::decode(snapshot)?;
        let threshold = clock::expiry_threshold(timeout);
        let queue = MessageQueue::attach(found.queue_bytes(snapshot)?)?;

        let mut messages = Vec::new();
        for message in queue.iter() {
            let expired = threshold.map_or(false, |t| message.timestamp <= t);
            if expired || message.timestamp <= last_seen {
                break;
            }
            if message.sender_process_id == process_id && !loopback {
                continue;
            }
            messages.push(message);
        }

        self.last_seen = found.last_timestamp;
        Ok(messages)
    }

    /// Mark every pending message as seen without returning it
    pub fn flush_local(&mut self) -> Result<()> {
        let lock_timeout = self.config.lock_timeout;
        let session = self.session()?;

        let access = session.shm.read_access(lock_timeout)?;
        let latest = header::last_timestamp(access.bytes())?;
        drop(access);

        self.last_seen = latest;
        Ok(())
    }

    /// Empty the shared queue for every attached process
    pub fn flush_global(&mut self) -> Result<()> {
        let lock_timeout = self.config.lock_timeout;
        let session = self.session()?;

        let mut access = session.shm.write_access(lock_timeout)?;
        let region = access.bytes_mut();
        let previous = header::last_timestamp(region)?;
        header::reset(region, session.capacity, clock::next_after(previous))?;
        log::debug!("flushed broadcast memory file '{}'", session.name);
        Ok(())
    }

    /// Name of the region, once created
    pub fn name(&self) -> Option<&str> {
        match &self.state {
            Lifecycle::Created(session) => Some(&session.name),
            _ => None,
        }
    }

    /// Queue capacity, once created
    pub fn capacity(&self) -> Option<usize> {
        match &self.state {
            Lifecycle::Created(session) => Some(session.capacity),
            _ => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self.state, Lifecycle::Created(_))
    }

    /// Timestamp below which messages count as consumed
    pub fn last_seen_timestamp(&self) -> Timestamp {
        self.last_seen
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}
