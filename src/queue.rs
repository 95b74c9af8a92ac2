//! Relocatable ring buffer of broadcast messages
//!
//! The ring lives inside shared memory that every process maps at a
//! different address, so it never stores a pointer. A queue is a view built
//! over whatever byte slice the caller currently holds (live mapping or a
//! private snapshot) and addresses slots by index only.
//!
//! # Layout
//! ```text
//!  0  u64  capacity
//!  8  u64  len       (stored records, <= capacity)
//! 16  u64  head      (slot the next push writes)
//! 24  ---  capacity x 32 byte slots
//! ```
//! Each slot:
//! ```text
//!  0  u64  sender process id
//!  8  u64  timestamp
//! 16  u64  payload id
//! 24  u8   message type
//! 25  [u8; 7] padding
//! ```

use crate::clock::Timestamp;
use crate::codec::{read_u64, write_bytes};
use crate::error::{BroadcastError, Result};

/// Bytes of ring bookkeeping before the first slot
pub const QUEUE_HEADER_SIZE: usize = 24;

/// Bytes per stored message
pub const MESSAGE_SIZE: usize = 32;

mod offsets {
    pub const CAPACITY: usize = 0;
    pub const LEN: usize = 8;
    pub const HEAD: usize = 16;
}

mod slot {
    pub const PROCESS_ID: usize = 0;
    pub const TIMESTAMP: usize = 8;
    pub const PAYLOAD_ID: usize = 16;
    pub const MESSAGE_TYPE: usize = 24;
}

/// Number of bytes a ring of `capacity` messages occupies
///
/// Saturates at `usize::MAX` for capacities no region could hold; use
/// [`checked_byte_size`] where that has to be an error.
pub const fn presumed_byte_size(capacity: usize) -> usize {
    capacity
        .saturating_mul(MESSAGE_SIZE)
        .saturating_add(QUEUE_HEADER_SIZE)
}

/// Number of bytes a ring of `capacity` messages occupies, `None` on overflow
pub fn checked_byte_size(capacity: usize) -> Option<usize> {
    capacity
        .checked_mul(MESSAGE_SIZE)
        .and_then(|slots| slots.checked_add(QUEUE_HEADER_SIZE))
}

/// What happened to the resource a message refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Created,
    Updated,
    Removed,
    /// Tag written by a peer this build does not know
    Other(u8),
}

impl MessageType {
    pub fn from_raw(tag: u8) -> Self {
        match tag {
            1 => MessageType::Created,
            2 => MessageType::Updated,
            3 => MessageType::Removed,
            other => MessageType::Other(other),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            MessageType::Created => 1,
            MessageType::Updated => 2,
            MessageType::Removed => 3,
            MessageType::Other(tag) => tag,
        }
    }
}

/// A single notification record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub sender_process_id: u64,
    pub timestamp: Timestamp,
    pub payload_id: u64,
    pub message_type: MessageType,
}

fn le_u64(bytes: &[u8; MESSAGE_SIZE], at: usize) -> u64 {
    let mut field = [0u8; 8];
    field.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(field)
}

impl BroadcastMessage {
    fn decode(bytes: &[u8; MESSAGE_SIZE]) -> Self {
        Self {
            sender_process_id: le_u64(bytes, slot::PROCESS_ID),
            timestamp: le_u64(bytes, slot::TIMESTAMP),
            payload_id: le_u64(bytes, slot::PAYLOAD_ID),
            message_type: MessageType::from_raw(bytes[slot::MESSAGE_TYPE]),
        }
    }

    fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut bytes = [0u8; MESSAGE_SIZE];
        bytes[slot::PROCESS_ID..slot::PROCESS_ID + 8]
            .copy_from_slice(&self.sender_process_id.to_le_bytes());
        bytes[slot::TIMESTAMP..slot::TIMESTAMP + 8].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[slot::PAYLOAD_ID..slot::PAYLOAD_ID + 8]
            .copy_from_slice(&self.payload_id.to_le_bytes());
        bytes[slot::MESSAGE_TYPE] = self.message_type.as_raw();
        bytes
    }
}

#[derive(Debug, Clone, Copy)]
struct Bookkeeping {
    capacity: usize,
    len: usize,
    head: usize,
}

impl Bookkeeping {
    fn load(bytes: &[u8]) -> Result<Self> {
        let capacity = read_u64(bytes, offsets::CAPACITY)?;
        let len = read_u64(bytes, offsets::LEN)?;
        let head = read_u64(bytes, offsets::HEAD)?;

        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|&c| fits(c, bytes.len()))
            .ok_or_else(|| {
                BroadcastError::CorruptQueue(format!(
                    "capacity {} does not fit {} bytes",
                    capacity,
                    bytes.len()
                ))
            })?;
        if len > capacity as u64 {
            return Err(BroadcastError::CorruptQueue(format!(
                "length {} exceeds capacity {}",
                len, capacity
            )));
        }
        if head >= (capacity as u64).max(1) {
            return Err(BroadcastError::CorruptQueue(format!(
                "head {} outside capacity {}",
                head, capacity
            )));
        }

        Ok(Self {
            capacity,
            len: len as usize,
            head: head as usize,
        })
    }

    fn encode(&self) -> [u8; QUEUE_HEADER_SIZE] {
        let mut out = [0u8; QUEUE_HEADER_SIZE];
        for (offset, value) in [
            (offsets::CAPACITY, self.capacity),
            (offsets::LEN, self.len),
            (offsets::HEAD, self.head),
        ] {
            out[offset..offset + 8].copy_from_slice(&(value as u64).to_le_bytes());
        }
        out
    }

    fn store(&self, bytes: &mut [u8]) -> Result<()> {
        write_bytes(bytes, 0, &self.encode())
    }
}

pub(crate) fn fits(capacity: usize, available: usize) -> bool {
    checked_byte_size(capacity).map_or(false, |size| size <= available)
}

fn slot_range(index: usize) -> std::ops::Range<usize> {
    let start = QUEUE_HEADER_SIZE + index * MESSAGE_SIZE;
    start..start + MESSAGE_SIZE
}

/// Read-only view of a ring
#[derive(Debug, Clone, Copy)]
pub struct MessageQueue<'a> {
    bytes: &'a [u8],
    book: Bookkeeping,
}

impl<'a> MessageQueue<'a> {
    /// View the ring laid out at the start of `bytes`
    pub fn attach(bytes: &'a [u8]) -> Result<Self> {
        let book = Bookkeeping::load(bytes)?;
        Ok(Self { bytes, book })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.book.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.book.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.book.len == 0
    }

    /// Stored messages, most recent first
    pub fn iter(&self) -> Iter<'a> {
        let capacity = self.book.capacity;
        Iter {
            bytes: self.bytes,
            capacity,
            next: if capacity == 0 {
                0
            } else {
                (self.book.head + capacity - 1) % capacity
            },
            remaining: self.book.len,
        }
    }
}

impl<'a> IntoIterator for &MessageQueue<'a> {
    type Item = BroadcastMessage;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Newest-to-oldest iterator over a ring's messages
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    bytes: &'a [u8],
    capacity: usize,
    next: usize,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = BroadcastMessage;

    fn next(&mut self) -> Option<BroadcastMessage> {
        if self.remaining == 0 {
            return None;
        }
        let slot: &[u8; MESSAGE_SIZE] = self.bytes.get(slot_range(self.next))?.try_into().ok()?;
        self.remaining -= 1;
        self.next = (self.next + self.capacity - 1) % self.capacity;
        Some(BroadcastMessage::decode(slot))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

/// Writable view of a ring
pub struct MessageQueueMut<'a> {
    bytes: &'a mut [u8],
    book: Bookkeeping,
}

impl<'a> MessageQueueMut<'a> {
    /// View the ring laid out at the start of `bytes`
    pub fn attach(bytes: &'a mut [u8]) -> Result<Self> {
        let book = Bookkeeping::load(bytes)?;
        Ok(Self { bytes, book })
    }

    /// Lay out an empty ring of `capacity` messages at the start of `bytes`
    pub fn reset(bytes: &'a mut [u8], capacity: usize) -> Result<Self> {
        if !fits(capacity, bytes.len()) {
            return Err(BroadcastError::OutOfBounds {
                offset: 0,
                len: presumed_byte_size(capacity),
                size: bytes.len(),
            });
        }
        let book = Bookkeeping {
            capacity,
            len: 0,
            head: 0,
        };
        book.store(bytes)?;
        bytes[QUEUE_HEADER_SIZE..presumed_byte_size(capacity)].fill(0);
        Ok(Self { bytes, book })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.book.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.book.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.book.len == 0
    }

    /// Append a message, overwriting the oldest one when full
    ///
    /// A zero-capacity ring drops every message.
    pub fn push(&mut self, message: &BroadcastMessage) {
        let capacity = self.book.capacity;
        if capacity == 0 {
            return;
        }
        // Slots and bookkeeping were bounds-checked by attach/reset
        self.bytes[slot_range(self.book.head)].copy_from_slice(&message.encode());
        self.book.head = (self.book.head + 1) % capacity;
        self.book.len = (self.book.len + 1).min(capacity);
        self.bytes[..QUEUE_HEADER_SIZE].copy_from_slice(&self.book.encode());
    }

    /// Read-only view of the same ring
    pub fn as_queue(&self) -> MessageQueue<'_> {
        MessageQueue {
            bytes: &*self.bytes,
            book: self.book,
        }
    }
}
