//! Broadcast region header
//!
//! # Layout (little endian, no padding)
//! ```text
//!  0  [u8; 5]  magic "VBCST"
//!  5  u8       reserved
//!  6  u32      version
//! 10  u64      queue offset (== HEADER_SIZE)
//! 18  u64      timestamp of the last write
//! 26  ---      message queue
//! ```

use crate::clock::Timestamp;
use crate::codec::{read_array, read_u32, read_u64, write_bytes, write_u32, write_u64};
use crate::error::{BroadcastError, Result};
use crate::queue::{self, MessageQueueMut};

/// Tag identifying a broadcast region
pub const MAGIC: [u8; 5] = *b"VBCST";

/// Layout version this build reads and writes
pub const VERSION: u32 = 1;

/// Size of the header, and offset of the queue behind it
pub const HEADER_SIZE: usize = 26;

mod offsets {
    pub const MAGIC: usize = 0;
    pub const RESERVED: usize = 5;
    pub const VERSION: usize = 6;
    pub const QUEUE_OFFSET: usize = 10;
    pub const TIMESTAMP: usize = 18;
}

/// Decoded copy of a region header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastHeader {
    pub magic: [u8; 5],
    pub version: u32,
    pub queue_offset: u64,
    pub last_timestamp: Timestamp,
}

impl BroadcastHeader {
    /// Header of a freshly reset region
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            queue_offset: HEADER_SIZE as u64,
            last_timestamp: timestamp,
        }
    }

    pub fn decode(region: &[u8]) -> Result<Self> {
        Ok(Self {
            magic: read_array(region, offsets::MAGIC)?,
            version: read_u32(region, offsets::VERSION)?,
            queue_offset: read_u64(region, offsets::QUEUE_OFFSET)?,
            last_timestamp: read_u64(region, offsets::TIMESTAMP)?,
        })
    }

    pub fn encode(&self, region: &mut [u8]) -> Result<()> {
        if region.len() < HEADER_SIZE {
            return Err(BroadcastError::OutOfBounds {
                offset: 0,
                len: HEADER_SIZE,
                size: region.len(),
            });
        }
        write_bytes(region, offsets::MAGIC, &self.magic)?;
        write_bytes(region, offsets::RESERVED, &[0])?;
        write_u32(region, offsets::VERSION, self.version)?;
        write_u64(region, offsets::QUEUE_OFFSET, self.queue_offset)?;
        write_u64(region, offsets::TIMESTAMP, self.last_timestamp)
    }

    /// Check magic and version against this build
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(BroadcastError::InvalidMagic {
                expected: MAGIC,
                got: self.magic,
            });
        }
        if self.version != VERSION {
            return Err(BroadcastError::IncompatibleVersion {
                supported: VERSION,
                found: self.version,
            });
        }
        Ok(())
    }

    fn queue_start(&self, region_len: usize) -> Result<usize> {
        usize::try_from(self.queue_offset)
            .ok()
            .filter(|&offset| (HEADER_SIZE..=region_len).contains(&offset))
            .ok_or(BroadcastError::OutOfBounds {
                offset: self.queue_offset as usize,
                len: 0,
                size: region_len,
            })
    }

    /// Bytes of `region` holding the message queue
    pub fn queue_bytes<'a>(&self, region: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.queue_start(region.len())?;
        Ok(&region[start..])
    }

    /// Mutable bytes of `region` holding the message queue
    pub fn queue_bytes_mut<'a>(&self, region: &'a mut [u8]) -> Result<&'a mut [u8]> {
        let start = self.queue_start(region.len())?;
        Ok(&mut region[start..])
    }
}

/// True if `region` starts with the broadcast magic
pub fn is_initialized(region: &[u8]) -> bool {
    region.get(..MAGIC.len()) == Some(&MAGIC[..])
}

/// True if `region` was laid out with the version this build speaks
pub fn is_version_compatible(region: &[u8]) -> bool {
    read_u32(region, offsets::VERSION).map_or(false, |version| version == VERSION)
}

/// Overwrite the header with defaults and empty the queue
///
/// Nothing is written unless header and queue both fit in `region`.
pub fn reset(region: &mut [u8], capacity: usize, timestamp: Timestamp) -> Result<()> {
    let fits = region.len() >= HEADER_SIZE && queue::fits(capacity, region.len() - HEADER_SIZE);
    if !fits {
        return Err(BroadcastError::OutOfBounds {
            offset: 0,
            len: HEADER_SIZE.saturating_add(queue::presumed_byte_size(capacity)),
            size: region.len(),
        });
    }
    let header = BroadcastHeader::new(timestamp);
    header.encode(region)?;
    MessageQueueMut::reset(header.queue_bytes_mut(region)?, capacity)?;
    Ok(())
}

/// Timestamp of the most recent write
pub fn last_timestamp(region: &[u8]) -> Result<Timestamp> {
    read_u64(region, offsets::TIMESTAMP)
}

pub fn set_last_timestamp(region: &mut [u8], timestamp: Timestamp) -> Result<()> {
    write_u64(region, offsets::TIMESTAMP, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{presumed_byte_size, MessageQueue};

    fn region(capacity: usize) -> Vec<u8> {
        vec![0u8; HEADER_SIZE + presumed_byte_size(capacity)]
    }

    #[test]
    fn test_reset_lays_out_fresh_header() {
        let mut bytes = region(4);
        bytes[5] = 0xEE;
        reset(&mut bytes, 4, 1234).unwrap();

        assert_eq!(&bytes[0..5], b"VBCST");
        assert_eq!(bytes[5], 0);
        assert_eq!(bytes[6..10], 1u32.to_le_bytes());
        assert_eq!(bytes[10..18], 26u64.to_le_bytes());
        assert_eq!(bytes[18..26], 1234u64.to_le_bytes());

        let header = BroadcastHeader::decode(&bytes).unwrap();
        assert_eq!(header, BroadcastHeader::new(1234));
        assert_eq!(header.queue_offset, HEADER_SIZE as u64);
        assert!(header.validate().is_ok());

        let queue = MessageQueue::attach(header.queue_bytes(&bytes).unwrap()).unwrap();
        assert_eq!(queue.capacity(), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_initialized_and_version_checks() {
        let mut bytes = region(1);
        assert!(!is_initialized(&bytes));
        assert!(!is_initialized(&bytes[..3]));

        reset(&mut bytes, 1, 1).unwrap();
        assert!(is_initialized(&bytes));
        assert!(is_version_compatible(&bytes));

        bytes[6..10].copy_from_slice(&2u32.to_le_bytes());
        assert!(is_initialized(&bytes));
        assert!(!is_version_compatible(&bytes));
        assert!(matches!(
            BroadcastHeader::decode(&bytes).unwrap().validate(),
            Err(BroadcastError::IncompatibleVersion {
                supported: 1,
                found: 2
            })
        ));

        bytes[0] = b'X';
        assert!(matches!(
            BroadcastHeader::decode(&bytes).unwrap().validate(),
            Err(BroadcastError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_timestamp_field() {
        let mut bytes = region(1);
        reset(&mut bytes, 1, 10).unwrap();
        assert_eq!(last_timestamp(&bytes).unwrap(), 10);

        set_last_timestamp(&mut bytes, 99).unwrap();
        assert_eq!(last_timestamp(&bytes).unwrap(), 99);
        assert_eq!(BroadcastHeader::decode(&bytes).unwrap().last_timestamp, 99);
    }

    #[test]
    fn test_short_region_is_rejected() {
        let mut bytes = vec![0u8; HEADER_SIZE - 1];
        assert!(BroadcastHeader::decode(&bytes).is_err());
        assert!(reset(&mut bytes, 0, 1).is_err());
        assert_eq!(bytes, vec![0u8; HEADER_SIZE - 1]);

        // Header fits, queue does not
        let mut bytes = vec![0u8; HEADER_SIZE + 4];
        assert!(reset(&mut bytes, 1, 1).is_err());
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(!is_initialized(&bytes));

        let mut bytes = region(1);
        assert!(reset(&mut bytes, 2, 1).is_err());
        assert!(reset(&mut bytes, usize::MAX, 1).is_err());
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_queue_offset_is_bounds_checked() {
        let mut bytes = region(1);
        reset(&mut bytes, 1, 1).unwrap();

        let mut header = BroadcastHeader::decode(&bytes).unwrap();
        header.queue_offset = bytes.len() as u64 + 1;
        assert!(header.queue_bytes(&bytes).is_err());

        header.queue_offset = 3;
        assert!(header.queue_bytes(&bytes).is_err());
    }
}
