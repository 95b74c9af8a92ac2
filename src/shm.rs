//! Named POSIX shared memory with bounded-timeout reader/writer access
//!
//! Access is arbitrated with `flock(2)` on the region's file descriptor.
//! Every [`MemFile`] opens its own description, so two handles on the same
//! name exclude each other whether they live in one process or two. The
//! kernel drops a dead process's locks when its descriptors close.

use crate::error::{Access, BroadcastError, Result};
use rustix::fd::OwnedFd;
use rustix::fs::{flock, fstat, ftruncate, FlockOperation};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

const VENOM_SHM_PREFIX: &str = "/venom_";
const MAX_NAME_LEN: usize = 255 - VENOM_SHM_PREFIX.len();

/// How long to sleep between non-blocking lock attempts
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

fn shm_path(name: &str) -> Result<CString> {
    if name.len() > MAX_NAME_LEN {
        return Err(BroadcastError::NamespaceTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    if name.is_empty() || name.contains('/') {
        return Err(BroadcastError::InvalidName(name.to_string()));
    }
    CString::new(format!("{}{}", VENOM_SHM_PREFIX, name))
        .map_err(|_| BroadcastError::InvalidName(name.to_string()))
}

/// Handle to a mapped shared memory region
pub struct MemFile {
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping is only touched through access guards, which need
// `&mut MemFile`, so moving the handle to another thread is sound.
unsafe impl Send for MemFile {}

impl MemFile {
    /// Create a new shared memory region of exactly `size` bytes
    ///
    /// Fails if a region with this name already exists. The new region is
    /// zero filled and this handle becomes its owner: dropping or destroying
    /// it unlinks the name.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = shm_path(name)?;

        let fd = shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH,
        )
        .map_err(|e| BroadcastError::ShmCreate {
            name: name.to_string(),
            source: e.into(),
        })?;

        let mapped = ftruncate(&fd, size as u64)
            .map_err(|e| BroadcastError::Truncate(e.into()))
            .and_then(|()| Self::map(&fd, size));
        let addr = match mapped {
            Ok(addr) => addr,
            Err(err) => {
                let _ = shm_unlink(c_name.as_c_str());
                return Err(err);
            }
        };

        log::debug!("created shared memory '{}' ({} bytes)", name, size);
        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    /// Open an existing shared memory region, mapping all of it
    pub fn open(name: &str) -> Result<Self> {
        let c_name = shm_path(name)?;

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            BroadcastError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        // Get size from file
        let stat = fstat(&fd).map_err(|e| BroadcastError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = usize::try_from(stat.st_size).unwrap_or(0);
        if size == 0 {
            // Creator has not sized it yet, or never will
            return Err(BroadcastError::ShmOpen {
                name: name.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "shared memory region has zero length",
                ),
            });
        }

        let addr = Self::map(&fd, size)?;

        log::debug!("attached shared memory '{}' ({} bytes)", name, size);
        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                0,
            )
            .map_err(|e| BroadcastError::Mmap(e.into()))?
        };

        NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            BroadcastError::Mmap(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mmap returned null",
            ))
        })
    }

    /// Total number of mapped bytes
    #[inline(always)]
    pub fn max_data_size(&self) -> usize {
        self.size
    }

    /// Get the name of shared memory
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this handle created the region
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Acquire shared access, waiting at most `timeout`
    pub fn read_access(&mut self, timeout: Duration) -> Result<ReadAccess<'_>> {
        self.lock(Access::Read, timeout)?;
        Ok(ReadAccess { shm: self })
    }

    /// Acquire exclusive access, waiting at most `timeout`
    pub fn write_access(&mut self, timeout: Duration) -> Result<WriteAccess<'_>> {
        self.lock(Access::Write, timeout)?;
        Ok(WriteAccess { shm: self })
    }

    fn lock(&self, access: Access, timeout: Duration) -> Result<()> {
        let operation = match access {
            Access::Read => FlockOperation::NonBlockingLockShared,
            Access::Write => FlockOperation::NonBlockingLockExclusive,
        };
        let deadline = Instant::now() + timeout;

        loop {
            match flock(&self.fd, operation) {
                Ok(()) => return Ok(()),
                Err(e) if e == Errno::INTR => continue,
                Err(e) if e == Errno::WOULDBLOCK => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(BroadcastError::LockTimeout { access, timeout });
                    }
                    std::thread::sleep(remaining.min(LOCK_POLL_INTERVAL));
                }
                Err(e) => return Err(BroadcastError::Lock(e.into())),
            }
        }
    }

    fn unlock(&self) {
        if let Err(e) = flock(&self.fd, FlockOperation::Unlock) {
            log::warn!("failed to unlock shared memory '{}': {}", self.name, e);
        }
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: addr/size describe a live mapping owned by self
        unsafe { std::slice::from_raw_parts(self.addr.as_ptr(), self.size) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self keeps this the only local view
        unsafe { std::slice::from_raw_parts_mut(self.addr.as_ptr(), self.size) }
    }

    /// Unmap the region, unlinking the name if owned or `force_unlink` is set
    ///
    /// Other processes that already mapped the region keep their mapping;
    /// unlinking only stops new attaches from finding it.
    pub fn destroy(mut self, force_unlink: bool) -> Result<()> {
        let unlink = self.is_owner || force_unlink;
        let name = std::mem::take(&mut self.name);
        // Drop now only unmaps
        self.is_owner = false;
        drop(self);

        if !unlink {
            return Ok(());
        }
        let c_name = shm_path(&name)?;
        match shm_unlink(c_name.as_c_str()) {
            Ok(()) => Ok(()),
            // Someone else already removed it
            Err(e) if e == Errno::NOENT => Ok(()),
            Err(e) => Err(BroadcastError::Unlink {
                name,
                source: e.into(),
            }),
        }
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        // Unmap memory
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        // If owner, unlink the shared memory
        if self.is_owner {
            if let Ok(c_name) = shm_path(&self.name) {
                let _ = shm_unlink(c_name.as_c_str());
            }
        }
    }
}

/// Shared access to a region, released on drop
pub struct ReadAccess<'a> {
    shm: &'a MemFile,
}

impl ReadAccess<'_> {
    /// Mapped bytes, valid while this guard lives
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.shm.bytes()
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the region
    pub fn read_into(&self, buf: &mut [u8], offset: usize) -> Result<()> {
        let bytes = self.bytes();
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= bytes.len())
            .ok_or(BroadcastError::OutOfBounds {
                offset,
                len: buf.len(),
                size: bytes.len(),
            })?;
        buf.copy_from_slice(&bytes[offset..end]);
        Ok(())
    }
}

impl Drop for ReadAccess<'_> {
    fn drop(&mut self) {
        self.shm.unlock();
    }
}

/// Exclusive access to a region, released on drop
pub struct WriteAccess<'a> {
    shm: &'a mut MemFile,
}

impl WriteAccess<'_> {
    /// Mapped bytes, valid while this guard lives
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.shm.bytes()
    }

    /// Mutable mapped bytes, valid while this guard lives
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.shm.bytes_mut()
    }
}

impl Drop for WriteAccess<'_> {
    fn drop(&mut self) {
        self.shm.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn unique_name(tag: &str) -> String {
        format!("test_shm_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_create_and_open() {
        let name = unique_name("create_open");
        let size = 4096;

        // Create
        let mut shm1 = MemFile::create(&name, size).unwrap();
        assert!(shm1.is_owner());
        assert_eq!(shm1.max_data_size(), size);

        // Write some data
        shm1.write_access(TIMEOUT).unwrap().bytes_mut()[0] = 42;

        // Open from another "process"
        let mut shm2 = MemFile::open(&name).unwrap();
        assert!(!shm2.is_owner());
        assert_eq!(shm2.max_data_size(), size);

        // Read the data
        let access = shm2.read_access(TIMEOUT).unwrap();
        assert_eq!(access.bytes()[0], 42u8);
        let mut buf = [0u8; 2];
        access.read_into(&mut buf, 0).unwrap();
        assert_eq!(buf, [42, 0]);
        drop(access);

        // Drop shm2 first, then shm1 will unlink
        drop(shm2);
        drop(shm1);
        assert!(MemFile::open(&name).is_err());
    }

    #[test]
    fn test_create_existing_fails() {
        let name = unique_name("create_existing");
        let _shm = MemFile::create(&name, 128).unwrap();
        match MemFile::create(&name, 128) {
            Err(err) => {
                assert!(matches!(err, BroadcastError::ShmCreate { .. }));
                assert!(err.is_already_exists());
            }
            Ok(_) => panic!("second create of the same name should fail"),
        }
        assert!(!BroadcastError::NotCreated.is_already_exists());
    }

    #[test]
    fn test_region_is_not_world_writable() {
        let name = unique_name("mode");
        let shm = MemFile::create(&name, 64).unwrap();
        let stat = fstat(&shm.fd).unwrap();
        assert_eq!(stat.st_mode as u32 & 0o002, 0);
    }

    #[test]
    fn test_open_missing_fails() {
        let name = unique_name("missing");
        assert!(matches!(
            MemFile::open(&name),
            Err(BroadcastError::ShmOpen { .. })
        ));
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(
            MemFile::create("", 64),
            Err(BroadcastError::InvalidName(_))
        ));
        assert!(matches!(
            MemFile::create("a/b", 64),
            Err(BroadcastError::InvalidName(_))
        ));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            MemFile::open(&long),
            Err(BroadcastError::NamespaceTooLong { .. })
        ));
    }

    #[test]
    fn test_read_into_bounds() {
        let name = unique_name("read_bounds");
        let mut shm = MemFile::create(&name, 16).unwrap();
        let access = shm.read_access(TIMEOUT).unwrap();

        let mut buf = [0u8; 8];
        assert!(access.read_into(&mut buf, 8).is_ok());
        assert!(matches!(
            access.read_into(&mut buf, 9),
            Err(BroadcastError::OutOfBounds { offset: 9, len: 8, size: 16 })
        ));
        assert!(access.read_into(&mut buf, usize::MAX).is_err());
    }

    #[test]
    fn test_exclusive_access_times_out_peers() {
        let name = unique_name("exclusive");
        let mut writer = MemFile::create(&name, 64).unwrap();
        let mut peer = MemFile::open(&name).unwrap();

        let held = writer.write_access(TIMEOUT).unwrap();
        let started = Instant::now();
        match peer.read_access(TIMEOUT) {
            Err(BroadcastError::LockTimeout { access, timeout }) => {
                assert_eq!(access, Access::Read);
                assert_eq!(timeout, TIMEOUT);
            }
            _ => panic!("read access should time out while a writer holds the lock"),
        }
        assert!(started.elapsed() >= TIMEOUT);
        assert!(matches!(
            peer.write_access(TIMEOUT),
            Err(BroadcastError::LockTimeout { access: Access::Write, .. })
        ));
        drop(held);

        assert!(peer.write_access(TIMEOUT).is_ok());
    }

    #[test]
    fn test_shared_access_is_shared() {
        let name = unique_name("shared");
        let mut first = MemFile::create(&name, 64).unwrap();
        let mut second = MemFile::open(&name).unwrap();

        let a = first.read_access(TIMEOUT).unwrap();
        let b = second.read_access(TIMEOUT).unwrap();
        assert_eq!(a.bytes().len(), b.bytes().len());
        drop(b);

        // A reader still blocks writers
        assert!(second
            .write_access(TIMEOUT)
            .err()
            .map_or(false, |e| e.is_timeout()));
        drop(a);
        assert!(second.write_access(TIMEOUT).is_ok());
    }

    #[test]
    fn test_destroy_unlinks_only_for_owner() {
        let name = unique_name("destroy");
        let owner = MemFile::create(&name, 64).unwrap();
        let attached = MemFile::open(&name).unwrap();

        attached.destroy(false).unwrap();
        assert!(MemFile::open(&name).is_ok());

        owner.destroy(false).unwrap();
        assert!(MemFile::open(&name).is_err());
    }

    #[test]
    fn test_force_destroy_unlinks() {
        let name = unique_name("force_destroy");
        let owner = MemFile::create(&name, 64).unwrap();
        let attached = MemFile::open(&name).unwrap();

        attached.destroy(true).unwrap();
        assert!(MemFile::open(&name).is_err());

        // Name is already gone, owner destroy still succeeds
        owner.destroy(false).unwrap();
    }
}
