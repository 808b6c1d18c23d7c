//! POSIX shared memory regions backing the exchange cells.
//!
//! Thin wrapper over rustix `shm_open` / `ftruncate` / `mmap`. Two
//! deliberate departures from the usual RAII shape, both required by the
//! crash model: a region is never zeroed by user code (the kernel
//! zero-fills fresh objects, and a reattach after a crash must keep the
//! old contents), and dropping a handle only unmaps — the named object
//! stays behind so a restarted process can recover from it.

use crate::error::{Result, SwapError};
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;

/// A mapped POSIX shared memory object.
pub struct ShmRegion {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
}

// SAFETY: the mapping itself is plain memory; everything placed in it is
// synchronised by the atomics of the structures living there.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Creates the region if absent, opens it otherwise, and maps `size`
    /// bytes read-write.
    ///
    /// A fresh object arrives zero-filled from the kernel; an existing one
    /// keeps its contents, which is exactly what a producer restarting
    /// after a crash needs.
    pub fn create_or_open(name: &str, size: usize) -> Result<Self> {
        let c_name = c_name(name);
        let fd = shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|e| SwapError::ShmCreate {
            name: name.to_string(),
            source: e.into(),
        })?;

        // Growing a fresh object zero-fills it; an object that already has
        // the right size is left untouched.
        ftruncate(&fd, size as u64).map_err(|e| SwapError::Truncate(e.into()))?;

        let addr = map(&fd, size)?;
        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
        })
    }

    /// Opens an existing region and maps `size` bytes read-write.
    ///
    /// Fails with [`SwapError::RegionSize`] while the object exists but has
    /// not been grown to `size` yet: the creator's `shm_open` and
    /// `ftruncate` are two separate steps, and opening in between must
    /// read as "not ready yet", not as success.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        let c_name = c_name(name);
        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            SwapError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = fstat(&fd).map_err(|e| SwapError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        if (stat.st_size as usize) < size {
            return Err(SwapError::RegionSize {
                need: size,
                got: stat.st_size as usize,
            });
        }

        let addr = map(&fd, size)?;
        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
        })
    }

    /// Removes the named object.
    ///
    /// Deployment-level cleanup between runs with a different process count
    /// or layout; processes that still map the region keep working on it.
    pub fn unlink(name: &str) -> Result<()> {
        shm_unlink(c_name(name).as_c_str()).map_err(|e| SwapError::ShmUnlink {
            name: name.to_string(),
            source: e.into(),
        })
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Mapped size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// POSIX object name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // Unmap only. The named object must outlive the process: peers are
        // still reading it and a restarted incarnation will reattach.
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }
    }
}

fn c_name(name: &str) -> CString {
    CString::new(name).expect("shm names contain no interior NUL")
}

fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    // SAFETY: mapping a shared file-backed object at a kernel-chosen
    // address.
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| SwapError::Mmap(e.into()))?
    };
    Ok(NonNull::new(addr.cast::<u8>()).expect("mmap returned null"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("/swapcell_test_{}_{}", name, std::process::id())
    }

    #[test]
    fn create_write_open_read() {
        let name = unique("roundtrip");
        let _ = ShmRegion::unlink(&name);

        let writer = ShmRegion::create_or_open(&name, 4096).unwrap();
        assert_eq!(writer.size(), 4096);
        unsafe { std::ptr::write(writer.as_ptr(), 42u8) };

        let reader = ShmRegion::open(&name, 4096).unwrap();
        assert_eq!(unsafe { std::ptr::read(reader.as_ptr()) }, 42u8);

        // Dropping handles keeps the object alive.
        drop(reader);
        drop(writer);
        let again = ShmRegion::open(&name, 4096).unwrap();
        assert_eq!(unsafe { std::ptr::read(again.as_ptr()) }, 42u8);

        drop(again);
        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn reopening_does_not_clobber_contents() {
        let name = unique("reopen");
        let _ = ShmRegion::unlink(&name);

        let first = ShmRegion::create_or_open(&name, 4096).unwrap();
        unsafe { std::ptr::write(first.as_ptr(), 7u8) };
        drop(first);

        // create_or_open on an existing object must behave like open.
        let second = ShmRegion::create_or_open(&name, 4096).unwrap();
        assert_eq!(unsafe { std::ptr::read(second.as_ptr()) }, 7u8);

        drop(second);
        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn open_of_missing_region_fails() {
        let name = unique("missing");
        let _ = ShmRegion::unlink(&name);
        assert!(matches!(
            ShmRegion::open(&name, 4096),
            Err(SwapError::ShmOpen { .. })
        ));
    }

    #[test]
    fn open_of_undersized_region_fails() {
        let name = unique("undersized");
        let _ = ShmRegion::unlink(&name);

        let small = ShmRegion::create_or_open(&name, 1024).unwrap();
        assert!(matches!(
            ShmRegion::open(&name, 4096),
            Err(SwapError::RegionSize { need: 4096, got: 1024 })
        ));

        drop(small);
        ShmRegion::unlink(&name).unwrap();
    }
}
