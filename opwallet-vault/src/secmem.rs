//! Memory locking for mnemonic phrases
//!
//! HD keyrings pin the pages holding their mnemonic so the phrase is not
//! written to swap while the vault is unlocked. Locking is best effort:
//! failures are logged and the keyring keeps working.
//!
//! - **Unix**: `mlock()` / `munlock()`
//! - **Windows**: `VirtualLock()` / `VirtualUnlock()`
//! - **Other**: no-op

use std::ptr::NonNull;

/// Outcome of a lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Locked,
    Failed,
    Unsupported,
}

/// Lock a memory region.
///
/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes.
unsafe fn lock_pages(ptr: NonNull<u8>, len: usize) -> LockResult {
    if len == 0 {
        return LockResult::Locked;
    }

    #[cfg(unix)]
    {
        if libc::mlock(ptr.as_ptr() as *const libc::c_void, len) == 0 {
            return LockResult::Locked;
        }

        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        let reason = match errno {
            libc::ENOMEM => "exceeds RLIMIT_MEMLOCK",
            libc::EPERM => "insufficient permissions",
            _ => "unknown error",
        };
        tracing::warn!("mlock failed: {} (errno {}), mnemonic may be swapped", reason, errno);
        LockResult::Failed
    }

    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::VirtualLock;

        match VirtualLock(ptr.as_ptr() as *const std::ffi::c_void, len) {
            Ok(()) => LockResult::Locked,
            Err(e) => {
                tracing::warn!("VirtualLock failed: {}, mnemonic may be swapped", e);
                LockResult::Failed
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = ptr;
        LockResult::Unsupported
    }
}

/// # Safety
/// `ptr`/`len` must describe memory previously locked with [`lock_pages`].
unsafe fn unlock_pages(ptr: NonNull<u8>, len: usize) {
    if len == 0 {
        return;
    }

    #[cfg(unix)]
    {
        if libc::munlock(ptr.as_ptr() as *const libc::c_void, len) != 0 {
            tracing::debug!("munlock returned non-zero");
        }
    }

    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::VirtualUnlock;

        if VirtualUnlock(ptr.as_ptr() as *const std::ffi::c_void, len).is_err() {
            tracing::debug!("VirtualUnlock failed");
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = ptr;
    }
}

/// RAII guard over a locked region; unlocks on drop.
///
/// The guard must be dropped before the memory it covers is freed. Owners
/// declare it ahead of the guarded field so drop order takes care of this.
#[derive(Debug)]
pub struct LockedRegion {
    ptr: NonNull<u8>,
    len: usize,
    locked: bool,
}

impl LockedRegion {
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for LockedRegion {
    fn drop(&mut self) {
        if self.locked {
            // SAFETY: only regions we locked reach here and the owner keeps
            // the backing memory alive until after this guard drops.
            unsafe { unlock_pages(self.ptr, self.len) }
        }
    }
}

// SAFETY: the pointer is never dereferenced, only handed to the OS.
unsafe impl Send for LockedRegion {}
unsafe impl Sync for LockedRegion {}

/// Lock the heap buffer backing a string.
///
/// # Safety
/// The string's buffer must outlive the returned guard and must not be
/// reallocated while the guard exists.
pub unsafe fn lock_string(s: &str) -> LockedRegion {
    match NonNull::new(s.as_ptr() as *mut u8) {
        Some(ptr) if !s.is_empty() => LockedRegion {
            ptr,
            len: s.len(),
            locked: lock_pages(ptr, s.len()) == LockResult::Locked,
        },
        _ => LockedRegion {
            ptr: NonNull::dangling(),
            len: 0,
            locked: false,
        },
    }
}
