// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// POSIX shared memory mapping and process-shared pthread primitives.
//
// Unlike a named-mutex library, the mutex and condition variables here are
// initialized in caller-provided memory: the channel region embeds them in
// its header, so there is one mapping per endpoint and no per-primitive shm
// segment to manage.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::backoff;
use crate::shm_name;

// ---------------------------------------------------------------------------
// Robust mutex symbols — not exposed by `libc` on all platforms.
// macOS has neither robust mutexes nor pthread_mutex_timedlock.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
    fn pthread_mutex_timedlock(
        mutex: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// Shared memory mapping
// ---------------------------------------------------------------------------

/// A named shared memory mapping of a fixed size.
///
/// `open_or_create` tries exclusive creation first so that exactly one
/// process learns it is the creator and runs one-time initialization; a
/// non-creator waits for the file to reach its full size before mapping
/// (the creator's `ftruncate` may not have happened yet).
pub(crate) struct RawMapping {
    mem: *mut u8,
    size: usize,
    object_name: String,
    created: bool,
}

// Safety: the mapping is process-shared by design; all mutation goes
// through atomics, pthread primitives, or the region mutex.
unsafe impl Send for RawMapping {}
unsafe impl Sync for RawMapping {}

impl RawMapping {
    pub(crate) fn open_or_create(physical_name: &str, size: usize) -> io::Result<Self> {
        if physical_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let object_name = shm_name::object_name(physical_name);
        let c_name = CString::new(object_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o666;

        // Exclusive create first: only the creator runs ftruncate, and on
        // macOS ftruncate on an already-sized object can fail after zeroing
        // its contents.
        let (fd, created) = {
            let f = unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                    perms as libc::c_uint,
                )
            };
            if f != -1 {
                (f, true)
            } else {
                let e = io::Error::last_os_error();
                if e.raw_os_error() != Some(libc::EEXIST) {
                    return Err(e);
                }
                let f2 =
                    unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint) };
                if f2 == -1 {
                    return Err(io::Error::last_os_error());
                }
                (f2, false)
            }
        };

        unsafe { libc::fchmod(fd, perms) };

        if created {
            let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            if ret != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        } else {
            // The creator may still be between shm_open and ftruncate.
            // Mapping past EOF faults on first touch, so wait for the file
            // to reach its full size.
            let mut k = 0u32;
            let mut attempts = 0u32;
            loop {
                let mut st: libc::stat = unsafe { std::mem::zeroed() };
                if unsafe { libc::fstat(fd, &mut st) } != 0 {
                    let err = io::Error::last_os_error();
                    unsafe { libc::close(fd) };
                    return Err(err);
                }
                if st.st_size as usize >= size {
                    break;
                }
                attempts += 1;
                if attempts > 4096 {
                    unsafe { libc::close(fd) };
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "shared region never reached its full size",
                    ));
                }
                backoff::step(&mut k);
            }
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
            object_name,
            created,
        })
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    /// Whether this handle created the object (and must initialize it).
    pub(crate) fn created(&self) -> bool {
        self.created
    }

    /// Remove the backing OS object. Existing mappings stay valid.
    pub(crate) fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.object_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for RawMapping {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}

// ---------------------------------------------------------------------------
// Process-shared pthread mutex in caller-provided memory
// ---------------------------------------------------------------------------

/// Initialize a process-shared (robust where available) mutex in place.
///
/// # Safety
/// `mtx` must point to writable memory inside a `MAP_SHARED` mapping, and no
/// other process may be using the mutex concurrently.
pub(crate) unsafe fn mutex_init(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    ptr::write_bytes(mtx, 0, 1);

    let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
    let mut eno = libc::pthread_mutexattr_init(&mut attr);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }

    eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if eno != 0 {
        libc::pthread_mutexattr_destroy(&mut attr);
        return Err(io::Error::from_raw_os_error(eno));
    }

    #[cfg(not(target_os = "macos"))]
    {
        eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
        if eno != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(io::Error::from_raw_os_error(eno));
        }
    }

    eno = libc::pthread_mutex_init(mtx, &attr);
    libc::pthread_mutexattr_destroy(&mut attr);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

/// Lock, recovering from a dead previous owner on robust mutexes.
///
/// # Safety
/// `mtx` must point to a mutex initialized with [`mutex_init`].
pub(crate) unsafe fn mutex_lock(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    let eno = libc::pthread_mutex_lock(mtx);
    match eno {
        0 => Ok(()),
        #[cfg(not(target_os = "macos"))]
        EOWNERDEAD => {
            let eno2 = pthread_mutex_consistent(mtx);
            if eno2 != 0 {
                return Err(io::Error::from_raw_os_error(eno2));
            }
            Ok(())
        }
        _ => Err(io::Error::from_raw_os_error(eno)),
    }
}

/// Timed lock. Returns `Ok(true)` if acquired within `timeout_ms`,
/// `Ok(false)` on timeout.
///
/// # Safety
/// `mtx` must point to a mutex initialized with [`mutex_init`].
pub(crate) unsafe fn mutex_lock_timed(
    mtx: *mut libc::pthread_mutex_t,
    timeout_ms: u64,
) -> io::Result<bool> {
    #[cfg(target_os = "macos")]
    {
        // macOS lacks pthread_mutex_timedlock — emulate via try-lock polling.
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        let mut k = 0u32;
        loop {
            let eno = libc::pthread_mutex_trylock(mtx);
            match eno {
                0 => return Ok(true),
                libc::EBUSY => {}
                _ => return Err(io::Error::from_raw_os_error(eno)),
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            backoff::step(&mut k);
        }
    }
    #[cfg(not(target_os = "macos"))]
    {
        let ts = realtime_deadline(timeout_ms.saturating_mul(1000));
        loop {
            let eno = pthread_mutex_timedlock(mtx, &ts);
            match eno {
                0 => return Ok(true),
                libc::ETIMEDOUT => return Ok(false),
                EOWNERDEAD => {
                    let eno2 = pthread_mutex_consistent(mtx);
                    if eno2 != 0 {
                        return Err(io::Error::from_raw_os_error(eno2));
                    }
                    return Ok(true);
                }
                libc::EINTR => continue,
                _ => return Err(io::Error::from_raw_os_error(eno)),
            }
        }
    }
}

/// # Safety
/// `mtx` must point to a mutex initialized with [`mutex_init`] and locked
/// by this thread.
pub(crate) unsafe fn mutex_unlock(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    let eno = libc::pthread_mutex_unlock(mtx);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Process-shared condition variable in caller-provided memory
// ---------------------------------------------------------------------------

/// Initialize a process-shared condition variable in place.
///
/// # Safety
/// `cond` must point to writable memory inside a `MAP_SHARED` mapping, and
/// no other process may be using it concurrently.
pub(crate) unsafe fn cond_init(cond: *mut libc::pthread_cond_t) -> io::Result<()> {
    ptr::write_bytes(cond, 0, 1);

    let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
    let mut eno = libc::pthread_condattr_init(&mut attr);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }

    eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if eno != 0 {
        libc::pthread_condattr_destroy(&mut attr);
        return Err(io::Error::from_raw_os_error(eno));
    }

    eno = libc::pthread_cond_init(cond, &attr);
    libc::pthread_condattr_destroy(&mut attr);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

/// Absolute `CLOCK_REALTIME` deadline `timeout_us` from now, for
/// `pthread_cond_timedwait` / `pthread_mutex_timedlock`.
pub(crate) fn realtime_deadline(timeout_us: u64) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    let ns_total = ts.tv_nsec as u64 + (timeout_us % 1_000_000) * 1_000;
    ts.tv_sec +=
        (timeout_us / 1_000_000) as libc::time_t + (ns_total / 1_000_000_000) as libc::time_t;
    ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;
    ts
}

// ---------------------------------------------------------------------------
// Process liveness
// ---------------------------------------------------------------------------

/// Whether `pid` names a live process. `kill(pid, 0)` performs no signal
/// delivery; `EPERM` still means the process exists.
pub(crate) fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

pub(crate) fn current_pid() -> i32 {
    unsafe { libc::getpid() }
}
