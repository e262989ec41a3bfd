//! Cross-process shared state.
//!
//! A `SharedRegion<T>` is a POSIX shared-memory object holding exactly one
//! `T`. The owner creates (and finally unlinks) it; every other process opens
//! a non-owning handle, read-only or read-write.
//!
//! In [`SharedStateMode::Locked`] every `read` and `write` holds a named
//! semaphore, so a reader always sees a complete update. In
//! [`SharedStateMode::Legacy`] there is no synchronisation at all: a reader
//! racing a writer can observe a stale or torn value. That mode exists only
//! for compatibility runs that rely on exactly this behavior.

use std::ffi::CString;
use std::io;
use std::marker::PhantomData;
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::thread;
use std::time::Duration;

use bytemuck::Pod;
use thiserror::Error;

use dronesim_core::enums::SharedStateMode;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid shared region name {0:?}")]
    InvalidName(String),
    #[error("shared region {name} does not exist (yet)")]
    NotFound { name: String },
    #[error("{op} failed for {name}: {source}")]
    Os {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("shared region {name} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("shared region {name} is mapped read-only")]
    ReadOnly { name: String },
}

impl StoreError {
    fn last_os(op: &'static str, name: &str) -> Self {
        StoreError::Os {
            op,
            name: name.to_string(),
            source: io::Error::last_os_error(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Region names of one run. Distinct runs never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionNames {
    pub drone: String,
    pub score: String,
}

impl RegionNames {
    pub fn for_run(run_id: &str) -> Self {
        Self {
            drone: format!("/dronesim-{run_id}-drone"),
            score: format!("/dronesim-{run_id}-score"),
        }
    }
}

fn posix_name(name: &str) -> Result<CString, StoreError> {
    let valid = name.len() > 1
        && name.len() < 250
        && name.starts_with('/')
        && !name[1..].contains('/');
    if !valid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| StoreError::InvalidName(name.to_string()))
}

fn lock_name(region: &str) -> String {
    format!("{region}-lock")
}

pub struct SharedRegion<T: Pod> {
    name: String,
    c_name: CString,
    ptr: NonNull<T>,
    access: Access,
    owner: bool,
    lock: Option<NamedSemaphore>,
    _marker: PhantomData<T>,
}

// SAFETY: the mapping and the semaphore are process-wide resources; nothing
// in the handle is tied to the thread that created it.
unsafe impl<T: Pod> Send for SharedRegion<T> {}

impl<T: Pod> SharedRegion<T> {
    /// Create the region and fill it with `initial`. Any stale region left by
    /// a crashed run under the same name is replaced.
    pub fn create(name: &str, initial: T, mode: SharedStateMode) -> Result<Self, StoreError> {
        let c_name = posix_name(name)?;

        // The lock exists before the region so an opener that finds the
        // region also finds its lock.
        let lock = match mode {
            SharedStateMode::Locked => Some(NamedSemaphore::create(&lock_name(name))?),
            SharedStateMode::Legacy => None,
        };

        // SAFETY: c_name is a valid NUL-terminated string.
        unsafe { libc::shm_unlink(c_name.as_ptr()) };
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(StoreError::last_os("shm_open", name));
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        if unsafe { libc::ftruncate(fd.as_raw_fd(), size_of::<T>() as libc::off_t) } < 0 {
            let err = StoreError::last_os("ftruncate", name);
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(err);
        }

        let ptr = match map::<T>(&fd, Access::ReadWrite, name) {
            Ok(ptr) => ptr,
            Err(err) => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(err);
            }
        };

        let region = Self {
            name: name.to_string(),
            c_name,
            ptr,
            access: Access::ReadWrite,
            owner: true,
            lock,
            _marker: PhantomData,
        };
        region.write(|value| *value = initial)?;
        tracing::debug!(region = name, bytes = size_of::<T>(), ?mode, "shared region created");
        Ok(region)
    }

    /// Open an existing region. Fails with `NotFound` while the owner has not
    /// finished creating it.
    pub fn open(name: &str, access: Access, mode: SharedStateMode) -> Result<Self, StoreError> {
        let c_name = posix_name(name)?;

        let lock = match mode {
            SharedStateMode::Locked => Some(NamedSemaphore::open(&lock_name(name))?),
            SharedStateMode::Legacy => None,
        };

        let oflag = match access {
            Access::ReadOnly => libc::O_RDONLY,
            Access::ReadWrite => libc::O_RDWR,
        };
        // SAFETY: c_name is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), oflag, 0) };
        if fd < 0 {
            let source = io::Error::last_os_error();
            if source.kind() == io::ErrorKind::NotFound {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                });
            }
            return Err(StoreError::Os {
                op: "shm_open",
                name: name.to_string(),
                source,
            });
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // SAFETY: stat is plain data and fully written by fstat on success.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } < 0 {
            return Err(StoreError::last_os("fstat", name));
        }
        let actual = stat.st_size as usize;
        if actual == 0 {
            // Created but not sized yet.
            return Err(StoreError::NotFound {
                name: name.to_string(),
            });
        }
        if actual != size_of::<T>() {
            return Err(StoreError::SizeMismatch {
                name: name.to_string(),
                expected: size_of::<T>(),
                actual,
            });
        }

        let ptr = map::<T>(&fd, access, name)?;
        Ok(Self {
            name: name.to_string(),
            c_name,
            ptr,
            access,
            owner: false,
            lock,
            _marker: PhantomData,
        })
    }

    /// `open` with bounded retry while the region is `NotFound`.
    pub fn open_with_retry(
        name: &str,
        access: Access,
        mode: SharedStateMode,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, StoreError> {
        let mut attempt = 1;
        loop {
            match Self::open(name, access, mode) {
                Err(StoreError::NotFound { .. }) if attempt < attempts => {
                    tracing::debug!(region = name, attempt, "shared region not ready, retrying");
                    thread::sleep(backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Snapshot of the current value.
    pub fn read(&self) -> Result<T, StoreError> {
        let _guard = self.acquire()?;
        // SAFETY: ptr maps size_of::<T>() readable bytes for the life of
        // self, and any bit pattern is a valid T.
        Ok(unsafe { ptr::read_volatile(self.ptr.as_ptr()) })
    }

    /// Read-modify-write under the lock. The mutator sees a private copy;
    /// the result is stored back in one go.
    pub fn write<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        if self.access == Access::ReadOnly {
            return Err(StoreError::ReadOnly {
                name: self.name.clone(),
            });
        }
        let _guard = self.acquire()?;
        // SAFETY: as in `read`; the mapping is writable for ReadWrite handles.
        unsafe {
            let mut value = ptr::read_volatile(self.ptr.as_ptr());
            let result = mutate(&mut value);
            ptr::write_volatile(self.ptr.as_ptr(), value);
            Ok(result)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn access(&self) -> Access {
        self.access
    }

    fn acquire(&self) -> Result<Option<SemaphoreGuard<'_>>, StoreError> {
        self.lock.as_ref().map(NamedSemaphore::acquire).transpose()
    }
}

impl<T: Pod> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping created in `map`.
        unsafe { libc::munmap(self.ptr.as_ptr().cast(), size_of::<T>()) };
        if self.owner {
            unsafe { libc::shm_unlink(self.c_name.as_ptr()) };
            tracing::debug!(region = %self.name, "shared region unlinked");
        }
    }
}

fn map<T>(fd: &OwnedFd, access: Access, name: &str) -> Result<NonNull<T>, StoreError> {
    let prot = match access {
        Access::ReadOnly => libc::PROT_READ,
        Access::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
    };
    // SAFETY: fd refers to a shared-memory object of at least size_of::<T>() bytes.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size_of::<T>(),
            prot,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(StoreError::last_os("mmap", name));
    }
    NonNull::new(addr.cast::<T>()).ok_or_else(|| StoreError::last_os("mmap", name))
}

struct NamedSemaphore {
    name: String,
    c_name: CString,
    sem: NonNull<libc::sem_t>,
    owner: bool,
}

// SAFETY: a named semaphore handle is valid from any thread of the process.
unsafe impl Send for NamedSemaphore {}

impl NamedSemaphore {
    fn create(name: &str) -> Result<Self, StoreError> {
        let c_name = posix_name(name)?;
        unsafe { libc::sem_unlink(c_name.as_ptr()) };
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        Self::from_raw(name, c_name, sem, true)
    }

    fn open(name: &str) -> Result<Self, StoreError> {
        let c_name = posix_name(name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::from_raw(name, c_name, sem, false)
    }

    fn from_raw(
        name: &str,
        c_name: CString,
        sem: *mut libc::sem_t,
        owner: bool,
    ) -> Result<Self, StoreError> {
        if sem == libc::SEM_FAILED {
            let source = io::Error::last_os_error();
            if source.kind() == io::ErrorKind::NotFound {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                });
            }
            return Err(StoreError::Os {
                op: "sem_open",
                name: name.to_string(),
                source,
            });
        }
        let sem = NonNull::new(sem).ok_or_else(|| StoreError::last_os("sem_open", name))?;
        Ok(Self {
            name: name.to_string(),
            c_name,
            sem,
            owner,
        })
    }

    fn acquire(&self) -> Result<SemaphoreGuard<'_>, StoreError> {
        loop {
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(SemaphoreGuard(self));
            }
            let source = io::Error::last_os_error();
            if source.kind() != io::ErrorKind::Interrupted {
                return Err(StoreError::Os {
                    op: "sem_wait",
                    name: self.name.clone(),
                    source,
                });
            }
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem.as_ptr()) };
        if self.owner {
            unsafe { libc::sem_unlink(self.c_name.as_ptr()) };
        }
    }
}

struct SemaphoreGuard<'a>(&'a NamedSemaphore);

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        unsafe { libc::sem_post(self.0.sem.as_ptr()) };
    }
}
