use super::{driver_error, ClContext, ClShared};
use crate::error::{Error, Result};
use crate::memory::AccessMode;
use opencl3::memory::{
    Buffer, ClMem, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY,
};
use opencl3::types::{cl_mem, cl_mem_flags, CL_BLOCKING};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

fn mode_flags(access: AccessMode) -> cl_mem_flags {
    match access {
        AccessMode::ReadOnly => CL_MEM_READ_ONLY,
        AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
        AccessMode::ReadWrite => CL_MEM_READ_WRITE,
    }
}

/// Device memory behind a [`crate::memory::Buffer`]. `None` once released.
pub(crate) struct ClBuffer {
    shared: Arc<ClShared>,
    mem: RwLock<Option<Buffer<u8>>>,
}

// SAFETY: the cl_mem handle is reference counted by the driver and valid on
// any thread; access to it goes through the lock.
unsafe impl Send for ClBuffer {}
unsafe impl Sync for ClBuffer {}

impl ClContext {
    /// Device buffer initialized from `data`, which holds the full size.
    pub(crate) fn create_buffer(&self, access: AccessMode, mut data: Vec<u8>) -> Result<ClBuffer> {
        let flags = mode_flags(access) | CL_MEM_COPY_HOST_PTR;
        // SAFETY: `data` is `data.len()` bytes and outlives the call; the
        // driver copies it before returning.
        let mem = unsafe {
            Buffer::<u8>::create(&self.shared.context, flags, data.len(), data.as_mut_ptr().cast())
                .map_err(driver_error("clCreateBuffer"))?
        };

        Ok(ClBuffer {
            shared: Arc::clone(&self.shared),
            mem: RwLock::new(Some(mem)),
        })
    }
}

impl ClBuffer {
    pub(crate) fn release(&self) {
        self.mem.write().take();
    }

    /// Blocking copy of the first `out.len()` bytes.
    pub(crate) fn read(&self, out: &mut [u8]) -> Result<()> {
        let mem = self.mem.read();
        let mem = mem.as_ref().ok_or_else(gone)?;
        // SAFETY: blocking read into a live slice no larger than the buffer.
        unsafe {
            self.shared
                .transfer
                .enqueue_read_buffer(mem, CL_BLOCKING, 0, out, &[])
                .map_err(driver_error("clEnqueueReadBuffer"))?;
        }
        Ok(())
    }

    /// Blocking overwrite of the first `src.len()` bytes.
    pub(crate) fn write(&self, src: &[u8]) -> Result<()> {
        let mut mem = self.mem.write();
        let mem = mem.as_mut().ok_or_else(gone)?;
        // SAFETY: blocking write from a live slice no larger than the buffer.
        unsafe {
            self.shared
                .transfer
                .enqueue_write_buffer(mem, CL_BLOCKING, 0, src, &[])
                .map_err(driver_error("clEnqueueWriteBuffer"))?;
        }
        Ok(())
    }

    /// Pin the handle for the duration of a launch. The same buffer may be
    /// bound to several parameters of one launch.
    pub(crate) fn pin(&self) -> Result<PinnedMem<'_>> {
        let guard = self.mem.read_recursive();
        if guard.is_none() {
            return Err(gone());
        }
        Ok(PinnedMem { guard })
    }
}

pub(crate) struct PinnedMem<'a> {
    guard: RwLockReadGuard<'a, Option<Buffer<u8>>>,
}

impl PinnedMem<'_> {
    pub(crate) fn raw(&self) -> Option<cl_mem> {
        self.guard.as_ref().map(|mem| mem.get())
    }
}

fn gone() -> Error {
    Error::execution("buffer storage is gone")
}
