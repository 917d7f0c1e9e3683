use crate::context::{Context, ContextBackend, ContextShared};
use crate::error::{Error, Result};
use bytemuck::Pod;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

/// How kernels may access a buffer.
///
/// The mode is fixed at allocation and checked when a kernel is enqueued:
/// binding a `ReadOnly` buffer to a parameter the kernel stores through, or
/// a `WriteOnly` buffer to one it loads from, fails with
/// `Error::AccessViolation`. Host-side copies are not restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn kernel_can_read(self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    pub fn kernel_can_write(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

pub(crate) struct BufferShared {
    pub(crate) id: BufferId,
    pub(crate) context: Arc<ContextShared>,
    pub(crate) size: usize,
    pub(crate) access: AccessMode,
    storage: Storage,
    released: AtomicBool,
}

/// Where a buffer's bytes live.
enum Storage {
    Host(RwLock<Vec<u8>>),
    #[cfg(feature = "opencl")]
    OpenCl(crate::opencl::ClBuffer),
}

/// Device-visible memory region owned by a context.
///
/// Handles are cheap to clone and share the same storage. Concurrent
/// kernel reads are fine; overlapping writes from commands with no event
/// dependency between them race and the resulting contents are undefined.
#[derive(Clone)]
pub struct Buffer {
    pub(crate) shared: Arc<BufferShared>,
}

impl Buffer {
    /// Allocate `size` bytes. When `host_seed` is given its bytes are copied
    /// into the start of the buffer once, at allocation time.
    pub fn allocate(
        context: &Context,
        size: usize,
        access: AccessMode,
        host_seed: Option<&[u8]>,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidBufferSize("buffer size must be > 0".to_string()));
        }

        let limit = context
            .devices()
            .iter()
            .map(|d| d.info().global_mem_size)
            .max()
            .unwrap_or(0);
        if size as u64 > limit {
            return Err(Error::InvalidBufferSize(format!(
                "{} bytes exceeds device memory of {} bytes",
                size, limit
            )));
        }

        let mut data = vec![0u8; size];
        if let Some(seed) = host_seed {
            if seed.len() > size {
                return Err(Error::InvalidBufferSize(format!(
                    "host seed of {} bytes does not fit in {} bytes",
                    seed.len(),
                    size
                )));
            }
            data[..seed.len()].copy_from_slice(seed);
        }

        let storage = match &context.shared.backend {
            ContextBackend::Host => Storage::Host(RwLock::new(data)),
            #[cfg(feature = "opencl")]
            ContextBackend::OpenCl(cl) => Storage::OpenCl(cl.create_buffer(access, data)?),
        };

        let id = BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(buffer = ?id, size, ?access, seeded = host_seed.is_some(), "allocated buffer");

        #[cfg(feature = "telemetry")]
        context.metrics().record_allocation(size);

        Ok(Self {
            shared: Arc::new(BufferShared {
                id,
                context: Arc::clone(&context.shared),
                size,
                access,
                storage,
                released: AtomicBool::new(false),
            }),
        })
    }

    /// Zeroed buffer holding `len` elements of `T`.
    pub fn new<T: Pod>(context: &Context, access: AccessMode, len: usize) -> Result<Self> {
        let size = len.checked_mul(std::mem::size_of::<T>()).ok_or_else(|| {
            Error::InvalidBufferSize(format!(
                "{} elements of {} bytes overflow the address space",
                len,
                std::mem::size_of::<T>()
            ))
        })?;
        Self::allocate(context, size, access, None)
    }

    /// Buffer seeded with a copy of `data`.
    pub fn from_slice<T: Pod>(context: &Context, access: AccessMode, data: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        Self::allocate(context, bytes.len(), access, Some(bytes))
    }

    pub fn id(&self) -> BufferId {
        self.shared.id
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn access_mode(&self) -> AccessMode {
        self.shared.access
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Free the storage early. Safe to call any number of times; later use
    /// of this buffer (or any clone of it) fails with `InvalidBuffer`.
    pub fn release(&self) {
        if !self.shared.released.swap(true, Ordering::AcqRel) {
            match &self.shared.storage {
                Storage::Host(data) => *data.write() = Vec::new(),
                #[cfg(feature = "opencl")]
                Storage::OpenCl(buffer) => buffer.release(),
            }
            tracing::trace!(buffer = ?self.shared.id, "released buffer");
        }
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_released() {
            return Err(Error::InvalidBuffer(format!(
                "buffer {:?} has been released",
                self.shared.id
            )));
        }
        Ok(())
    }

    /// Host-memory bytes, when the buffer lives in host memory.
    pub(crate) fn host_storage(&self) -> Option<&RwLock<Vec<u8>>> {
        match &self.shared.storage {
            Storage::Host(data) => Some(data),
            #[cfg(feature = "opencl")]
            Storage::OpenCl(_) => None,
        }
    }

    #[cfg(feature = "opencl")]
    pub(crate) fn cl_storage(&self) -> Option<&crate::opencl::ClBuffer> {
        match &self.shared.storage {
            Storage::OpenCl(buffer) => Some(buffer),
            Storage::Host(_) => None,
        }
    }

    /// Copy the first `out.len()` bytes of the buffer.
    pub(crate) fn read_bytes(&self, out: &mut [u8]) -> Result<()> {
        self.ensure_live()?;
        match &self.shared.storage {
            Storage::Host(data) => {
                let data = data.read();
                let src = data
                    .get(..out.len())
                    .ok_or_else(|| Error::execution("buffer storage is gone"))?;
                out.copy_from_slice(src);
                Ok(())
            }
            #[cfg(feature = "opencl")]
            Storage::OpenCl(buffer) => buffer.read(out),
        }
    }

    /// Overwrite the first `src.len()` bytes of the buffer.
    pub(crate) fn write_bytes(&self, src: &[u8]) -> Result<()> {
        self.ensure_live()?;
        match &self.shared.storage {
            Storage::Host(data) => {
                let mut data = data.write();
                let dst = data
                    .get_mut(..src.len())
                    .ok_or_else(|| Error::execution("buffer storage is gone"))?;
                dst.copy_from_slice(src);
                Ok(())
            }
            #[cfg(feature = "opencl")]
            Storage::OpenCl(buffer) => buffer.write(src),
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.shared.id)
            .field("size", &self.shared.size)
            .field("access", &self.shared.access)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::platform::{DeviceType, Registry};

    fn context() -> Context {
        let config = Config::builder().max_workers(1).build().unwrap();
        let registry = Registry::discover(&config).unwrap();
        Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap()
    }

    #[test]
    fn test_seeded_allocation() {
        let ctx = context();
        let buf = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[1i32, 2, 3]).unwrap();
        assert_eq!(buf.size(), 12);

        let mut out = [0i32; 3];
        buf.read_bytes(bytemuck::cast_slice_mut(&mut out)).unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_seed_is_copied_once() {
        let ctx = context();
        let mut host = vec![7u8; 4];
        let buf = Buffer::allocate(&ctx, 8, AccessMode::ReadWrite, Some(&host)).unwrap();
        host[0] = 0;

        let mut out = [0u8; 8];
        buf.read_bytes(&mut out).unwrap();
        assert_eq!(out, [7, 7, 7, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn test_invalid_sizes() {
        let ctx = context();
        assert!(matches!(
            Buffer::allocate(&ctx, 0, AccessMode::ReadWrite, None),
            Err(Error::InvalidBufferSize(_))
        ));
        assert!(matches!(
            Buffer::allocate(&ctx, 2, AccessMode::ReadWrite, Some(&[1, 2, 3])),
            Err(Error::InvalidBufferSize(_))
        ));
        assert!(matches!(
            Buffer::new::<u64>(&ctx, AccessMode::ReadWrite, usize::MAX / 4),
            Err(Error::InvalidBufferSize(_))
        ));
        assert!(matches!(
            Buffer::new::<u8>(&ctx, AccessMode::ReadWrite, usize::MAX),
            Err(Error::InvalidBufferSize(_))
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let ctx = context();
        let buf = Buffer::new::<f32>(&ctx, AccessMode::WriteOnly, 16).unwrap();
        let alias = buf.clone();

        buf.release();
        buf.release();
        assert!(alias.is_released());
        assert!(matches!(alias.ensure_live(), Err(Error::InvalidBuffer(_))));
    }

    #[test]
    fn test_access_modes() {
        assert!(AccessMode::ReadOnly.kernel_can_read());
        assert!(!AccessMode::ReadOnly.kernel_can_write());
        assert!(!AccessMode::WriteOnly.kernel_can_read());
        assert!(AccessMode::ReadWrite.kernel_can_write());
    }
}
