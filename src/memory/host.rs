use bytemuck::Pod;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Host memory on either end of a queued copy.
///
/// A copy from host memory reads the region at enqueue time. A copy into
/// host memory writes it when the copy runs.
pub trait HostRegion: Send + Sync {
    fn byte_len(&self) -> usize;

    /// Copy the first `out.len()` bytes of the region into `out`.
    fn read_bytes(&self, out: &mut [u8]);

    /// Overwrite the first `src.len()` bytes of the region.
    fn write_bytes(&self, src: &[u8]);
}

impl<T: Pod + Send + Sync> HostRegion for RwLock<Vec<T>> {
    fn byte_len(&self) -> usize {
        self.read().len() * std::mem::size_of::<T>()
    }

    fn read_bytes(&self, out: &mut [u8]) {
        let data = self.read();
        let bytes: &[u8] = bytemuck::cast_slice(&data[..]);
        out.copy_from_slice(&bytes[..out.len()]);
    }

    fn write_bytes(&self, src: &[u8]) {
        let mut data = self.write();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut data[..]);
        bytes[..src.len()].copy_from_slice(src);
    }
}

/// One-dimensional numeric array shared between the host and pending
/// copies.
///
/// Writing from a `HostArray` snapshots its contents at enqueue, so the
/// array may be reused right away. A copy into a `HostArray` lands when
/// the copy's event completes; read the contents after waiting on it.
pub struct HostArray<T: Pod> {
    data: Arc<RwLock<Vec<T>>>,
}

impl<T: Pod + Send + Sync> HostArray<T> {
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self::from_vec(vec![T::zeroed(); len])
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.data.read().clone()
    }

    /// Replace the contents. The length stays what it was.
    pub fn fill_from(&self, src: &[T]) {
        let mut data = self.data.write();
        let n = data.len().min(src.len());
        data[..n].copy_from_slice(&src[..n]);
    }

    pub(crate) fn region(&self) -> Arc<dyn HostRegion> {
        self.data.clone()
    }
}

impl<T: Pod> Clone for HostArray<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Pod + fmt::Debug> fmt::Debug for HostArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostArray").field(&*self.data.read()).finish()
    }
}

impl<T: Pod + Send + Sync> From<Vec<T>> for HostArray<T> {
    fn from(data: Vec<T>) -> Self {
        Self::from_vec(data)
    }
}
