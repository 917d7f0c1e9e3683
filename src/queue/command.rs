use super::event::CommandType;
use crate::error::{Error, Result};
use crate::kernel::Launch;
use crate::memory::{Buffer, HostArray, HostRegion};
use crate::platform::Device;
use crate::program::interp::WorkGeometry;
use bytemuck::Pod;
use std::fmt;
use std::sync::Arc;

/// One side of a copy: device buffer or host memory.
#[derive(Clone)]
pub enum CopyEndpoint {
    Buffer(Buffer),
    Host(Arc<dyn HostRegion>),
}

impl CopyEndpoint {
    fn byte_len(&self) -> usize {
        match self {
            CopyEndpoint::Buffer(buffer) => buffer.size(),
            CopyEndpoint::Host(region) => region.byte_len(),
        }
    }
}

impl From<Buffer> for CopyEndpoint {
    fn from(buffer: Buffer) -> Self {
        CopyEndpoint::Buffer(buffer)
    }
}

impl From<&Buffer> for CopyEndpoint {
    fn from(buffer: &Buffer) -> Self {
        CopyEndpoint::Buffer(buffer.clone())
    }
}

impl<T: Pod + Send + Sync> From<&HostArray<T>> for CopyEndpoint {
    fn from(host: &HostArray<T>) -> Self {
        CopyEndpoint::Host(host.region())
    }
}

impl fmt::Debug for CopyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyEndpoint::Buffer(buffer) => f.debug_tuple("Buffer").field(&buffer.id()).finish(),
            CopyEndpoint::Host(region) => f.debug_tuple("Host").field(&region.byte_len()).finish(),
        }
    }
}

/// Work carried by one queue entry.
pub(crate) enum Command {
    CopyBuffer { dst: Buffer, src: Buffer, bytes: usize },
    Read { dst: Arc<dyn HostRegion>, src: Buffer, bytes: usize },
    Write { dst: Buffer, data: Vec<u8> },
    Kernel { launch: Launch, geometry: WorkGeometry },
    Marker,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::CopyBuffer { dst, src, bytes } => f
                .debug_struct("CopyBuffer")
                .field("dst", &dst.id())
                .field("src", &src.id())
                .field("bytes", bytes)
                .finish(),
            Command::Read { dst, src, bytes } => f
                .debug_struct("Read")
                .field("dst", &dst.byte_len())
                .field("src", &src.id())
                .field("bytes", bytes)
                .finish(),
            Command::Write { dst, data } => f
                .debug_struct("Write")
                .field("dst", &dst.id())
                .field("bytes", &data.len())
                .finish(),
            Command::Kernel { geometry, .. } => f
                .debug_struct("Kernel")
                .field("geometry", geometry)
                .finish_non_exhaustive(),
            Command::Marker => f.write_str("Marker"),
        }
    }
}

impl Command {
    /// Classify and validate a copy. The direction follows from the
    /// endpoint kinds; host to host is rejected.
    pub(crate) fn copy(dst: CopyEndpoint, src: CopyEndpoint) -> Result<Self> {
        let src_len = src.byte_len();
        let dst_len = dst.byte_len();

        match (dst, src) {
            (CopyEndpoint::Host(_), CopyEndpoint::Host(_)) => Err(Error::InvalidCopy(
                "host to host copies are not queued; copy on the host".to_string(),
            )),
            (CopyEndpoint::Buffer(dst), CopyEndpoint::Buffer(src)) => {
                if src_len > dst_len {
                    return Err(Error::InvalidCopy(format!(
                        "source buffer of {} bytes does not fit destination of {} bytes",
                        src_len, dst_len
                    )));
                }
                Ok(Command::CopyBuffer {
                    dst,
                    src,
                    bytes: src_len,
                })
            }
            (CopyEndpoint::Buffer(dst), CopyEndpoint::Host(src)) => {
                if src_len > dst_len {
                    return Err(Error::InvalidCopy(format!(
                        "host region of {} bytes does not fit buffer of {} bytes",
                        src_len, dst_len
                    )));
                }
                let mut data = vec![0u8; src_len];
                src.read_bytes(&mut data);
                Ok(Command::Write { dst, data })
            }
            (CopyEndpoint::Host(dst), CopyEndpoint::Buffer(src)) => {
                if dst_len > src_len {
                    return Err(Error::InvalidCopy(format!(
                        "host region of {} bytes is larger than buffer of {} bytes",
                        dst_len, src_len
                    )));
                }
                Ok(Command::Read {
                    dst,
                    src,
                    bytes: dst_len,
                })
            }
        }
    }

    pub(crate) fn command_type(&self) -> CommandType {
        match self {
            Command::CopyBuffer { .. } => CommandType::CopyBuffer,
            Command::Read { .. } => CommandType::ReadBuffer,
            Command::Write { .. } => CommandType::WriteBuffer,
            Command::Kernel { .. } => CommandType::NdRangeKernel,
            Command::Marker => CommandType::Marker,
        }
    }

    pub(crate) fn bytes(&self) -> usize {
        match self {
            Command::CopyBuffer { bytes, .. } | Command::Read { bytes, .. } => *bytes,
            Command::Write { data, .. } => data.len(),
            Command::Kernel { .. } | Command::Marker => 0,
        }
    }

    /// Buffers the command touches, for enqueue-time checks.
    pub(crate) fn buffers(&self) -> Vec<&Buffer> {
        match self {
            Command::CopyBuffer { dst, src, .. } => vec![dst, src],
            Command::Read { src, .. } => vec![src],
            Command::Write { dst, .. } => vec![dst],
            Command::Kernel { .. } | Command::Marker => Vec::new(),
        }
    }

    /// Run the command. Kernels return the execution time measured by
    /// the device, when the driver reports one.
    pub(crate) fn execute(&self, device: &Device) -> Result<Option<u64>> {
        match self {
            Command::CopyBuffer { dst, src, bytes } => {
                // Staged so that two opposite copies never hold both locks.
                let mut staging = vec![0u8; *bytes];
                src.read_bytes(&mut staging)?;
                dst.write_bytes(&staging)?;
            }
            Command::Read { dst, src, bytes } => {
                let mut staging = vec![0u8; *bytes];
                src.read_bytes(&mut staging)?;
                dst.write_bytes(&staging);
            }
            Command::Write { dst, data } => dst.write_bytes(data)?,
            Command::Kernel { launch, geometry } => return launch.run(device, *geometry),
            Command::Marker => {}
        }
        Ok(None)
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Command::Kernel { launch, .. } => format!("kernel `{}`", launch.name()),
            other => format!("{:?} of {} bytes", other.command_type(), other.bytes()),
        }
    }
}
