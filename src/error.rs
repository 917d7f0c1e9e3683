pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the dispatch pipeline.
///
/// Synchronous calls (discovery, context construction, build, argument
/// binding, enqueue validation) return these immediately. Failures of
/// asynchronous commands only surface at a host synchronization point,
/// as [`Error::ExecutionFailed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no compute platform found")]
    NoPlatformFound,

    #[error("incompatible device set: {0}")]
    IncompatibleDeviceSet(String),

    #[error("no matching device: {0}")]
    NoMatchingDevice(String),

    #[error("invalid device: {0}")]
    InvalidDevice(String),

    #[error("program build failed:\n{log}")]
    Build { log: String },

    #[error("kernel `{0}` not found in program")]
    KernelNotFound(String),

    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),

    #[error("access violation: {0}")]
    AccessViolation(String),

    #[error("invalid buffer size: {0}")]
    InvalidBufferSize(String),

    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    #[error("invalid copy: {0}")]
    InvalidCopy(String),

    #[error("invalid work shape: {0}")]
    InvalidWorkShape(String),

    #[error("context mismatch: {0}")]
    ContextMismatch(String),

    #[error("profiling information unavailable: queue was created without profiling")]
    ProfilingUnavailable,

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("driver error: {0}")]
    Driver(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    pub fn argument<S: Into<String>>(msg: S) -> Self {
        Error::ArgumentMismatch(msg.into())
    }

    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Error::ExecutionFailed(msg.into())
    }

    pub fn driver<S: Into<String>>(msg: S) -> Self {
        Error::Driver(msg.into())
    }

    pub fn build<S: Into<String>>(log: S) -> Self {
        Error::Build { log: log.into() }
    }

    /// Whether the caller is expected to retry with a different device
    /// category or device list.
    pub fn is_device_selection(&self) -> bool {
        matches!(
            self,
            Error::NoMatchingDevice(_) | Error::IncompatibleDeviceSet(_)
        )
    }
}
