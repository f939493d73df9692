//! State codes reported by the platform filesystem

/// A state code returned by [`FileSystem`](super::FileSystem) operations.
///
/// This enum defines the errors a resource store can report. It is designed
/// to be simple and portable for `no_std` environments.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// No resource with the requested name exists.
    ResourceNotAvailable,
    /// The handle does not refer to an open resource.
    InvalidHandle,
    /// An offset past the end of the resource was requested.
    OutOfBounds,
    /// An error occurred during a read operation.
    ReadError,
    /// An error occurred during a write operation.
    WriteError,
    /// The store does not allow this operation (e.g. writing a read-only image).
    NotSupported,
    /// No more handles can be opened.
    TooManyOpen,
}

impl From<Error> for crate::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::ResourceNotAvailable => crate::Error::ResourceNotAvailable,
            Error::NotSupported => crate::Error::NotSupported,
            Error::TooManyOpen => crate::Error::OutOfMemory,
            Error::InvalidHandle | Error::OutOfBounds | Error::ReadError | Error::WriteError => {
                crate::Error::FilesystemError
            }
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::ResourceNotAvailable => defmt::write!(f, "ResourceNotAvailable"),
            Error::InvalidHandle => defmt::write!(f, "InvalidHandle"),
            Error::OutOfBounds => defmt::write!(f, "OutOfBounds"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::NotSupported => defmt::write!(f, "NotSupported"),
            Error::TooManyOpen => defmt::write!(f, "TooManyOpen"),
        }
    }
}
