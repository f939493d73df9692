//! # Resource storage for embedded systems
//!
//! The session manager needs a small amount of persistent data, most
//! importantly the CA certificate bundle used to authenticate the broker.
//! Where that data lives is platform specific: a littlefs partition, a
//! FAT volume on an SD card, a flash region baked into the firmware image.
//! This module defines the [`FileSystem`] contract a board support package
//! implements, plus two things built on top of it:
//!
//! - [`load_resource`] / [`store_resource`]: whole-resource helpers that
//!   always release the handle, even when a read or write fails.
//! - [`memory::MemoryFs`]: a read-only store over a static table, which
//!   is what most firmware ships its built-in certificates in.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────┐      ┌──────────────────────┐
//! │  TLS session    │─────►│   load_resource()    │
//! │  adapter        │      └──────────┬───────────┘
//! └─────────────────┘                 │ stat/open/read/close
//!                                     ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                  FileSystem trait                    │
//! └──────────────────────────────────────────────────────┘
//!           │                         │
//!           ▼                         ▼
//! ┌─────────────────┐      ┌──────────────────────┐
//! │    MemoryFs     │      │  platform filesystem │
//! │ (static table)  │      │  (littlefs, FAT, ..) │
//! └─────────────────┘      └──────────────────────┘
//! ```
//!
//! # Usage Examples
//!
//! ```rust
//! use libiot_connect::storage::{load_resource, memory::MemoryFs};
//!
//! static RESOURCES: &[(&str, &[u8])] = &[("roots.pem", b"-----BEGIN CERTIFICATE-----")];
//!
//! let mut fs: MemoryFs<'_> = MemoryFs::new(RESOURCES);
//! let mut buf = [0u8; 64];
//! let len = load_resource(&mut fs, "roots.pem", &mut buf).unwrap();
//! assert!(buf[..len].starts_with(b"-----BEGIN"));
//! ```

#![allow(missing_docs)]

/// Filesystem state codes
pub mod error;

/// Read-only in-memory filesystem
pub mod memory;


use error::Error;

/// Resource name of the CA certificate bundle loaded before each handshake.
pub const DEFAULT_CA_CERTIFICATES: &str = "roots.pem";

/// Opaque identifier of an open resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResourceHandle(pub u32);

/// Access mode requested from [`FileSystem::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenMode {
    Read,
    /// Truncates an existing resource or creates a new one.
    Write,
}

/// Metadata returned by [`FileSystem::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stat {
    pub size: usize,
}

/// The filesystem half of the board support package.
pub trait FileSystem {
    fn stat(&mut self, name: &str) -> Result<Stat, Error>;

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<ResourceHandle, Error>;

    /// Reads from `offset` into `buf`. Returns `Ok(0)` at the end.
    fn read(
        &mut self,
        handle: ResourceHandle,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, Error>;

    fn write(&mut self, handle: ResourceHandle, offset: usize, buf: &[u8])
    -> Result<usize, Error>;

    fn close(&mut self, handle: ResourceHandle) -> Result<(), Error>;

    fn remove(&mut self, name: &str) -> Result<(), Error>;
}

/// Reads a whole resource into `buf` and returns its length.
///
/// # Errors
///
/// - [`Error::ResourceNotAvailable`](crate::Error::ResourceNotAvailable) if
///   the resource does not exist
/// - [`Error::BufferTooSmall`](crate::Error::BufferTooSmall) if it does not
///   fit into `buf`
/// - [`Error::FilesystemError`](crate::Error::FilesystemError) for I/O
///   failures, including a resource that ends before its reported size
pub fn load_resource<F: FileSystem>(fs: &mut F, name: &str, buf: &mut [u8]) -> crate::Result<usize> {
    let stat = fs.stat(name)?;
    if stat.size > buf.len() {
        return Err(crate::Error::BufferTooSmall);
    }

    let handle = fs.open(name, OpenMode::Read)?;
    let result = read_exact(fs, handle, &mut buf[..stat.size]);
    let closed = fs.close(handle);
    result?;
    closed?;

    debug!("loaded resource {} ({} bytes)", name, stat.size);
    Ok(stat.size)
}

/// Replaces the resource `name` with `data`.
pub fn store_resource<F: FileSystem>(fs: &mut F, name: &str, data: &[u8]) -> crate::Result<()> {
    let handle = fs.open(name, OpenMode::Write)?;
    let result = write_all(fs, handle, data);
    let closed = fs.close(handle);
    result?;
    closed?;
    Ok(())
}

fn read_exact<F: FileSystem>(fs: &mut F, handle: ResourceHandle, buf: &mut [u8]) -> crate::Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        match fs.read(handle, offset, &mut buf[offset..])? {
            0 => return Err(crate::Error::FilesystemError),
            n => offset += n,
        }
    }
    Ok(())
}

fn write_all<F: FileSystem>(fs: &mut F, handle: ResourceHandle, data: &[u8]) -> crate::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        match fs.write(handle, offset, &data[offset..])? {
            0 => return Err(crate::Error::FilesystemError),
            n => offset += n,
        }
    }
    Ok(())
}
