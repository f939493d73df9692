//! Read-only [`FileSystem`] over a static resource table.

use heapless::Vec;

use super::error::Error;
use super::{FileSystem, OpenMode, ResourceHandle, Stat};

/// Serves named byte slices, typically certificates compiled into the
/// firmware with `include_bytes!`.
///
/// At most `N` resources may be open at once. Writes and removals are
/// rejected with [`Error::NotSupported`].
#[derive(Debug)]
pub struct MemoryFs<'a, const N: usize = 4> {
    resources: &'a [(&'a str, &'a [u8])],
    open: Vec<(ResourceHandle, usize), N>,
    next_handle: u32,
}

impl<'a, const N: usize> MemoryFs<'a, N> {
    pub fn new(resources: &'a [(&'a str, &'a [u8])]) -> Self {
        Self {
            resources,
            open: Vec::new(),
            next_handle: 1,
        }
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    fn find(&self, name: &str) -> Result<usize, Error> {
        self.resources
            .iter()
            .position(|(n, _)| *n == name)
            .ok_or(Error::ResourceNotAvailable)
    }

    fn resolve(&self, handle: ResourceHandle) -> Result<&'a [u8], Error> {
        self.open
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, index)| self.resources[*index].1)
            .ok_or(Error::InvalidHandle)
    }
}

impl<const N: usize> FileSystem for MemoryFs<'_, N> {
    fn stat(&mut self, name: &str) -> Result<Stat, Error> {
        let index = self.find(name)?;
        Ok(Stat {
            size: self.resources[index].1.len(),
        })
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<ResourceHandle, Error> {
        if mode != OpenMode::Read {
            return Err(Error::NotSupported);
        }
        let index = self.find(name)?;
        let handle = ResourceHandle(self.next_handle);
        self.open
            .push((handle, index))
            .map_err(|_| Error::TooManyOpen)?;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        Ok(handle)
    }

    fn read(
        &mut self,
        handle: ResourceHandle,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let data = self.resolve(handle)?;
        if offset > data.len() {
            return Err(Error::OutOfBounds);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&mut self, _: ResourceHandle, _: usize, _: &[u8]) -> Result<usize, Error> {
        Err(Error::NotSupported)
    }

    fn close(&mut self, handle: ResourceHandle) -> Result<(), Error> {
        let position = self
            .open
            .iter()
            .position(|(h, _)| *h == handle)
            .ok_or(Error::InvalidHandle)?;
        self.open.swap_remove(position);
        Ok(())
    }

    fn remove(&mut self, _: &str) -> Result<(), Error> {
        Err(Error::NotSupported)
    }
}
