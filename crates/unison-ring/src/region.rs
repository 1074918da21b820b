//! Cross-process shared memory region.
//!
//! Backed by a file under `/dev/shm` (tmpfs) mapped into both processes.
//! The creator owns the file and unlinks it on drop; peers opening the
//! same name share the pages until their mappings go away.

use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use memmap2::MmapMut;

use crate::{Error, Result};

pub struct SharedRegion {
    mmap: UnsafeCell<MmapMut>,
    name: String,
    len: usize,
    /// Creator owns the backing file and removes it on drop.
    owns_file: bool,
}

// SAFETY: all mutation of the mapped bytes goes through atomics or
// producer/consumer-exclusive byte ranges enforced by the ring protocol
// layered on top; the mapping itself is process-shared by the OS.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create and zero a region of `len` bytes.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let path = Self::shm_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;
        file.set_len(len as u64)?;

        // SAFETY: the file was just created with the requested length.
        let mmap = unsafe { MmapMut::map_mut(&file) }?;

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            len,
            owns_file: true,
        })
    }

    /// Map an existing region by name.
    pub fn open(name: &str) -> Result<Self> {
        let path = Self::shm_path(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len() as usize;

        // SAFETY: mapping a file we just opened read-write.
        let mmap = unsafe { MmapMut::map_mut(&file) }?;

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            len,
            owns_file: false,
        })
    }

    fn shm_path(name: &str) -> PathBuf {
        #[cfg(target_os = "linux")]
        let base = PathBuf::from("/dev/shm");
        #[cfg(not(target_os = "linux"))]
        let base = std::env::temp_dir();

        base.join(format!("unison_{name}"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer of the mapping.
    ///
    /// # Safety
    /// Callers must respect the ring protocol's exclusive byte ranges;
    /// the pointer is valid for `len()` bytes while `self` lives.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        // SAFETY: UnsafeCell grants interior mutability; aliasing is
        // governed by the protocol above.
        unsafe { (*self.mmap.get()).as_mut_ptr() }
    }

    pub(crate) fn require(&self, at_least: usize) -> Result<()> {
        if self.len < at_least {
            return Err(Error::Geometry(format!(
                "region '{}' is {} bytes, need at least {}",
                self.name, self.len, at_least
            )));
        }
        Ok(())
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owns_file {
            let _ = std::fs::remove_file(Self::shm_path(&self.name));
        }
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owns_file", &self.owns_file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("{}_{}", name, std::process::id())
    }

    #[test]
    fn test_create_and_open_share_bytes() {
        let name = unique("region_share");
        let writer = SharedRegion::create(&name, 4096).unwrap();
        let reader = SharedRegion::open(&name).unwrap();
        assert_eq!(reader.len(), 4096);

        unsafe {
            *writer.as_ptr().add(100) = 0xAB;
        }
        let byte = unsafe { *reader.as_ptr().add(100) };
        assert_eq!(byte, 0xAB);
    }

    #[test]
    fn test_open_missing_fails() {
        assert!(SharedRegion::open(&unique("region_missing")).is_err());
    }

    #[test]
    fn test_creator_unlinks_on_drop() {
        let name = unique("region_unlink");
        {
            let _region = SharedRegion::create(&name, 4096).unwrap();
            assert!(SharedRegion::open(&name).is_ok());
        }
        assert!(SharedRegion::open(&name).is_err());
    }
}
