use crate::Result;
use cfg_block::cfg_block;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The file-system boundary the commit coordinator and the storage
/// backends talk to. Only whole-file operations are needed at this
/// layer; page-granular I/O belongs to the storage engine behind
/// [`crate::storage::DatabaseFile`].
pub trait Vfs {
    /// Create or replace a file with the given contents.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>>;
    fn delete_file(&self, path: &str) -> Result<()>;
    fn exists(&self, path: &str) -> bool;
    /// Durably persist a previously written file.
    fn sync(&self, path: &str) -> Result<()>;
}

/// An in-memory [`Vfs`]. Serves both as the backing store for ephemeral
/// databases and as the crash-simulation substrate in tests: anything
/// written and synced through it survives a simulated crash, anything
/// held only in engine structs does not.
pub struct MemoryVfs {
    files: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemoryVfs {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            files: RefCell::new(HashMap::new()),
        })
    }
}

impl Default for MemoryVfs {
    fn default() -> Self {
        Self {
            files: RefCell::new(HashMap::new()),
        }
    }
}

impl Vfs for MemoryVfs {
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.files
            .borrow_mut()
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.borrow().get(path).cloned())
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        self.files.borrow_mut().remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn sync(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

cfg_block! {
    #[cfg(not(target_family = "wasm"))] {
        /// The real file system. Journal and image files land on disk;
        /// `sync` maps to fsync.
        pub struct FsVfs;

        impl FsVfs {
            pub fn new() -> Rc<Self> {
                Rc::new(Self)
            }
        }

        impl Vfs for FsVfs {
            fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
                std::fs::write(path, data)?;
                Ok(())
            }

            fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
                match std::fs::read(path) {
                    Ok(data) => Ok(Some(data)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }

            fn delete_file(&self, path: &str) -> Result<()> {
                match std::fs::remove_file(path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }

            fn exists(&self, path: &str) -> bool {
                std::path::Path::new(path).exists()
            }

            fn sync(&self, path: &str) -> Result<()> {
                let file = std::fs::File::open(path)?;
                file.sync_all()?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_vfs_round_trip() {
        let vfs = MemoryVfs::new();
        assert!(!vfs.exists("a"));
        vfs.write_file("a", b"hello").unwrap();
        assert!(vfs.exists("a"));
        assert_eq!(vfs.read_file("a").unwrap().unwrap(), b"hello");
        vfs.delete_file("a").unwrap();
        assert!(!vfs.exists("a"));
        assert_eq!(vfs.read_file("a").unwrap(), None);
    }
}
