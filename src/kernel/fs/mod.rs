//! File System and IPC module

use alloc::vec::Vec;
use spin::Mutex;

/// Stand-in for the out-of-scope VFS collaborator (SPEC_FULL.md §6:
/// `vfs_read_file(path, &buf, &size) -> status`). A real block/network
/// filesystem is explicitly out of scope for this core; this resolves a
/// small set of known paths to a single cross-compiled userland binary
/// embedded at build time, giving `kexecve` a real path-keyed lookup to
/// call instead of always loading the same image unconditionally.
pub fn vfs_read_file(path: &str) -> FileResult<&'static [u8]> {
    match path {
        "/bin/init" | "/bin/shell" | "init" | "shell" => Ok(EMBEDDED_SHELL),
        _ => Err(FileError::NotImplemented),
    }
}

static EMBEDDED_SHELL: &[u8] =
    include_bytes!("../../userland/programs/shell/target/x86_64-unknown-none/debug/shell");

/// A `stat`-style summary of a VFS entry. Mirrors the handful of fields
/// the syscall surface actually reports (SPEC_FULL.md §4.6 `stat`/`fstat`);
/// there is no inode layer underneath to report anything richer.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// An open handle onto a `vfs_read_file` image: `open`'s only backing
/// store, since there is no writable filesystem in this core. Supports
/// `read`/`lseek`/`stat`; `write` always fails, matching a read-only VFS.
pub struct VfsFile {
    data: &'static [u8],
    pos: usize,
}

impl VfsFile {
    #[must_use]
    pub fn open(path: &str) -> FileResult<Self> {
        let data = vfs_read_file(path)?;
        Ok(Self { data, pos: 0 })
    }

    #[must_use]
    pub fn stat(&self) -> FileStat {
        FileStat { size: self.data.len() as u64, is_dir: false }
    }

    /// `lseek`-style repositioning. `whence`: 0 = SET, 1 = CUR, 2 = END.
    pub fn seek(&mut self, offset: i64, whence: u64) -> FileResult<u64> {
        let base = match whence {
            0 => 0i64,
            1 => self.pos as i64,
            2 => self.data.len() as i64,
            _ => return Err(FileError::InvalidInput),
        };
        let new_pos = base.checked_add(offset).ok_or(FileError::InvalidInput)?;
        if new_pos < 0 {
            return Err(FileError::InvalidInput);
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }
}

impl FileDescriptor for VfsFile {
    fn read(&mut self, buf: &mut [u8]) -> FileResult<usize> {
        if self.pos >= self.data.len() {
            return Ok(0);
        }
        let available = &self.data[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> FileResult<usize> {
        Err(FileError::InvalidInput)
    }

    fn close(&mut self) -> FileResult<()> {
        Ok(())
    }

    fn seek(&mut self, offset: i64, whence: u64) -> FileResult<u64> {
        VfsFile::seek(self, offset, whence)
    }

    fn stat(&self) -> FileResult<FileStat> {
        Ok(VfsFile::stat(self))
    }
}

/// Minimal in-kernel directory table backing `mkdir`/`rmdir`/`ls`. Not a
/// real filesystem: directories are bare path strings with no contents,
/// attributes, or nesting rules beyond string prefixing. Enough to give
/// the directory syscalls real (if shallow) state rather than stubs that
/// always report success or always fail.
pub struct DirTable {
    paths: Vec<alloc::string::String>,
}

impl DirTable {
    const fn new() -> Self {
        Self { paths: Vec::new() }
    }

    pub fn mkdir(&mut self, path: &str) -> FileResult<()> {
        if self.paths.iter().any(|p| p == path) {
            return Err(FileError::AlreadyExists);
        }
        self.paths.push(alloc::string::String::from(path));
        Ok(())
    }

    pub fn rmdir(&mut self, path: &str) -> FileResult<()> {
        let before = self.paths.len();
        self.paths.retain(|p| p != path);
        if self.paths.len() == before {
            return Err(FileError::NotFound);
        }
        Ok(())
    }

    /// Lists directory entries as a newline-separated byte stream
    /// (SPEC_FULL.md §4.6: `ls` "returns a formatted byte stream").
    #[must_use]
    pub fn ls(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for path in &self.paths {
            out.extend_from_slice(path.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

lazy_static::lazy_static! {
    pub static ref DIRECTORIES: Mutex<DirTable> = Mutex::new(DirTable::new());
}

/// Result type for file operations
pub type FileResult<T> = Result<T, FileError>;

/// File operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    NotImplemented,
    BrokenPipe,
    WouldBlock,
    InvalidInput,
    NotFound,
    AlreadyExists,
    Other,
}

/// File Descriptor Trait
/// 
/// Represents an open file, pipe, or other resource that can be read/written.
pub trait FileDescriptor: Send + Sync {
    /// Read bytes from the file into the buffer
    /// Returns the number of bytes read
    fn read(&mut self, buf: &mut [u8]) -> FileResult<usize>;
    
    /// Write bytes to the file from the buffer
    /// Returns the number of bytes written
    fn write(&mut self, buf: &[u8]) -> FileResult<usize>;
    
    /// Close the file descriptor
    fn close(&mut self) -> FileResult<()>;
    
    /// Poll for readiness (optional, for non-blocking I/O)
    fn poll(&self) -> bool {
        true
    }

    /// Reposition the file offset (`lseek`). Channels and pipes have no
    /// concept of position; only `VfsFile` overrides this.
    fn seek(&mut self, _offset: i64, _whence: u64) -> FileResult<u64> {
        Err(FileError::InvalidInput)
    }

    /// Report size/kind (`fstat`). Only `VfsFile` overrides this.
    fn stat(&self) -> FileResult<FileStat> {
        Err(FileError::InvalidInput)
    }
}
