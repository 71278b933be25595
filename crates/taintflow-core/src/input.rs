//! The taint source: a read-only copy of the traced input.
//!
//! The runtime never owns the input's lifecycle; it keeps a private mapped
//! copy for constant folding and for seeding synthesized files, plus the
//! small amount of file-descriptor bookkeeping the libc interceptors need.

use std::fs::File;
use std::mem::ManuallyDrop;
use std::os::fd::FromRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};

use memmap2::Mmap;

use crate::error::CoreError;
use crate::label::Label;

enum Buffer {
    Mapped(Mmap),
    Owned(Box<[u8]>),
    None,
}

/// Where tainted bytes come from.
pub struct TaintSource {
    filename: PathBuf,
    size: usize,
    is_stdin: bool,
    buf: Buffer,
    // Interceptor bookkeeping. The interceptors themselves live outside this
    // crate; these slots are the interface they program against.
    fd: AtomicI32,
    is_utmp: AtomicI32,
    utmp_offset: AtomicI64,
    offset_label: AtomicU32,
}

impl TaintSource {
    fn with_buffer(filename: PathBuf, size: usize, is_stdin: bool, buf: Buffer) -> Self {
        Self {
            filename,
            size,
            is_stdin,
            buf,
            fd: AtomicI32::new(-1),
            is_utmp: AtomicI32::new(0),
            utmp_offset: AtomicI64::new(0),
            offset_label: AtomicU32::new(0),
        }
    }

    /// No taint source configured; every shadow read stays 0.
    #[must_use]
    pub fn none() -> Self {
        Self::with_buffer(PathBuf::new(), 0, false, Buffer::None)
    }

    /// In-memory source for tests.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::with_buffer(
            PathBuf::from("<memory>"),
            bytes.len(),
            false,
            Buffer::Owned(bytes.into()),
        )
    }

    /// Open the configured taint file, or probe fd 0 when `name` is
    /// `"stdin"`.
    ///
    /// stdin counts as a true pipe only when fd 0 has no on-disk backing;
    /// a shell redirection from a regular file is mapped like any other
    /// file.
    pub fn open(name: &str) -> Result<Self, CoreError> {
        if name.is_empty() {
            return Ok(Self::none());
        }
        if name == "stdin" {
            return Self::open_stdin();
        }
        let path = Path::new(name).canonicalize()?;
        let file = File::open(&path)?;
        let size = file.metadata()?.len() as usize;
        // SAFETY: the mapping is private and read-only; the runtime treats
        // the input as frozen for the life of the process.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self::with_buffer(path, size, false, Buffer::Mapped(map)))
    }

    fn open_stdin() -> Result<Self, CoreError> {
        // Borrow fd 0 without adopting it.
        let stdin = ManuallyDrop::new(
            // SAFETY: fd 0 is live for the process; ManuallyDrop keeps us
            // from closing it.
            unsafe { File::from_raw_fd(0) },
        );
        match stdin.metadata() {
            Ok(meta) if meta.is_file() => {
                let size = meta.len() as usize;
                // SAFETY: same as above; fd 0 is file-backed here.
                let map = unsafe { Mmap::map(&*stdin)? };
                let source = Self::with_buffer(PathBuf::from("stdin"), size, false, Buffer::Mapped(map));
                source.fd.store(0, Ordering::Relaxed);
                Ok(source)
            }
            _ => {
                // A true pipe: one placeholder byte, nothing to map.
                let source = Self::with_buffer(PathBuf::from("stdin"), 1, true, Buffer::None);
                source.fd.store(0, Ordering::Relaxed);
                Ok(source)
            }
        }
    }

    /// Bytes of the mapped copy, if any.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.buf {
            Buffer::Mapped(m) => Some(&m[..self.size.min(m.len())]),
            Buffer::Owned(b) => Some(b),
            Buffer::None => None,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_stdin(&self) -> bool {
        self.is_stdin
    }

    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Whether `name` resolves to the taint file. Flags the utmp slot as a
    /// side effect, mirroring the interceptor contract.
    #[must_use]
    pub fn matches_path(&self, name: &str) -> bool {
        let matched = Path::new(name)
            .canonicalize()
            .is_ok_and(|p| p == self.filename);
        self.is_utmp.store(i32::from(matched), Ordering::Relaxed);
        matched
    }

    pub fn set_fd(&self, fd: i32) {
        self.fd.store(fd, Ordering::Relaxed);
    }

    #[must_use]
    pub fn fd(&self) -> i32 {
        self.fd.load(Ordering::Relaxed)
    }

    /// Size if `fd` is the taint file, 0 otherwise.
    #[must_use]
    pub fn size_for_fd(&self, fd: i32) -> usize {
        if self.fd() == fd { self.size } else { 0 }
    }

    /// Forget the descriptor when the traced program closes it.
    pub fn close_fd(&self, fd: i32) {
        let _ = self
            .fd
            .compare_exchange(fd, -1, Ordering::Relaxed, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_utmp(&self) -> bool {
        self.is_utmp.load(Ordering::Relaxed) != 0
    }

    pub fn set_utmp_offset(&self, offset: i64) {
        self.utmp_offset.store(offset, Ordering::Relaxed);
    }

    #[must_use]
    pub fn utmp_offset(&self) -> i64 {
        self.utmp_offset.load(Ordering::Relaxed)
    }

    pub fn set_offset_label(&self, label: Label) {
        self.offset_label.store(label, Ordering::Relaxed);
    }

    #[must_use]
    pub fn offset_label(&self) -> Label {
        self.offset_label.load(Ordering::Relaxed)
    }
}
