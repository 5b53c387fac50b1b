//! File Service (spec.md §4.4): open/stat/seek/read/write/truncate/sync,
//! forward-only emulated seek on non-seekable fds, uniqueness detection,
//! and overlap-aware copy primitives.
//!
//! All positioned I/O goes through `pread`/`pwrite`-style calls (`&self`,
//! no exclusive borrow needed) so the same [`FileHandle`] can serve as both
//! the source and destination of an intra-file copy without fighting the
//! borrow checker the way a `&mut File` API would.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;

use nix::unistd::{fsync, ftruncate};

use crate::error::HexpeekError;
use crate::offset::{Offset, COPY_CHUNK, PAGE_SIZE};

/// Distance from `at` up to (and including) the next page boundary,
/// mirroring `distbound` in the original source — used to align the first
/// chunk of a streaming copy to a page boundary on the source side.
fn dist_bound(at: Offset, align: Offset) -> Offset {
    let rem = at % align;
    if rem == 0 {
        align
    } else {
        align - rem
    }
}

/// An open file plus the bookkeeping needed to emulate forward-only seeks
/// on non-seekable descriptors (pipes, some device nodes).
pub struct FileHandle {
    file: File,
    seekable: bool,
    /// Shadow offset for non-seekable files (`FileAttr::track`).
    track: Cell<Offset>,
}

impl FileHandle {
    pub fn open_path(path: &Path, read_write: bool, create: bool) -> Result<Self, HexpeekError> {
        let mut opts = OpenOptions::new();
        opts.read(true);
        if read_write {
            opts.write(true);
            if create {
                opts.create(true);
            }
        }
        let file = opts
            .open(path)
            .map_err(|e| HexpeekError::Io(format!("error opening path {:?}: {e}", path)))?;
        Self::from_file(file)
    }

    /// Wrap an externally-opened descriptor (`-d FD`, spec.md §6).
    ///
    /// # Safety
    /// `fd` must be a valid, open file descriptor that this `FileHandle`
    /// will own for the remainder of the process.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Result<Self, HexpeekError> {
        Self::from_file(File::from_raw_fd(fd))
    }

    fn from_file(file: File) -> Result<Self, HexpeekError> {
        let seekable = unsafe {
            libc::lseek(file.as_raw_fd(), 0, libc::SEEK_CUR) >= 0
        };
        Ok(FileHandle {
            file,
            seekable,
            track: Cell::new(0),
        })
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn size(&self) -> Result<Offset, HexpeekError> {
        let meta = self
            .file
            .metadata()
            .map_err(|e| HexpeekError::Io(format!("error statting file: {e}")))?;
        Ok(meta.size() as Offset)
    }

    pub fn sync(&self) -> Result<(), HexpeekError> {
        fsync(self.as_raw_fd()).map_err(|e| HexpeekError::Io(format!("error syncing: {e}")))?;
        Ok(())
    }

    pub fn truncate(&self, len: Offset) -> Result<(), HexpeekError> {
        ftruncate(self.as_raw_fd(), len)
            .map_err(|e| HexpeekError::Io(format!("error truncating: {e}")))?;
        Ok(())
    }

    /// `hexpeek_seek`: seek to an absolute offset, falling back to a bounded
    /// forward discard-read on `ESPIPE` when possible.
    pub fn seek_to(&self, offset: Offset) -> Result<Offset, HexpeekError> {
        if offset < 0 {
            return Err(HexpeekError::user("invalid file offset"));
        }
        let r = unsafe { libc::lseek(self.as_raw_fd(), offset, libc::SEEK_SET) };
        if r >= 0 {
            self.track.set(r as Offset);
            return Ok(r as Offset);
        }
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(0);
        if errno == libc::ESPIPE && self.track.get() <= offset {
            let mut discard = [0u8; PAGE_SIZE as usize];
            while self.track.get() < offset {
                let want = std::cmp::min(discard.len() as Offset, offset - self.track.get());
                let got = self.raw_read(&mut discard[..want as usize])?;
                if got == 0 {
                    return Err(HexpeekError::Io(format!(
                        "error seeking: unexpected EOF while discarding toward offset {offset:#x}"
                    )));
                }
            }
            return Ok(self.track.get());
        }
        Err(HexpeekError::Io(format!(
            "error seeking: {}",
            std::io::Error::from_raw_os_error(errno)
        )))
    }

    fn raw_read(&self, buf: &mut [u8]) -> Result<usize, HexpeekError> {
        let n = unsafe {
            libc::read(
                self.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(HexpeekError::Io(format!(
                "error reading: {}",
                std::io::Error::last_os_error()
            )));
        }
        self.track.set(self.track.get() + n as Offset);
        Ok(n as usize)
    }

    fn raw_write(&self, buf: &[u8]) -> Result<usize, HexpeekError> {
        let n = unsafe {
            libc::write(
                self.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(HexpeekError::Io(format!(
                "error writing: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(n as usize)
    }

    /// Read until `buf` is full or EOF; short reads are legal (spec.md
    /// §4.4 `read_full`).
    pub fn read_full(&self, buf: &mut [u8]) -> Result<usize, HexpeekError> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.raw_read(&mut buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    /// Seek then read exactly `buf.len()` bytes; short reads are an error.
    pub fn read_at(&self, at: Offset, buf: &mut [u8]) -> Result<(), HexpeekError> {
        self.seek_to(at)?;
        let n = self.read_full(buf)?;
        if n != buf.len() {
            return Err(HexpeekError::Io(
                "unexpectedly reached end of file while reading".to_string(),
            ));
        }
        Ok(())
    }

    /// Seek then write exactly `buf.len()` bytes.
    pub fn write_at(&self, at: Offset, buf: &[u8]) -> Result<(), HexpeekError> {
        self.seek_to(at)?;
        let mut done = 0;
        while done < buf.len() {
            let n = self.raw_write(&buf[done..])?;
            if n == 0 {
                return Err(HexpeekError::Io("short write".to_string()));
            }
            done += n;
        }
        Ok(())
    }

    /// `sameness`: true if two handles refer to the same underlying file
    /// (matching `(dev, ino)`), used to pick the overlap-safe copy strategy.
    pub fn same_file(a: &FileHandle, b: &FileHandle) -> Result<bool, HexpeekError> {
        if a.as_raw_fd() == b.as_raw_fd() {
            return Ok(true);
        }
        let ma = a
            .file
            .metadata()
            .map_err(|e| HexpeekError::Io(e.to_string()))?;
        let mb = b
            .file
            .metadata()
            .map_err(|e| HexpeekError::Io(e.to_string()))?;
        Ok(ma.dev() == mb.dev() && ma.ino() == mb.ino())
    }
}

pub type ProgressFn<'a> = dyn FnMut(Offset, Offset) + 'a;

/// Copy `length` bytes from `src_at` to `dst_at`, safe for overlapping
/// ranges in the same handle when `src_at <= dst_at` (`cpybk`).
pub fn copy_backward(
    src: &FileHandle,
    src_at: Offset,
    dst: &FileHandle,
    dst_at: Offset,
    length: Offset,
    mut progress: Option<&mut ProgressFn>,
) -> Result<(), HexpeekError> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut sz = (src_at + length) % PAGE_SIZE;
    if sz == 0 {
        sz = COPY_CHUNK as Offset;
    }
    let mut rel = length;
    while rel > 0 {
        let chunk = std::cmp::min(sz, rel);
        rel -= chunk;
        if let Some(cb) = progress.as_deref_mut() {
            cb(length - rel, length);
        }
        src.read_at(src_at + rel, &mut buf[..chunk as usize])?;
        dst.write_at(dst_at + rel, &buf[..chunk as usize])?;
        sz = COPY_CHUNK as Offset;
    }
    Ok(())
}

/// Copy `length` bytes from `src_at` to `dst_at`, safe for overlapping
/// ranges in the same handle when `src_at >= dst_at` (`cpyfw`).
pub fn copy_forward(
    src: &FileHandle,
    src_at: Offset,
    dst: &FileHandle,
    dst_at: Offset,
    length: Offset,
    mut progress: Option<&mut ProgressFn>,
) -> Result<(), HexpeekError> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut sz = dist_bound(src_at, PAGE_SIZE);
    let mut rel = 0;
    while rel < length {
        let chunk = std::cmp::min(sz, length - rel);
        if let Some(cb) = progress.as_deref_mut() {
            cb(rel, length);
        }
        src.read_at(src_at + rel, &mut buf[..chunk as usize])?;
        dst.write_at(dst_at + rel, &buf[..chunk as usize])?;
        rel += chunk;
        sz = COPY_CHUNK as Offset;
    }
    Ok(())
}

/// Copy between two distinct files using page-aligned streaming reads
/// (`cpyext`). Assumes `src` and `dst` are not the same underlying file.
pub fn copy_external(
    src: &FileHandle,
    src_at: Offset,
    dst: &FileHandle,
    dst_at: Offset,
    length: Offset,
    mut progress: Option<&mut ProgressFn>,
) -> Result<(), HexpeekError> {
    let mut buf = vec![0u8; COPY_CHUNK];
    src.seek_to(src_at)?;
    dst.seek_to(dst_at)?;
    let mut sz = dist_bound(src_at, PAGE_SIZE);
    let mut rel = 0;
    while rel < length {
        let chunk = std::cmp::min(sz, length - rel) as usize;
        if let Some(cb) = progress.as_deref_mut() {
            cb(rel, length);
        }
        let got = src.read_full(&mut buf[..chunk])?;
        if got != chunk {
            return Err(HexpeekError::Io(
                "unexpectedly reached end of file while reading".to_string(),
            ));
        }
        dst.write_at(dst_at + rel, &buf[..chunk])?;
        rel += chunk as Offset;
        sz = COPY_CHUNK as Offset;
    }
    Ok(())
}

/// Dispatching copy (spec.md §4.4 `file_copy`): picks the overlap-safe
/// strategy for same-file copies, external streaming for distinct files,
/// and repeats the source region to fill `dst_len` when `src_len <
/// dst_len`.
#[allow(clippy::too_many_arguments)]
pub fn file_copy(
    src: &FileHandle,
    src_at: Offset,
    src_len: Offset,
    dst: &FileHandle,
    dst_at: Offset,
    dst_len: Offset,
    mut progress: Option<&mut ProgressFn>,
) -> Result<(), HexpeekError> {
    debug_assert!(src_len <= dst_len);
    let same = FileHandle::same_file(src, dst)?;

    if !same {
        copy_external(src, src_at, dst, dst_at, src_len, progress.as_deref_mut())?;
        let mut done = src_len;
        while done < dst_len {
            let chunk = std::cmp::min(dst_len - done, src_len);
            copy_external(src, src_at, dst, dst_at + done, chunk, progress.as_deref_mut())?;
            done += chunk;
        }
        return Ok(());
    }

    if src_at < dst_at && src_at + src_len > dst_at {
        copy_backward(src, src_at, dst, dst_at, src_len, progress.as_deref_mut())?;
    } else {
        copy_forward(src, src_at, dst, dst_at, src_len, progress.as_deref_mut())?;
    }
    let mut done = src_len;
    while done < dst_len {
        // Source region may have been overwritten; repeat from dst_at.
        let chunk = std::cmp::min(dst_len - done, src_len);
        copy_forward(dst, dst_at, dst, dst_at + done, chunk, progress.as_deref_mut())?;
        done += chunk;
    }
    Ok(())
}

/// `lclcpy`: copy within one handle, safe for overlapping ranges.
pub fn local_copy(
    h: &FileHandle,
    src_at: Offset,
    dst_at: Offset,
    length: Offset,
    progress: Option<&mut ProgressFn>,
) -> Result<(), HexpeekError> {
    file_copy(h, src_at, length, h, dst_at, length, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_file(contents: &[u8]) -> FileHandle {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        let file = f.reopen().unwrap();
        FileHandle::from_file(file).unwrap()
    }

    #[test]
    fn read_at_write_at_roundtrip() {
        let h = make_file(b"0123456789");
        let mut buf = [0u8; 4];
        h.read_at(2, &mut buf).unwrap();
        assert_eq!(&buf, b"2345");
        h.write_at(2, b"ABCD").unwrap();
        let mut buf2 = [0u8; 10];
        h.read_at(0, &mut buf2).unwrap();
        assert_eq!(&buf2, b"01ABCD6789");
    }

    #[test]
    fn local_copy_overlap_forward() {
        // Shift "23456789" two bytes to the right of offset 0 -> dest 2.
        let h = make_file(b"0123456789");
        local_copy(&h, 0, 2, 8, None).unwrap();
        let mut buf = [0u8; 10];
        h.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[2..10], b"01234567");
    }

    #[test]
    fn local_copy_overlap_backward() {
        let h = make_file(b"0123456789");
        local_copy(&h, 2, 0, 8, None).unwrap();
        let mut buf = [0u8; 10];
        h.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[0..8], b"23456789");
    }

    #[test]
    fn same_file_detects_identical_descriptor() {
        let h = make_file(b"hello");
        assert!(FileHandle::same_file(&h, &h).unwrap());
    }
}
