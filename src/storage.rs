//! Where a database file lives and how it is replaced on save.

use anyhow::{Context, Result};
use getrandom::fill;
use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Location of one database file.
///
/// Saves never write the file in place: a complete copy is written next to
/// it and swapped in, so a failed save leaves the previous file intact.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    /// Creates a new Storage instance with the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Returns `true` if the storage file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Opens the database file for reading.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CantOpenFile`] if the file cannot be opened.
    pub fn open(&self) -> Result<File> {
        let file = File::open(&self.path).map_err(Error::CantOpenFile)?;
        Ok(file)
    }

    /// Lets `write` produce the new file contents, then swaps them in.
    ///
    /// The contents go to a temporary file with a random name, which is
    /// synced and then renamed over the target, and the parent directory is
    /// synced so the rename persists. If `write` fails, the temporary file
    /// is removed and the existing file is left untouched.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_with<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<()>,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.random_tmp_path()?;

        let tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(Error::CantOpenFile)
            .context("failed to create temporary file")?;

        let written = (|| -> Result<()> {
            let mut out = BufWriter::new(tmp_file);
            write(&mut out)?;
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Err(e) = self.swap_in(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        // the rename itself must reach the disk
        #[cfg(unix)]
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }

        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Generates a unique temporary file path in the same directory.
    ///
    /// Uses cryptographically secure random bytes to avoid name collisions.
    /// Format: `filename.tmp.<randomhex>`
    fn random_tmp_path(&self) -> Result<PathBuf> {
        let mut buf = [0u8; 8]; // 64 bit entropy
        fill(&mut buf)?;

        let rand_string = buf.iter().map(|b| format!("{:02x}", b)).collect::<String>();

        let file_name = self
            .path
            .file_name()
            .context("storage path has no file name")?
            .to_string_lossy();

        let tmp_name = format!("{}.tmp.{}", file_name, rand_string);

        Ok(self.path.with_file_name(tmp_name))
    }

    /// Moves the finished temporary file over the database.
    ///
    /// The first save has nothing to replace and is a plain rename;
    /// `ReplaceFileW` refuses a missing target.
    #[cfg(target_os = "windows")]
    fn swap_in(&self, tmp_path: &Path) -> Result<()> {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

        if !self.path.exists() {
            fs::rename(tmp_path, &self.path).map_err(Error::WriteFail)?;
            return Ok(());
        }

        let wide = |p: &Path| -> Vec<u16> {
            p.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
        };
        let target = wide(&self.path);
        let replacement = wide(tmp_path);

        // SAFETY: both buffers are NUL-terminated UTF-16 that outlive the
        // call, and the optional arguments are null.
        let replaced = unsafe {
            ReplaceFileW(
                target.as_ptr(),
                replacement.as_ptr(),
                std::ptr::null(),
                REPLACEFILE_WRITE_THROUGH,
                std::ptr::null(),
                std::ptr::null(),
            )
        };
        if replaced == 0 {
            return Err(Error::WriteFail(std::io::Error::last_os_error()))
                .context("failed to replace database file");
        }
        Ok(())
    }

    /// `rename` replaces the target atomically on the same filesystem.
    #[cfg(not(target_os = "windows"))]
    fn swap_in(&self, tmp_path: &Path) -> Result<()> {
        fs::rename(tmp_path, &self.path).map_err(Error::WriteFail)?;
        Ok(())
    }
}
