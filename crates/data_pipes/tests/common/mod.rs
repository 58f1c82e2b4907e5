#![allow(dead_code)]

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temp directory holding three files: a text file, a binary file with the
/// same bytes, and an empty file. Deleted when dropped.
pub struct TempFiles {
    pub dir: TempDir,
    pub files: Vec<PathBuf>,
}

impl TempFiles {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn create_temp_dir_and_files() -> Result<TempFiles> {
    let dir = tempfile::tempdir()?;
    let files = vec![
        dir.path().join("file1.txt"),
        dir.path().join("file2.bin"),
        dir.path().join("file3"),
    ];
    fs::write(&files[0], "0123456789abcdef")?;
    fs::write(&files[1], b"0123456789abcdef")?;
    fs::write(&files[2], b"")?;
    Ok(TempFiles { dir, files })
}

/// Writes `files` into a gzip-compressed tar archive at `archive`, in order,
/// each stored under its file name.
pub fn write_tar_gz(archive: &Path, files: &[PathBuf]) -> Result<()> {
    let encoder = GzEncoder::new(File::create(archive)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for file in files {
        let name = file.file_name().unwrap_or(file.as_os_str());
        builder.append_path_with_name(file, name)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
