//! Archive builder: packs an ordered list of paths into one tar file on disk
//!
//! The tar is written to a temp file in the target directory and only renamed
//! to its final `archive_XXXXXXXX.tar` name once it is complete and synced.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::sync::OnceLock;

use tar::Builder;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::Error;
use crate::protocol::TransferRequest;

// Entry name for an input that has no base name even after canonicalizing (`/`)
const ROOT_ENTRY_NAME: &str = "root";

/// A finished archive on local storage.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub name: String,
    /// On-disk length in bytes
    pub size: u64,
    /// Number of tar entries written (files and directories)
    pub entries: u64,
}

impl Artifact {
    pub fn request(&self) -> Result<TransferRequest, Error> {
        TransferRequest::new(self.name.clone(), self.size)
    }

    pub fn remove(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

/// Generate a collision-resistant archive file name.
pub fn unique_archive_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("archive_{}.tar", &id[..8])
}

pub struct ArchiveBuilder {
    dir: PathBuf,
}

impl ArchiveBuilder {
    /// Archives are written into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn build<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Artifact, Error> {
        self.build_named(paths, &unique_archive_name())
    }

    pub fn build_named<P: AsRef<Path>>(&self, paths: &[P], name: &str) -> Result<Artifact, Error> {
        if paths.is_empty() {
            return Err(Error::NoInputFiles);
        }

        // Stat everything before creating any file
        let mut inputs = Vec::with_capacity(paths.len());
        for p in paths {
            let p = p.as_ref();
            let meta = fs::metadata(p).map_err(|e| archive_err(p, e))?;
            let entry_name = entry_name_for(p)?;
            inputs.push((p.to_path_buf(), entry_name, meta.is_dir()));
        }

        let final_path = self.dir.join(name);
        let tmp = NamedTempFile::new_in(&self.dir).map_err(|e| archive_err(&self.dir, e))?;
        // The output may sit inside an input directory; never pack ourselves
        let out_dir = fs::canonicalize(&self.dir).map_err(|e| archive_err(&self.dir, e))?;
        let own_files: Vec<PathBuf> = [tmp.path(), final_path.as_path()]
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| out_dir.join(n))
            .collect();
        let mut entries = 0u64;
        {
            let mut builder = Builder::new(BufWriter::new(tmp.as_file()));
            for (src, entry_name, is_dir) in &inputs {
                if *is_dir {
                    entries += append_tree(&mut builder, src, entry_name, &own_files)?;
                } else {
                    builder
                        .append_path_with_name(src, entry_name)
                        .map_err(|e| archive_err(src, e))?;
                    entries += 1;
                }
            }
            let mut writer = builder.into_inner().map_err(|e| archive_err(&final_path, e))?;
            writer.flush().map_err(|e| archive_err(&final_path, e))?;
        }
        tmp.as_file().sync_all().map_err(|e| archive_err(&final_path, e))?;
        // NamedTempFile is created 0600; give the artifact the usual umask mode
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = 0o666 & !process_umask();
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(mode))
                .map_err(|e| archive_err(&final_path, e))?;
        }

        let file: File = tmp
            .persist_noclobber(&final_path)
            .map_err(|e| archive_err(&final_path, e.error))?;
        let size = file.metadata().map_err(|e| archive_err(&final_path, e))?.len();

        Ok(Artifact {
            path: final_path,
            name: name.to_string(),
            size,
            entries,
        })
    }
}

/// Base name an input is stored under; `.`, `..` and `dir/..` resolve first.
fn entry_name_for(p: &Path) -> Result<PathBuf, Error> {
    if let Some(name) = p.file_name() {
        return Ok(PathBuf::from(name));
    }
    let canonical = fs::canonicalize(p).map_err(|e| archive_err(p, e))?;
    Ok(canonical
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(ROOT_ENTRY_NAME)))
}

fn is_own_file(path: &Path, own_files: &[PathBuf]) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    if !own_files.iter().any(|o| o.file_name() == Some(name)) {
        return false;
    }
    path.parent()
        .and_then(|dir| fs::canonicalize(dir).ok())
        .map(|dir| own_files.contains(&dir.join(name)))
        .unwrap_or(false)
}

#[cfg(unix)]
fn process_umask() -> u32 {
    // umask can only be read by setting it; do that once per process
    static UMASK: OnceLock<u32> = OnceLock::new();
    *UMASK.get_or_init(|| unsafe {
        let mask = libc::umask(0);
        libc::umask(mask);
        mask as u32
    })
}

fn append_tree<W: Write>(
    builder: &mut Builder<W>,
    root: &Path,
    name: &Path,
    own_files: &[PathBuf],
) -> Result<u64, Error> {
    let mut count = 0u64;
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            archive_err(&path, e.into())
        })?;
        let path = entry.path();
        if !entry.file_type().is_dir() && is_own_file(path, own_files) {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        let tar_name = name.join(rel);
        let res = if entry.file_type().is_dir() {
            builder.append_dir(&tar_name, path)
        } else {
            builder.append_path_with_name(path, &tar_name)
        };
        res.map_err(|e| archive_err(path, e))?;
        count += 1;
    }
    Ok(count)
}

fn archive_err(path: &Path, source: io::Error) -> Error {
    Error::Archive {
        path: path.to_path_buf(),
        source,
    }
}
