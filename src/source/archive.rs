// src/source/archive.rs

//! Native source archive extraction

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

/// Supported archive compressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    TarZst,
    Tar,
}

impl ArchiveFormat {
    /// Detect the format from a file name
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

fn decoder(format: ArchiveFormat, file: File) -> Result<Box<dyn Read>> {
    let reader = BufReader::new(file);
    Ok(match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(reader)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(reader)),
        ArchiveFormat::TarZst => Box::new(
            zstd::stream::read::Decoder::new(reader)
                .map_err(|e| Error::SourceError(format!("zstd decoder: {}", e)))?,
        ),
        ArchiveFormat::Tar => Box::new(reader),
    })
}

/// Relative path of an entry with `strip` leading components removed
///
/// Returns `None` for entries that vanish after stripping; rejects absolute
/// paths and `..` components.
fn entry_target(path: &Path, strip: usize) -> Result<Option<PathBuf>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(p) => parts.push(p.to_os_string()),
            Component::CurDir => {}
            _ => {
                return Err(Error::SourceError(format!(
                    "Archive entry escapes the source tree: {}",
                    path.display()
                )));
            }
        }
    }
    if parts.len() <= strip {
        return Ok(None);
    }
    Ok(Some(parts[strip..].iter().collect()))
}

/// Extract `archive` into `dest`, dropping `strip` leading path components
pub fn extract_archive(archive: &Path, dest: &Path, strip: usize) -> Result<usize> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::from_name(&name)
        .ok_or_else(|| Error::SourceError(format!("Unknown archive format: {}", name)))?;

    let file = File::open(archive)
        .map_err(|e| Error::SourceError(format!("Failed to open {}: {}", archive.display(), e)))?;
    let mut tar = Archive::new(decoder(format, file)?);
    fs::create_dir_all(dest)?;

    let mut count = 0;
    let entries = tar
        .entries()
        .map_err(|e| Error::SourceError(format!("Failed to read {}: {}", name, e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::SourceError(format!("Corrupt archive {}: {}", name, e)))?;
        let path = entry
            .path()
            .map_err(|e| Error::SourceError(format!("Bad entry in {}: {}", name, e)))?
            .into_owned();
        let Some(rel) = entry_target(&path, strip)? else {
            continue;
        };

        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&target)
            .map_err(|e| Error::SourceError(format!("Failed to unpack {}: {}", rel.display(), e)))?;
        count += 1;
    }

    debug!("Extracted {} entries from {}", count, name);
    Ok(count)
}

/// The single top-level directory of an archive, if it has exactly one
pub fn single_root(archive: &Path) -> Result<Option<String>> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::from_name(&name)
        .ok_or_else(|| Error::SourceError(format!("Unknown archive format: {}", name)))?;
    let file = File::open(archive)?;
    let mut tar = Archive::new(decoder(format, file)?);

    let mut root: Option<String> = None;
    let entries = tar
        .entries()
        .map_err(|e| Error::SourceError(format!("Failed to read {}: {}", name, e)))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::SourceError(format!("Corrupt archive {}: {}", name, e)))?;
        let path = entry
            .path()
            .map_err(|e| Error::SourceError(format!("Bad entry in {}: {}", name, e)))?
            .into_owned();
        let mut normal = path.components().filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
            _ => None,
        });
        let Some(first) = normal.next() else {
            continue;
        };
        // A top-level file means there is no single root
        if normal.next().is_none() && !entry.header().entry_type().is_dir() {
            return Ok(None);
        }
        match &root {
            None => root = Some(first),
            Some(r) if *r == first => {}
            Some(_) => return Ok(None),
        }
    }

    Ok(root)
}
