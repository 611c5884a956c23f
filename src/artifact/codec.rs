//! Artifact archive codec
//!
//! Artifacts travel as uncompressed tar archives. A file artifact is a single
//! member named after the file. A directory artifact is a tree under one
//! synthetic root component (the directory's own name), which is stripped
//! again on unpack so it never leaks into the target path.
//!
//! The first member decides the kind of the whole archive, which lets a
//! receiver classify an artifact without unpacking it.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::common::{Error, Result};

/// Shape of a packaged artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    File,
    Directory,
}

/// Package a file or directory into a tar archive
pub fn pack(path: &Path) -> Result<Vec<u8>> {
    let metadata = fs::metadata(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let mut members = 0;
    if metadata.is_dir() {
        let root = root_name(path);
        append_tree(&mut builder, path, Path::new(&root), &mut members)?;
    } else if metadata.is_file() {
        let name = path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| Error::EmptyArtifact(path.display().to_string()))?;
        let mut file = fs::File::open(path)?;
        builder.append_file(&name, &mut file)?;
        members += 1;
    }

    let archive = builder.into_inner()?;
    if members == 0 {
        return Err(Error::EmptyArtifact(path.display().to_string()));
    }

    tracing::debug!(
        path = %path.display(),
        members,
        bytes = archive.len(),
        "packed artifact"
    );
    Ok(archive)
}

/// Name of the synthetic root for a directory archive
fn root_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_os_string())
        .or_else(|| {
            path.canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|name| name.to_os_string()))
        })
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string())
}

fn append_tree<W: io::Write>(
    builder: &mut tar::Builder<W>,
    src: &Path,
    name: &Path,
    members: &mut usize,
) -> Result<()> {
    builder.append_dir(name, src)?;
    *members += 1;

    let mut children = fs::read_dir(src)?.collect::<io::Result<Vec<_>>>()?;
    children.sort_by_key(|child| child.file_name());

    for child in children {
        let child_path = child.path();
        let child_name = name.join(child.file_name());
        let file_type = child.file_type()?;

        if file_type.is_dir() {
            append_tree(builder, &child_path, &child_name, members)?;
        } else if file_type.is_file() || file_type.is_symlink() {
            builder.append_path_with_name(&child_path, &child_name)?;
            *members += 1;
        } else {
            tracing::debug!(path = %child_path.display(), "skipping special file");
        }
    }

    Ok(())
}

/// Classify an archive by peeking at its first member
pub fn probe(name: &str, archive: &[u8]) -> Result<ArtifactKind> {
    let mut reader = tar::Archive::new(archive);
    let first = reader
        .entries()?
        .next()
        .ok_or_else(|| Error::EmptyArtifact(name.to_string()))??;

    if first.header().entry_type().is_dir() {
        Ok(ArtifactKind::Directory)
    } else {
        Ok(ArtifactKind::File)
    }
}

/// Unpack an archive onto `dest`
///
/// A file archive writes exactly one file at `dest`. A directory archive
/// creates `dest` and places the tree below it with the root stripped.
pub fn unpack(name: &str, archive: &[u8], dest: &Path) -> Result<()> {
    let kind = probe(name, archive)?;
    let mut reader = tar::Archive::new(archive);

    match kind {
        ArtifactKind::File => {
            if let Some(parent) = dest.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut entry = reader
                .entries()?
                .next()
                .ok_or_else(|| Error::EmptyArtifact(name.to_string()))??;
            entry.unpack(dest)?;
        }
        ArtifactKind::Directory => {
            fs::create_dir_all(dest)?;
            for entry in reader.entries()? {
                let mut entry = entry?;
                let relative = strip_root(&entry.path()?)?;
                if relative.as_os_str().is_empty() {
                    continue;
                }

                let target = dest.join(&relative);
                refuse_links(dest, &relative, &entry.path()?)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&target)?;
            }
        }
    }

    tracing::debug!(artifact = name, dest = %dest.display(), ?kind, "unpacked artifact");
    Ok(())
}

/// Fail if any existing component of `dest/relative` is a symlink
///
/// Links unpacked from earlier members would otherwise let a later member
/// write through them to a location outside `dest`.
fn refuse_links(dest: &Path, relative: &Path, member: &Path) -> Result<()> {
    let mut current = dest.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(escapes_root(member));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn escapes_root(member: &Path) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("archive member '{}' escapes its root", member.display()),
    ))
}

/// Drop the synthetic root component, rejecting paths that escape the target
fn strip_root(path: &Path) -> Result<PathBuf> {
    let mut components = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir));
    components.next();

    let mut relative = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => relative.push(part),
            _ => return Err(escapes_root(path)),
        }
    }
    Ok(relative)
}
