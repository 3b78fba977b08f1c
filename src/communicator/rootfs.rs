//! Communicator that writes into a local root filesystem directory.
//!
//! Destination paths are interpreted relative to the root, so `/etc/motd`
//! lands at `<root>/etc/motd`. Every directory below the root is opened one
//! component at a time with `O_NOFOLLOW`, and the upload is written to a
//! uniquely named temporary file inside the final directory handle before it
//! is renamed into place relative to that same handle.

use std::fs;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use rustix::fd::OwnedFd;
use rustix::fs::{self as rfs, AtFlags, CWD, FileType, Mode, OFlags};
use rustix::io::Errno;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

use super::Communicator;

/// RAII guard removing the temporary upload file unless the upload completed.
struct TempFileGuard<'a> {
    dir: &'a OwnedFd,
    name: String,
    armed: bool,
}

impl<'a> TempFileGuard<'a> {
    fn new(dir: &'a OwnedFd, name: String) -> Self {
        Self {
            dir,
            name,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match rfs::unlinkat(self.dir, self.name.as_str(), AtFlags::empty()) {
            Ok(()) => debug!("cleaned up temp file: {}", self.name),
            Err(Errno::NOENT) => debug!("temp file already removed: {}", self.name),
            Err(e) => {
                tracing::error!(
                    name = %self.name,
                    "failed to cleanup temp file: {}",
                    e,
                );
            }
        }
    }
}

/// Uploads files beneath a root filesystem directory on the local host.
#[derive(Debug, Clone)]
pub struct RootfsCommunicator {
    root: Utf8PathBuf,
}

impl RootfsCommunicator {
    /// Creates a communicator for `root`, which must be an existing directory.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let root = root.into();
        let metadata = fs::metadata(&root)
            .with_context(|| format!("failed to read rootfs metadata: {}", root))?;
        if !metadata.is_dir() {
            bail!("rootfs is not a directory: {}", root);
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Maps a target-side absolute path to its location under the root.
    pub fn resolve(&self, dst: &Utf8Path) -> Result<Utf8PathBuf> {
        let (parents, file_name) = split_destination(dst)?;
        let mut path = self.root.clone();
        path.extend(parents);
        path.push(file_name);
        Ok(path)
    }

    /// Opens the directory that will hold `dst`, refusing symlinks at every level.
    fn open_parent(&self, parents: &[&str]) -> Result<OwnedFd> {
        let mut dir = rfs::openat(
            CWD,
            self.root.as_str(),
            OFlags::DIRECTORY | OFlags::RDONLY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .with_context(|| format!("failed to open rootfs {}", self.root))?;

        let mut current = self.root.clone();
        for component in parents {
            current.push(component);
            dir = rfs::openat(
                &dir,
                *component,
                OFlags::NOFOLLOW | OFlags::DIRECTORY | OFlags::RDONLY | OFlags::CLOEXEC,
                Mode::empty(),
            )
            .map_err(|e| match e {
                Errno::LOOP | Errno::NOTDIR => anyhow::anyhow!(
                    "{} is a symlink or not a directory, refusing to upload (possible symlink attack)",
                    current
                ),
                _ => anyhow::Error::new(std::io::Error::from(e))
                    .context(format!("failed to open destination directory {}", current)),
            })?;
        }
        Ok(dir)
    }
}

/// Splits an absolute destination into its parent directories and file name.
fn split_destination(dst: &Utf8Path) -> Result<(Vec<&str>, &str)> {
    if !dst.is_absolute() {
        bail!("destination path must be absolute: {}", dst);
    }
    if dst.components().any(|c| c == Utf8Component::ParentDir) {
        bail!(
            "destination path '{}' contains '..' components, \
            which is not allowed for security reasons",
            dst
        );
    }
    if dst.as_str().ends_with('/') {
        bail!("destination path must name a file: {}", dst);
    }
    let mut parts: Vec<&str> = dst
        .components()
        .filter_map(|c| match c {
            Utf8Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect();
    let Some(file_name) = parts.pop() else {
        bail!("destination path must name a file: {}", dst);
    };
    Ok((parts, file_name))
}

#[async_trait]
impl Communicator for RootfsCommunicator {
    fn name(&self) -> &'static str {
        "rootfs"
    }

    async fn upload(
        &self,
        dst: &Utf8Path,
        src: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let (parents, file_name) = split_destination(dst)?;
        let target = self.resolve(dst)?;
        let dir = self.open_parent(&parents)?;

        match rfs::statat(&dir, file_name, AtFlags::SYMLINK_NOFOLLOW) {
            Ok(stat) if FileType::from_raw_mode(stat.st_mode).is_dir() => {
                bail!("destination is a directory: {}", target);
            }
            Ok(_) | Err(Errno::NOENT) => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to inspect {}", target));
            }
        }

        let temp_name = format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4());
        let fd = rfs::openat(
            &dir,
            temp_name.as_str(),
            OFlags::WRONLY | OFlags::CREATE | OFlags::EXCL | OFlags::NOFOLLOW | OFlags::CLOEXEC,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::ROTH,
        )
        .with_context(|| format!("failed to create temp file for {}", target))?;
        let mut guard = TempFileGuard::new(&dir, temp_name.clone());

        debug!("streaming upload into {}", temp_name);
        let mut file = tokio::fs::File::from_std(fs::File::from(fd));
        let written = tokio::io::copy(src, &mut file)
            .await
            .with_context(|| format!("failed to write {}", target))?;
        file.flush()
            .await
            .with_context(|| format!("failed to flush {}", target))?;
        file.sync_all()
            .await
            .with_context(|| format!("failed to sync {}", target))?;
        drop(file);

        rfs::renameat(&dir, temp_name.as_str(), &dir, file_name)
            .with_context(|| format!("failed to move {} into place at {}", temp_name, target))?;
        guard.disarm();

        info!("uploaded {} bytes to {}", written, target);
        Ok(written)
    }
}
