//! Scoped physical resources.
//!
//! Each guard releases what it holds when dropped: a mount point is removed
//! and its directory deleted, a drive letter is unassigned, a disk is
//! detached. Call `release()` to observe the outcome instead of having it
//! logged, or `keep()` to hand the resource past the current scope.
//!
//! Declare the disk guard before the guards of its volumes so drops run
//! volumes first.

use std::path::{Path, PathBuf};

use super::orchestrator::DiskOrchestrator;
use super::parse::diskpart::VdiskDetail;
use vhdbranch_shared::errors::VhdbranchResult;

/// A virtual disk attached by this process.
pub struct AttachedDisk<'a> {
    orchestrator: &'a DiskOrchestrator,
    path: PathBuf,
    disk_number: u32,
    detail: VdiskDetail,
    armed: bool,
}

impl<'a> AttachedDisk<'a> {
    pub(crate) fn new(
        orchestrator: &'a DiskOrchestrator,
        path: PathBuf,
        disk_number: u32,
        detail: VdiskDetail,
    ) -> Self {
        Self {
            orchestrator,
            path,
            disk_number,
            detail,
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disk_number(&self) -> u32 {
        self.disk_number
    }

    /// Report taken right after attaching.
    pub fn detail(&self) -> &VdiskDetail {
        &self.detail
    }

    /// Detach now.
    pub fn release(mut self) -> VhdbranchResult<()> {
        self.armed = false;
        self.orchestrator.detach(&self.path)
    }

    /// Leave the disk attached.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for AttachedDisk<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.orchestrator.detach(&self.path)
        {
            tracing::warn!("Failed to detach {}: {}", self.path.display(), e);
        }
    }
}

/// A volume mounted on a directory under the workspace mount root.
pub struct MountPoint<'a> {
    orchestrator: &'a DiskOrchestrator,
    volume: u32,
    dir: PathBuf,
    armed: bool,
}

impl<'a> MountPoint<'a> {
    pub(crate) fn new(orchestrator: &'a DiskOrchestrator, volume: u32, dir: PathBuf) -> Self {
        Self {
            orchestrator,
            volume,
            dir,
            armed: true,
        }
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove the mount and its directory now.
    pub fn release(mut self) -> VhdbranchResult<()> {
        self.armed = false;
        self.orchestrator.unmount_volume(self.volume, &self.dir)
    }

    /// Leave the volume mounted and return its directory.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.dir)
    }
}

impl Drop for MountPoint<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.orchestrator.unmount_volume(self.volume, &self.dir)
        {
            tracing::warn!("Failed to unmount {}: {}", self.dir.display(), e);
        }
    }
}

/// A temporary drive letter assigned to a volume.
pub struct DriveLetter<'a> {
    orchestrator: &'a DiskOrchestrator,
    volume: u32,
    letter: char,
    armed: bool,
}

impl<'a> DriveLetter<'a> {
    pub(crate) fn new(orchestrator: &'a DiskOrchestrator, volume: u32, letter: char) -> Self {
        Self {
            orchestrator,
            volume,
            letter,
            armed: true,
        }
    }

    pub fn letter(&self) -> char {
        self.letter
    }

    /// Root of the volume, e.g. `S:\`.
    pub fn root(&self) -> PathBuf {
        PathBuf::from(format!("{}:\\", self.letter))
    }

    pub fn release(mut self) -> VhdbranchResult<()> {
        self.armed = false;
        self.orchestrator.remove_letter(self.volume, self.letter)
    }
}

impl Drop for DriveLetter<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.orchestrator.remove_letter(self.volume, self.letter)
        {
            tracing::warn!("Failed to remove drive letter {}: {}", self.letter, e);
        }
    }
}
