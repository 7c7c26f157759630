//! Script builder for the disk-partitioning tool.
//!
//! Builders are pure: identical inputs render identical text. Only
//! [`DiskpartScript::write_to`] touches the filesystem, producing a scratch
//! file that is removed when its handle drops.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::runtime::constants::{defaults, labels};
use vhdbranch_shared::errors::VhdbranchResult;

/// Ordered list of diskpart directives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskpartScript {
    purpose: &'static str,
    directives: Vec<String>,
}

impl DiskpartScript {
    fn new(purpose: &'static str) -> Self {
        Self {
            purpose,
            directives: Vec::new(),
        }
    }

    fn push(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn select_vdisk(self, path: &Path) -> Self {
        self.push(format!("select vdisk file={}", quote(path)))
    }

    fn select_volume(self, volume: u32) -> Self {
        self.push(format!("select volume {volume}"))
    }

    /// Short name used for logging and the scratch filename.
    pub fn purpose(&self) -> &'static str {
        self.purpose
    }

    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    /// Script text, one directive per line.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for directive in &self.directives {
            let _ = writeln!(text, "{directive}");
        }
        text
    }

    /// Write the script under `dir` with a unique name.
    pub fn write_to(&self, dir: &Path) -> VhdbranchResult<ScriptFile> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}-{}.txt", self.purpose, Uuid::new_v4()));
        std::fs::write(&path, self.render())?;
        Ok(ScriptFile { path })
    }
}

/// Scratch script on disk. Deleted on drop.
#[derive(Debug)]
pub struct ScriptFile {
    path: PathBuf,
}

impl ScriptFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Failed to remove script {}: {}", self.path.display(), e);
        }
    }
}

fn quote(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

/// Create an expandable GPT disk with EFI, MSR and a primary partition
/// filling the rest, attach it and report its details.
pub fn create_base(path: &Path, size_gb: u64) -> DiskpartScript {
    DiskpartScript::new("create-base")
        .push(format!(
            "create vdisk file={} maximum={} type=expandable",
            quote(path),
            size_gb.saturating_mul(1024)
        ))
        .select_vdisk(path)
        .push("attach vdisk")
        .push("convert gpt")
        .push(format!(
            "create partition efi size={}",
            defaults::EFI_PARTITION_MB
        ))
        .push(format!("format quick fs=fat32 label=\"{}\"", labels::EFI))
        .push(format!(
            "create partition msr size={}",
            defaults::MSR_PARTITION_MB
        ))
        .push("create partition primary")
        .push(format!("format quick fs=ntfs label=\"{}\"", labels::SYSTEM))
        .push("detail vdisk")
}

/// Create a differencing disk backed by `parent`, attach it and report
/// its details.
pub fn create_diff(path: &Path, parent: &Path) -> DiskpartScript {
    DiskpartScript::new("create-diff")
        .push(format!(
            "create vdisk file={} parent={}",
            quote(path),
            quote(parent)
        ))
        .select_vdisk(path)
        .push("attach vdisk")
        .push("detail vdisk")
}

/// Attach an existing disk. Read-only attach keeps parents of
/// differencing children unmodified.
pub fn attach(path: &Path, readonly: bool) -> DiskpartScript {
    DiskpartScript::new("attach")
        .select_vdisk(path)
        .push(if readonly {
            "attach vdisk readonly"
        } else {
            "attach vdisk"
        })
        .push("detail vdisk")
}

pub fn detach(path: &Path) -> DiskpartScript {
    DiskpartScript::new("detach")
        .select_vdisk(path)
        .push("detach vdisk")
}

pub fn detail_vdisk(path: &Path) -> DiskpartScript {
    DiskpartScript::new("detail-vdisk")
        .select_vdisk(path)
        .push("detail vdisk")
}

/// Volume table of one attached disk.
pub fn detail_disk(disk_number: u32) -> DiskpartScript {
    DiskpartScript::new("detail-disk")
        .push(format!("select disk {disk_number}"))
        .push("detail disk")
}

pub fn mount_volume(volume: u32, dir: &Path) -> DiskpartScript {
    DiskpartScript::new("mount-volume")
        .select_volume(volume)
        .push(format!("assign mount={}", quote(dir)))
}

pub fn unmount_volume(volume: u32, dir: &Path) -> DiskpartScript {
    DiskpartScript::new("unmount-volume")
        .select_volume(volume)
        .push(format!("remove mount={}", quote(dir)))
}

pub fn assign_letter(volume: u32, letter: char) -> DiskpartScript {
    DiskpartScript::new("assign-letter")
        .select_volume(volume)
        .push(format!("assign letter={letter}"))
}

pub fn remove_letter(volume: u32, letter: char) -> DiskpartScript {
    DiskpartScript::new("remove-letter")
        .select_volume(volume)
        .push(format!("remove letter={letter}"))
}
