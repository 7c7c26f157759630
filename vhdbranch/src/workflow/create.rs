//! Create-base and create-diff sagas.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{WorkflowEngine, describe};
use crate::db::{FinalizedNode, NodeDraft, NodeReservation};
use crate::runtime::constants::{actions, defaults};
use crate::runtime::types::{Node, OpResult};
use crate::util::normalize_disk_path;
use crate::volumes::{CreateSpec, VdiskDetail};
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

/// Parameters of a new base node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateBaseRequest {
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    /// WIM or ESD file holding the OS image.
    pub image: PathBuf,
    /// 1-based image index inside `image`.
    pub index: u32,
    pub size_gb: u64,
}

impl WorkflowEngine<'_> {
    /// Reserve, partition, apply the image, write boot files, resolve the
    /// boot entry, detach, commit.
    pub fn create_base(&self, request: &CreateBaseRequest) -> VhdbranchResult<Node> {
        validate_name(&request.name)?;
        if request.size_gb < defaults::MIN_BASE_SIZE_GB {
            return Err(VhdbranchError::InvalidArgument(format!(
                "base disk size {} GB is below the {} GB minimum",
                request.size_gb,
                defaults::MIN_BASE_SIZE_GB
            )));
        }
        if request.size_gb > defaults::MAX_BASE_SIZE_GB {
            return Err(VhdbranchError::InvalidArgument(format!(
                "base disk size {} GB exceeds the {} GB VHDX maximum",
                request.size_gb,
                defaults::MAX_BASE_SIZE_GB
            )));
        }
        if request.index == 0 {
            return Err(VhdbranchError::InvalidArgument(
                "image indexes start at 1".into(),
            ));
        }
        if !request.image.is_file() {
            return Err(VhdbranchError::NotFound(format!(
                "image file {}",
                request.image.display()
            )));
        }

        let reservation = self.store.begin_node(NodeDraft {
            parent_id: None,
            name: request.name.clone(),
            desc: request.desc.clone(),
        })?;
        let spec = CreateSpec::Base {
            path: reservation.path().to_path_buf(),
            size_gb: request.size_gb,
        };

        let outcome = self
            .provision(&spec, &request.name, Some((request.image.as_path(), request.index)))
            .map(|mut finalized| {
                finalized.detail = format!(
                    "image={} index={} size={}GB {}",
                    request.image.display(),
                    request.index,
                    request.size_gb,
                    finalized.detail
                );
                finalized
            });
        self.complete(reservation, outcome)
    }

    /// Reserve, create a differencing disk over the parent, write boot files
    /// through its inherited EFI volume, resolve, detach, commit.
    pub fn create_diff(
        &self,
        parent_id: &str,
        name: &str,
        desc: Option<String>,
    ) -> VhdbranchResult<Node> {
        validate_name(name)?;
        let parent = self.store.require(parent_id)?;
        if !parent.disk_path().is_file() {
            return Err(VhdbranchError::InvalidState(format!(
                "parent disk {} is missing",
                parent.path
            )));
        }
        if let Some(dir) = &parent.mount_path {
            return Err(VhdbranchError::InvalidState(format!(
                "parent {} is mounted at {}; unmount it first",
                parent.name, dir
            )));
        }

        let reservation = self.store.begin_node(NodeDraft {
            parent_id: Some(parent.id.clone()),
            name: name.to_string(),
            desc,
        })?;
        let spec = CreateSpec::Diff {
            path: reservation.path().to_path_buf(),
            parent: PathBuf::from(&parent.path),
        };

        let outcome = self.provision(&spec, name, None);
        self.complete(reservation, outcome)
    }

    fn provision(
        &self,
        spec: &CreateSpec,
        name: &str,
        image: Option<(&Path, u32)>,
    ) -> VhdbranchResult<FinalizedNode> {
        let disk = self.disks.create_and_attach(spec)?;
        if let CreateSpec::Diff { parent, .. } = spec {
            verify_parent(disk.detail(), parent)?;
        }

        let target = self.install_boot_files(&disk, image)?;

        let guid = self.disks.resolve_boot_entry(disk.path())?.ok_or_else(|| {
            VhdbranchError::parse(
                "boot entry resolution",
                format!(
                    "no boot entry references {} after writing boot files",
                    disk.path().display()
                ),
                "",
            )
        })?;
        self.describe_entry(&guid, name);
        disk.release()?;

        Ok(FinalizedNode {
            bcd_guid: Some(guid),
            boot_files_ready: true,
            detail: format!("boot_files={target}"),
        })
    }

    /// Commit a provisioned node, or undo what the failed attempt left behind
    /// and record the failure. The sequence number stays consumed either way.
    fn complete(
        &self,
        reservation: NodeReservation,
        outcome: VhdbranchResult<FinalizedNode>,
    ) -> VhdbranchResult<Node> {
        let path = reservation.path().to_path_buf();
        let action = if reservation.is_base() {
            actions::CREATE_BASE
        } else {
            actions::CREATE_DIFF
        };

        let finalized = match outcome {
            Ok(finalized) => finalized,
            Err(e) => {
                self.compensate(&path, None);
                if let Err(record_err) = self.store.abort_node(reservation, &describe(&e)) {
                    tracing::warn!("Failed to record aborted creation: {}", record_err);
                }
                return Err(e);
            }
        };

        let guid = finalized.bcd_guid.clone();
        let node_id = reservation.id().to_string();
        self.store.commit_node(reservation, finalized).inspect_err(|e| {
            self.compensate(&path, guid.as_deref());
            if let Err(record_err) =
                self.store
                    .record(Some(&node_id), action, OpResult::Failure, &describe(e))
            {
                tracing::warn!("Failed to record aborted creation: {}", record_err);
            }
        })
    }

    /// Best effort: delete boot entries bound to `path`, detach it and remove
    /// the partial disk file.
    fn compensate(&self, path: &Path, guid: Option<&str>) {
        if !path.exists() {
            return;
        }
        tracing::warn!("Rolling back partial disk {}", path.display());

        let mut entries = match self.disks.entries_for_disk(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot list boot entries for rollback: {}", e);
                Vec::new()
            }
        };
        if let Some(guid) = guid
            && !entries.iter().any(|g| g.eq_ignore_ascii_case(guid))
        {
            entries.push(guid.to_string());
        }
        for guid in &entries {
            if let Err(e) = self.disks.delete_boot_entry(guid) {
                tracing::warn!("Rollback could not delete boot entry {}: {}", guid, e);
            }
        }

        if let Err(e) = self.disks.detach_if_attached(path) {
            tracing::warn!("Rollback could not detach {}: {}", path.display(), e);
        }
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Rollback could not remove {}: {}", path.display(), e);
        }
    }
}

fn validate_name(name: &str) -> VhdbranchResult<()> {
    if name.trim().is_empty() {
        return Err(VhdbranchError::InvalidArgument(
            "node name must not be empty".into(),
        ));
    }
    Ok(())
}

/// The freshly created child must point at the recorded parent file.
fn verify_parent(detail: &VdiskDetail, parent: &Path) -> VhdbranchResult<()> {
    let expected = normalize_disk_path(&parent.to_string_lossy());
    match detail.parent.as_deref().map(normalize_disk_path) {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(VhdbranchError::Consistency(format!(
            "new disk reports parent {:?}, expected {}",
            actual,
            parent.display()
        ))),
    }
}
