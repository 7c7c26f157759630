//! Boot-switch and boot-entry repair.

use super::WorkflowEngine;
use crate::runtime::constants::actions;
use crate::runtime::types::NodePatch;
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

impl WorkflowEngine<'_> {
    /// Arm the node's boot entry for the next restart only.
    ///
    /// Never restarts the machine. Re-arming is harmless.
    pub fn arm_next_boot(&self, node_id: &str) -> VhdbranchResult<String> {
        let node = self.store.require(node_id)?;
        let guid = node.bcd_guid.clone().ok_or_else(|| {
            VhdbranchError::InvalidState(format!(
                "node {} has no boot entry; repair it first",
                node.name
            ))
        })?;
        if !node.disk_path().is_file() {
            return Err(VhdbranchError::InvalidState(format!(
                "disk {} of node {} is missing",
                node.path, node.name
            )));
        }

        self.disks.set_next_boot(&guid)?;
        self.store.record_next_boot(&node.id, &guid)?;
        Ok(guid)
    }

    /// Recreate the boot entry of a node.
    ///
    /// Entries still pointing at the disk, and the recorded one, are deleted
    /// first so the fresh entry resolves unambiguously. Returns the new
    /// identifier, or `None` if no entry references the disk afterwards.
    pub fn repair_boot_entry(&self, node_id: &str) -> VhdbranchResult<Option<String>> {
        let node = self.store.require(node_id)?;
        if !node.disk_path().is_file() {
            return Err(VhdbranchError::InvalidState(format!(
                "disk {} of node {} is missing",
                node.path, node.name
            )));
        }
        if let Some(dir) = &node.mount_path {
            return Err(VhdbranchError::InvalidState(format!(
                "node {} is mounted at {}; unmount it first",
                node.name, dir
            )));
        }
        if !self.store.children(&node.id)?.is_empty() {
            tracing::warn!(
                node_id = %node.id,
                "Repair writes boot files into a disk that has differencing children"
            );
        }

        let mut stale = self.disks.entries_for_disk(node.disk_path())?;
        if let Some(old) = &node.bcd_guid
            && !stale.iter().any(|g| g.eq_ignore_ascii_case(old))
        {
            stale.push(old.clone());
        }
        for guid in &stale {
            if !self.disks.delete_boot_entry(guid)? {
                tracing::debug!("Stale boot entry {} already absent", guid);
            }
        }

        let disk = self.disks.attach(node.disk_path(), false)?;
        let target = self.install_boot_files(&disk, None)?;
        let guid = self.disks.resolve_boot_entry(disk.path())?;
        if let Some(guid) = &guid {
            self.describe_entry(guid, &node.name);
        }
        disk.release()?;

        self.store.update_node(
            &node.id,
            NodePatch {
                bcd_guid: Some(guid.clone()),
                boot_files_ready: Some(true),
                ..Default::default()
            },
            actions::REPAIR_BOOT_ENTRY,
            &format!(
                "old={} new={} boot_files={target}",
                node.bcd_guid.as_deref().unwrap_or("-"),
                guid.as_deref().unwrap_or("-")
            ),
        )?;
        Ok(guid)
    }
}
