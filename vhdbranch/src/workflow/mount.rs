//! Mount and unmount a node's system volume.

use std::path::Path;

use super::WorkflowEngine;
use crate::runtime::constants::actions;
use crate::runtime::types::{NodePatch, NodeStatus};
use crate::volumes::remove_mount_dir;
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

impl WorkflowEngine<'_> {
    /// Attach the node's disk and mount its system volume on a fresh
    /// directory. Both stay in place until [`unmount`](Self::unmount).
    ///
    /// Disks with children are attached read-only.
    pub fn mount(&self, node_id: &str) -> VhdbranchResult<String> {
        let node = self.store.require(node_id)?;
        if let Some(dir) = &node.mount_path {
            return Err(VhdbranchError::InvalidState(format!(
                "node {} is already mounted at {}",
                node.name, dir
            )));
        }
        if !node.disk_path().is_file() {
            return Err(VhdbranchError::InvalidState(format!(
                "disk {} of node {} is missing",
                node.path, node.name
            )));
        }

        let readonly = !self.store.children(&node.id)?.is_empty();
        let disk = self.disks.attach(node.disk_path(), readonly)?;
        let volumes = self.disks.volumes(&disk)?;
        let mount = self.disks.mount_volume(volumes.system.number, "mount")?;

        let dir = mount.keep();
        disk.keep();
        let dir_text = dir.to_string_lossy().into_owned();

        let recorded = self.store.update_node(
            &node.id,
            NodePatch {
                status: Some(NodeStatus::Mounted),
                mount_path: Some(Some(dir_text.clone())),
                ..Default::default()
            },
            actions::MOUNT,
            &format!(
                "volume={} dir={} readonly={}",
                volumes.system.number, dir_text, readonly
            ),
        );
        if let Err(e) = recorded {
            if let Err(cleanup) = self.release_mount(node.disk_path(), &dir) {
                tracing::warn!("Failed to undo mount of {}: {}", node.path, cleanup);
            }
            return Err(e);
        }

        tracing::info!(node_id = %node.id, "Mounted at {}", dir_text);
        Ok(dir_text)
    }

    /// Remove the mount point, detach, and clear the mounted state.
    pub fn unmount(&self, node_id: &str) -> VhdbranchResult<()> {
        let node = self.store.require(node_id)?;
        let dir = node.mount_path.clone().ok_or_else(|| {
            VhdbranchError::InvalidState(format!("node {} is not mounted", node.name))
        })?;

        self.release_mount(node.disk_path(), Path::new(&dir))?;

        self.store.update_node(
            &node.id,
            NodePatch {
                status: Some(NodeStatus::Normal),
                mount_path: Some(None),
                ..Default::default()
            },
            actions::UNMOUNT,
            &format!("dir={dir}"),
        )?;
        tracing::info!(node_id = %node.id, "Unmounted {}", dir);
        Ok(())
    }

    /// Undo a mount made by any process: unmount the system volume, delete
    /// the directory and detach. A disk no longer attached (e.g. after a
    /// restart) only leaves the directory to delete.
    pub(super) fn release_mount(&self, disk_path: &Path, dir: &Path) -> VhdbranchResult<()> {
        let attached = if disk_path.is_file() {
            self.disks.reopen_attached(disk_path)?
        } else {
            None
        };

        match attached {
            Some(disk) => {
                let volumes = self.disks.volumes(&disk)?;
                self.disks
                    .adopt_mount(volumes.system.number, dir.to_path_buf())
                    .release()?;
                disk.release()?;
            }
            None => remove_mount_dir(dir),
        }
        Ok(())
    }
}
