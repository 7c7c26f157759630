//! Workspace handle: wires the store, the orchestrator and the workflows.

use std::path::Path;
use std::sync::Arc;

use crate::db::{Database, NodeStore, OpsLog};
use crate::reconcile::Reconciler;
use crate::runtime::constants::{actions, defaults};
use crate::runtime::layout::WorkspaceLayout;
use crate::runtime::lock::WorkspaceLock;
use crate::runtime::options::WorkspaceOptions;
use crate::runtime::types::{ImageInfo, Node, NodeId, OpResult, OperationRecord, Settings};
use crate::util::{ToolRunner, normalize_disk_path};
use crate::volumes::DiskOrchestrator;
use crate::workflow::{CreateBaseRequest, WorkflowEngine, describe};
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

/// An opened workspace root.
///
/// Cheap to clone. Workflows are serialized by the workspace lock: a second
/// concurrent workflow fails with `ResourceBusy` instead of waiting.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

pub(crate) struct WorkspaceInner {
    options: WorkspaceOptions,
    layout: WorkspaceLayout,
    store: NodeStore,
    disks: DiskOrchestrator,
    lock: WorkspaceLock,
}

impl Workspace {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the layout and settings row under `options.root`, or refresh
    /// them for an existing workspace.
    ///
    /// Re-initializing keeps the node tree and the sequence counter. When the
    /// stored root differs from the requested one, the workspace has been
    /// moved and existing boot entries point at stale paths; this is logged
    /// and recorded so the user can repair them.
    pub fn initialize(
        options: WorkspaceOptions,
        runner: Arc<dyn ToolRunner>,
    ) -> VhdbranchResult<Self> {
        let (options, layout) = resolve(options)?;
        layout.prepare()?;
        let workspace = Self::assemble(options, layout, runner)?;

        {
            let inner = &workspace.inner;
            let _guard = inner.lock.try_acquire()?;

            let previous = match inner.store.settings() {
                Ok(settings) => Some(settings),
                Err(VhdbranchError::NotInitialized(_)) => None,
                Err(e) => return Err(e),
            };
            let root = inner.layout.root().to_string_lossy().into_owned();

            if let Some(previous) = &previous
                && normalize_disk_path(&previous.root_path) != normalize_disk_path(&root)
            {
                tracing::warn!(
                    "Workspace moved from {} to {}; existing boot entries need repair",
                    previous.root_path,
                    root
                );
                inner.store.record(
                    None,
                    actions::WORKSPACE_MOVED,
                    OpResult::Success,
                    &format!("from={} to={}", previous.root_path, root),
                )?;
            }

            let locale = inner
                .options
                .locale
                .clone()
                .or_else(|| previous.map(|s| s.locale))
                .unwrap_or_else(|| defaults::LOCALE.to_string());
            inner.store.initialize_settings(&root, &locale)?;
            tracing::info!("Initialized workspace at {} (locale {})", root, locale);
        }

        Ok(workspace)
    }

    /// Open an initialized workspace, reconciling statuses unless disabled.
    pub fn open(options: WorkspaceOptions, runner: Arc<dyn ToolRunner>) -> VhdbranchResult<Self> {
        let (options, layout) = resolve(options)?;
        if !layout.is_initialized() {
            return Err(VhdbranchError::NotInitialized(
                layout.root().display().to_string(),
            ));
        }
        layout.prepare()?;
        let workspace = Self::assemble(options, layout, runner)?;
        workspace.inner.store.settings()?;

        if workspace.inner.options.reconcile_on_open
            && let Err(e) = workspace.scan()
        {
            tracing::warn!("Reconcile on open failed: {}", e);
        }
        Ok(workspace)
    }

    fn assemble(
        options: WorkspaceOptions,
        layout: WorkspaceLayout,
        runner: Arc<dyn ToolRunner>,
    ) -> VhdbranchResult<Self> {
        let db = Database::open(&layout.db_path())?;
        let ops_log = OpsLog::open(&layout.ops_log_path())?;
        let store =
            NodeStore::new(db, layout.clone(), ops_log).with_detail_limit(options.output_limit);
        let disks = DiskOrchestrator::new(runner, &options, &layout);
        let lock = WorkspaceLock::new(layout.lock_path());

        Ok(Self {
            inner: Arc::new(WorkspaceInner {
                options,
                layout,
                store,
                disks,
                lock,
            }),
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn options(&self) -> &WorkspaceOptions {
        &self.inner.options
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.inner.layout
    }

    pub fn settings(&self) -> VhdbranchResult<Settings> {
        self.inner.store.settings()
    }

    /// All nodes, oldest first.
    pub fn list_nodes(&self) -> VhdbranchResult<Vec<Node>> {
        self.inner.store.list()
    }

    pub fn get_node(&self, id: &str) -> VhdbranchResult<Node> {
        self.inner.store.require(id)
    }

    /// Operation history in execution order; `limit` keeps the newest rows.
    pub fn operations(&self, limit: Option<usize>) -> VhdbranchResult<Vec<OperationRecord>> {
        self.inner.store.operations(limit)
    }

    /// Images available in a WIM/ESD file.
    pub fn list_boot_images(&self, image: &Path) -> VhdbranchResult<Vec<ImageInfo>> {
        if !image.is_file() {
            return Err(VhdbranchError::NotFound(format!(
                "image file {}",
                image.display()
            )));
        }
        if self.inner.options.require_admin {
            self.inner.disks.check_privileges()?;
        }
        self.inner.disks.list_images(image)
    }

    // ========================================================================
    // Workflows
    // ========================================================================

    pub fn create_base(&self, request: &CreateBaseRequest) -> VhdbranchResult<Node> {
        self.guarded(|engine| engine.create_base(request))
    }

    pub fn create_diff(
        &self,
        parent_id: &str,
        name: &str,
        desc: Option<String>,
    ) -> VhdbranchResult<Node> {
        self.guarded(|engine| engine.create_diff(parent_id, name, desc))
    }

    /// Recompute every node's status from physical state.
    pub fn scan(&self) -> VhdbranchResult<Vec<Node>> {
        let inner = &self.inner;
        let _guard = inner.lock.try_acquire()?;
        Reconciler::new(&inner.store, &inner.disks).scan()
    }

    /// Arm the node's boot entry for the next restart. Does not restart.
    pub fn arm_next_boot(&self, node_id: &str) -> VhdbranchResult<String> {
        self.guarded(|engine| {
            self.recorded(node_id, actions::ARM_NEXT_BOOT, engine.arm_next_boot(node_id))
        })
    }

    /// Remove a node and all of its descendants. Returns the removed ids in
    /// removal order.
    pub fn delete_subtree(&self, node_id: &str) -> VhdbranchResult<Vec<NodeId>> {
        self.guarded(|engine| engine.delete_subtree(node_id))
    }

    pub fn repair_boot_entry(&self, node_id: &str) -> VhdbranchResult<Option<String>> {
        self.guarded(|engine| {
            self.recorded(
                node_id,
                actions::REPAIR_BOOT_ENTRY,
                engine.repair_boot_entry(node_id),
            )
        })
    }

    /// Mount the node's system volume. Returns the mount directory.
    pub fn mount(&self, node_id: &str) -> VhdbranchResult<String> {
        self.guarded(|engine| self.recorded(node_id, actions::MOUNT, engine.mount(node_id)))
    }

    pub fn unmount(&self, node_id: &str) -> VhdbranchResult<()> {
        self.guarded(|engine| self.recorded(node_id, actions::UNMOUNT, engine.unmount(node_id)))
    }

    /// Run `f` under the workspace lock after the privilege check.
    fn guarded<T>(
        &self,
        f: impl FnOnce(&WorkflowEngine<'_>) -> VhdbranchResult<T>,
    ) -> VhdbranchResult<T> {
        let inner = &self.inner;
        let _guard = inner.lock.try_acquire()?;
        if inner.options.require_admin {
            inner.disks.check_privileges()?;
        }
        f(&WorkflowEngine::new(&inner.store, &inner.disks))
    }

    /// Append a failure row for workflows that do not record their own.
    fn recorded<T>(
        &self,
        node_id: &str,
        action: &str,
        result: VhdbranchResult<T>,
    ) -> VhdbranchResult<T> {
        result.inspect_err(|e| {
            if let Err(record_err) =
                self.inner
                    .store
                    .record(Some(node_id), action, OpResult::Failure, &describe(e))
            {
                tracing::warn!("Failed to record {} failure: {}", action, record_err);
            }
        })
    }
}

/// Validate options and pin the root to an absolute path.
fn resolve(options: WorkspaceOptions) -> VhdbranchResult<(WorkspaceOptions, WorkspaceLayout)> {
    options.sanitize()?;
    let root = std::path::absolute(&options.root).map_err(|e| {
        VhdbranchError::Config(format!(
            "cannot resolve workspace root {}: {}",
            options.root.display(),
            e
        ))
    })?;
    let layout = WorkspaceLayout::new(&root);
    Ok((WorkspaceOptions { root, ..options }, layout))
}
