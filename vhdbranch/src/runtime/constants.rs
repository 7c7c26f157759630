//! Constants shared by the runtime modules.

pub mod envs {
    /// Overrides the default workspace root.
    pub const VHDBRANCH_ROOT: &str = "VHDBRANCH_ROOT";
    /// Overrides the CLI home directory (config file location).
    pub const VHDBRANCH_HOME: &str = "VHDBRANCH_HOME";
}

pub mod defaults {
    pub const LOCALE: &str = "en-US";
    /// Bytes of tool output kept in logs and operation rows.
    pub const OUTPUT_LIMIT: usize = 800;
    pub const FIRST_DRIVE_LETTER: char = 'S';
    pub const LAST_DRIVE_LETTER: char = 'Z';
    /// Size of the EFI system partition created for base disks.
    pub const EFI_PARTITION_MB: u64 = 100;
    /// Size of the Microsoft reserved partition created for base disks.
    pub const MSR_PARTITION_MB: u64 = 16;
    /// Smallest base disk accepted by `create base`.
    pub const MIN_BASE_SIZE_GB: u64 = 16;
    /// Largest VHDX the format allows (64 TB).
    pub const MAX_BASE_SIZE_GB: u64 = 64 * 1024;
}

/// Volume labels written by the create-base script.
pub mod labels {
    pub const EFI: &str = "EFI";
    pub const SYSTEM: &str = "System";
}

/// Action names recorded in the operation history.
pub mod actions {
    pub const INIT_WORKSPACE: &str = "init_workspace";
    pub const WORKSPACE_MOVED: &str = "workspace_moved";
    pub const RESERVE_SEQUENCE: &str = "reserve_sequence";
    pub const CREATE_BASE: &str = "create_base";
    pub const CREATE_DIFF: &str = "create_diff";
    pub const RECONCILE: &str = "reconcile";
    pub const ARM_NEXT_BOOT: &str = "arm_next_boot";
    pub const DELETE_NODE: &str = "delete_node";
    pub const DELETE_SUBTREE: &str = "delete_subtree";
    pub const REPAIR_BOOT_ENTRY: &str = "repair_boot_entry";
    pub const MOUNT: &str = "mount";
    pub const UNMOUNT: &str = "unmount";
}
