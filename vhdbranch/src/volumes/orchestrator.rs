//! Disk Orchestrator: the only component that touches physical state.
//!
//! Every external tool runs through [`ToolRunner`]. A nonzero exit or a
//! known failure line in the output is a `CommandExecution` error carrying
//! the captured text. Physical resources come back as guards from
//! [`super::mount`], so they are released on every exit path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use super::mount::{AttachedDisk, DriveLetter, MountPoint};
use super::parse::bcdedit::{self, BootEntry};
use super::parse::diskpart::{self, DiskVolumes, VdiskDetail};
use super::parse::{
    BCDBOOT_FAILURES, BCDEDIT_FAILURES, DISKPART_FAILURES, DISM_FAILURES, dism, find_failure,
};
use super::script::{self, DiskpartScript};
use crate::runtime::layout::WorkspaceLayout;
use crate::runtime::options::{ToolPaths, WorkspaceOptions};
use crate::runtime::types::ImageInfo;
use crate::util::{CommandOutput, ToolRunner, truncate};
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

/// Disk to create.
#[derive(Clone, Debug)]
pub enum CreateSpec {
    /// Expandable GPT disk of `size_gb`, partitioned for UEFI boot.
    Base { path: PathBuf, size_gb: u64 },
    /// Differencing disk backed by `parent`.
    Diff { path: PathBuf, parent: PathBuf },
}

impl CreateSpec {
    pub fn path(&self) -> &Path {
        match self {
            CreateSpec::Base { path, .. } | CreateSpec::Diff { path, .. } => path,
        }
    }
}

/// Where `bcdboot` finally wrote the boot files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootFileTarget {
    MountDirectory,
    DriveLetter(char),
}

impl fmt::Display for BootFileTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootFileTarget::MountDirectory => f.write_str("mount directory"),
            BootFileTarget::DriveLetter(letter) => write!(f, "drive {letter}:"),
        }
    }
}

pub struct DiskOrchestrator {
    runner: Arc<dyn ToolRunner>,
    tools: ToolPaths,
    tmp_dir: PathBuf,
    mount_root: PathBuf,
    letters: Vec<char>,
    output_limit: usize,
}

impl DiskOrchestrator {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        options: &WorkspaceOptions,
        layout: &WorkspaceLayout,
    ) -> Self {
        Self {
            runner,
            tools: options.tools.clone(),
            tmp_dir: layout.tmp_dir(),
            mount_root: layout.mount_root(),
            letters: options.letter_candidates(),
            output_limit: options.output_limit,
        }
    }

    // ========================================================================
    // Tool invocation
    // ========================================================================

    fn invoke(
        &self,
        tool: &str,
        program: &Path,
        args: Vec<String>,
        failures: &[&str],
    ) -> VhdbranchResult<CommandOutput> {
        tracing::debug!(tool, ?args, "Running {}", program.display());
        let output = self.runner.run(program, &args)?;
        let combined = output.combined();
        tracing::debug!(
            tool,
            exit_code = ?output.exit_code,
            "Output: {}",
            truncate(&combined, self.output_limit)
        );

        if !output.success() {
            let summary = find_failure(&combined, failures)
                .map(str::to_string)
                .unwrap_or_else(|| "exited with failure status".to_string());
            return Err(VhdbranchError::CommandExecution {
                tool: tool.to_string(),
                exit_code: output.exit_code,
                summary,
                output: combined,
            });
        }
        if let Some(line) = find_failure(&combined, failures) {
            return Err(VhdbranchError::CommandExecution {
                tool: tool.to_string(),
                exit_code: output.exit_code,
                summary: line.to_string(),
                output: combined,
            });
        }
        Ok(output)
    }

    fn run_script(&self, script: &DiskpartScript) -> VhdbranchResult<CommandOutput> {
        let file = script.write_to(&self.tmp_dir)?;
        tracing::debug!("diskpart {} script:\n{}", script.purpose(), script.render());
        self.invoke(
            "diskpart",
            &self.tools.diskpart,
            vec!["/s".to_string(), file.path().display().to_string()],
            DISKPART_FAILURES,
        )
    }

    fn bcdedit(&self, args: &[&str]) -> VhdbranchResult<CommandOutput> {
        self.invoke(
            "bcdedit",
            &self.tools.bcdedit,
            args.iter().map(|a| a.to_string()).collect(),
            BCDEDIT_FAILURES,
        )
    }

    // ========================================================================
    // Virtual disks
    // ========================================================================

    /// Create the disk file and attach it.
    ///
    /// If any step fails, a disk left attached by the partial script is
    /// detached before the error is returned. The file itself stays for the
    /// caller to remove.
    pub fn create_and_attach(&self, spec: &CreateSpec) -> VhdbranchResult<AttachedDisk<'_>> {
        let script = match spec {
            CreateSpec::Base { path, size_gb } => script::create_base(path, *size_gb),
            CreateSpec::Diff { path, parent } => script::create_diff(path, parent),
        };
        let path = spec.path();

        match self.run_script(&script).and_then(|out| attached_detail(&out)) {
            Ok((disk_number, detail)) => {
                tracing::info!("Created {} as disk {}", path.display(), disk_number);
                Ok(AttachedDisk::new(self, path.to_path_buf(), disk_number, detail))
            }
            Err(e) => {
                self.cleanup_attach(path);
                Err(e)
            }
        }
    }

    /// Attach an existing disk file.
    pub fn attach(&self, path: &Path, readonly: bool) -> VhdbranchResult<AttachedDisk<'_>> {
        match self
            .run_script(&script::attach(path, readonly))
            .and_then(|out| attached_detail(&out))
        {
            Ok((disk_number, detail)) => {
                tracing::info!("Attached {} as disk {}", path.display(), disk_number);
                Ok(AttachedDisk::new(self, path.to_path_buf(), disk_number, detail))
            }
            Err(e) => {
                self.cleanup_attach(path);
                Err(e)
            }
        }
    }

    /// Guard for a disk that an earlier process left attached, if it still is.
    pub fn reopen_attached(&self, path: &Path) -> VhdbranchResult<Option<AttachedDisk<'_>>> {
        let detail = self.vdisk_detail(path)?;
        Ok(detail
            .disk_number
            .map(|n| AttachedDisk::new(self, path.to_path_buf(), n, detail.clone())))
    }

    fn cleanup_attach(&self, path: &Path) {
        if !path.exists() {
            return;
        }
        if let Err(e) = self.detach_if_attached(path) {
            tracing::warn!("Cleanup of {} failed: {}", path.display(), e);
        }
    }

    /// `detail vdisk` report of a disk file.
    pub fn vdisk_detail(&self, path: &Path) -> VhdbranchResult<VdiskDetail> {
        let output = self.run_script(&script::detail_vdisk(path))?;
        diskpart::parse_vdisk_detail(&output.stdout)
    }

    pub fn detach(&self, path: &Path) -> VhdbranchResult<()> {
        self.run_script(&script::detach(path))?;
        tracing::info!("Detached {}", path.display());
        Ok(())
    }

    /// Detach `path` if it is currently attached. Returns whether it was.
    pub fn detach_if_attached(&self, path: &Path) -> VhdbranchResult<bool> {
        if self.vdisk_detail(path)?.is_attached() {
            self.detach(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// EFI and system volumes of an attached disk.
    pub fn volumes(&self, disk: &AttachedDisk<'_>) -> VhdbranchResult<DiskVolumes> {
        let output = self.run_script(&script::detail_disk(disk.disk_number()))?;
        let volumes = diskpart::parse_volume_table(&output.stdout)?;
        diskpart::classify_volumes(&volumes, &output.stdout)
    }

    // ========================================================================
    // Mount points and drive letters
    // ========================================================================

    /// Mount `volume` on a fresh directory `<mount root>/<purpose>-<uuid>`.
    pub fn mount_volume(&self, volume: u32, purpose: &str) -> VhdbranchResult<MountPoint<'_>> {
        std::fs::create_dir_all(&self.mount_root)?;
        let dir = self
            .mount_root
            .join(format!("{purpose}-{}", Uuid::new_v4().simple()));
        std::fs::create_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                VhdbranchError::ResourceBusy(format!("mount point {} exists", dir.display()))
            }
            _ => e.into(),
        })?;

        if let Err(e) = self.run_script(&script::mount_volume(volume, &dir)) {
            remove_mount_dir(&dir);
            return Err(e);
        }
        tracing::debug!("Mounted volume {} on {}", volume, dir.display());
        Ok(MountPoint::new(self, volume, dir))
    }

    /// Guard for a mount point made by an earlier process.
    pub(crate) fn adopt_mount(&self, volume: u32, dir: PathBuf) -> MountPoint<'_> {
        MountPoint::new(self, volume, dir)
    }

    /// Remove the mount of `volume` on `dir` and delete the empty directory.
    pub fn unmount_volume(&self, volume: u32, dir: &Path) -> VhdbranchResult<()> {
        self.run_script(&script::unmount_volume(volume, dir))?;
        remove_mount_dir(dir);
        tracing::debug!("Unmounted volume {} from {}", volume, dir.display());
        Ok(())
    }

    /// Assign the first free letter of the configured range to `volume`.
    pub fn assign_letter(&self, volume: u32) -> VhdbranchResult<DriveLetter<'_>> {
        let letter = self
            .letters
            .iter()
            .copied()
            .find(|l| !Path::new(&format!("{l}:\\")).exists())
            .ok_or_else(|| {
                VhdbranchError::ResourceBusy(format!(
                    "no free drive letter in {}",
                    self.letters.iter().collect::<String>()
                ))
            })?;

        self.run_script(&script::assign_letter(volume, letter))?;
        tracing::debug!("Assigned {}: to volume {}", letter, volume);
        Ok(DriveLetter::new(self, volume, letter))
    }

    pub fn remove_letter(&self, volume: u32, letter: char) -> VhdbranchResult<()> {
        self.run_script(&script::remove_letter(volume, letter))?;
        Ok(())
    }

    // ========================================================================
    // Images and boot files
    // ========================================================================

    /// Images contained in a WIM/ESD file.
    pub fn list_images(&self, image_file: &Path) -> VhdbranchResult<Vec<ImageInfo>> {
        if !image_file.is_file() {
            return Err(VhdbranchError::NotFound(format!(
                "image file {}",
                image_file.display()
            )));
        }
        let output = self.invoke(
            "dism",
            &self.tools.dism,
            vec![
                "/English".to_string(),
                "/Get-WimInfo".to_string(),
                format!("/WimFile:{}", image_file.display()),
            ],
            DISM_FAILURES,
        )?;
        dism::parse_image_info(&output.stdout)
    }

    /// Deploy image `index` of `image_file` into `target_dir`.
    pub fn apply_image(
        &self,
        image_file: &Path,
        index: u32,
        target_dir: &Path,
    ) -> VhdbranchResult<()> {
        tracing::info!(
            "Applying {} index {} to {}",
            image_file.display(),
            index,
            target_dir.display()
        );
        let output = self.invoke(
            "dism",
            &self.tools.dism,
            vec![
                "/English".to_string(),
                "/Apply-Image".to_string(),
                format!("/ImageFile:{}", image_file.display()),
                format!("/Index:{index}"),
                format!("/ApplyDir:{}", target_dir.display()),
            ],
            DISM_FAILURES,
        )?;
        dism::check_apply(&output.stdout)
    }

    /// Install boot files from `system` onto `efi` and register an entry.
    ///
    /// Tries the EFI mount directory first. If `bcdboot` rejects it, the EFI
    /// volume gets a temporary drive letter for the retry, released right
    /// after.
    pub fn write_boot_files(
        &self,
        system: &MountPoint<'_>,
        efi: &MountPoint<'_>,
    ) -> VhdbranchResult<BootFileTarget> {
        let windows = system.dir().join("Windows");

        let first = match self.bcdboot(&windows, efi.dir()) {
            Ok(()) => return Ok(BootFileTarget::MountDirectory),
            Err(e) => e,
        };
        tracing::warn!(
            "bcdboot rejected mount directory {}, retrying with a drive letter: {}",
            efi.dir().display(),
            first
        );

        let letter = self.assign_letter(efi.volume())?;
        self.bcdboot(&windows, Path::new(&format!("{}:", letter.letter())))?;
        let target = BootFileTarget::DriveLetter(letter.letter());
        letter.release()?;
        Ok(target)
    }

    fn bcdboot(&self, windows: &Path, target: &Path) -> VhdbranchResult<()> {
        self.invoke(
            "bcdboot",
            &self.tools.bcdboot,
            vec![
                windows.display().to_string(),
                "/s".to_string(),
                target.display().to_string(),
                "/f".to_string(),
                "UEFI".to_string(),
            ],
            BCDBOOT_FAILURES,
        )?;
        Ok(())
    }

    // ========================================================================
    // Boot entries
    // ========================================================================

    /// Every entry of the machine's boot store, with the raw enumeration.
    pub fn boot_entries(&self) -> VhdbranchResult<(Vec<BootEntry>, String)> {
        let output = self.bcdedit(&["/enum", "all", "/v"])?;
        let entries = bcdedit::parse_boot_entries(&output.stdout)?;
        Ok((entries, output.stdout))
    }

    /// Identifier of the entry bound to `disk_path`, if any.
    pub fn resolve_boot_entry(&self, disk_path: &Path) -> VhdbranchResult<Option<String>> {
        let (entries, raw) = self.boot_entries()?;
        bcdedit::resolve_entry_for_disk(&entries, &disk_path.to_string_lossy(), &raw)
    }

    /// Identifiers of all entries referencing `disk_path`.
    pub fn entries_for_disk(&self, disk_path: &Path) -> VhdbranchResult<Vec<String>> {
        let (entries, _) = self.boot_entries()?;
        let disk_path = disk_path.to_string_lossy();
        Ok(entries
            .into_iter()
            .filter(|e| e.references_disk(&disk_path))
            .map(|e| e.identifier)
            .collect())
    }

    pub fn set_boot_entry_description(&self, guid: &str, description: &str) -> VhdbranchResult<()> {
        self.bcdedit(&["/set", guid, "description", description])?;
        Ok(())
    }

    /// Delete an entry. Returns `false` if it did not exist.
    pub fn delete_boot_entry(&self, guid: &str) -> VhdbranchResult<bool> {
        let (entries, _) = self.boot_entries()?;
        if !bcdedit::identifiers(&entries).contains(&guid.to_ascii_lowercase()) {
            return Ok(false);
        }
        self.bcdedit(&["/delete", guid])?;
        tracing::info!("Deleted boot entry {}", guid);
        Ok(true)
    }

    /// Boot `guid` once on the next restart.
    pub fn set_next_boot(&self, guid: &str) -> VhdbranchResult<()> {
        self.bcdedit(&["/bootsequence", guid])?;
        tracing::info!("Armed next boot: {}", guid);
        Ok(())
    }

    // ========================================================================
    // Privileges
    // ========================================================================

    /// `net session` only succeeds in an elevated process.
    pub fn check_privileges(&self) -> VhdbranchResult<()> {
        let elevated = self
            .runner
            .run(&self.tools.net, &["session".to_string()])
            .map(|out| out.success())
            .unwrap_or(false);
        if elevated {
            Ok(())
        } else {
            Err(VhdbranchError::Privilege(
                "run from an elevated (administrator) prompt".into(),
            ))
        }
    }
}

/// Disk number and report from the `detail vdisk` that closes attach scripts.
fn attached_detail(output: &CommandOutput) -> VhdbranchResult<(u32, VdiskDetail)> {
    let detail = diskpart::parse_vdisk_detail(&output.stdout)?;
    let disk_number = detail.disk_number.ok_or_else(|| {
        VhdbranchError::parse(
            "detail vdisk",
            "disk reports no associated disk number after attach",
            output.stdout.clone(),
        )
    })?;
    Ok((disk_number, detail))
}

/// Remove an empty mount directory. Never recursive: a directory still
/// holding a mounted volume must not be emptied.
pub(crate) fn remove_mount_dir(dir: &Path) {
    match std::fs::remove_dir(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove mount directory {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Replays canned outputs and records invocations.
    struct Scripted {
        outputs: Mutex<Vec<CommandOutput>>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl Scripted {
        fn new(outputs: Vec<CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl ToolRunner for Scripted {
        fn run(&self, program: &Path, args: &[String]) -> VhdbranchResult<CommandOutput> {
            self.calls
                .lock()
                .push((program.display().to_string(), args.to_vec()));
            Ok(self.outputs.lock().pop().unwrap_or_default())
        }
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn orchestrator(runner: Arc<Scripted>) -> (TempDir, DiskOrchestrator) {
        let temp_dir = TempDir::new().unwrap();
        let options = WorkspaceOptions::with_root(temp_dir.path());
        let layout = WorkspaceLayout::new(temp_dir.path());
        let orch = DiskOrchestrator::new(runner, &options, &layout);
        (temp_dir, orch)
    }

    #[test]
    fn test_inline_failure_is_command_error() {
        let runner = Scripted::new(vec![ok(
            "Virtual Disk Service error:\nThe file exists.\n",
        )]);
        let (_dir, orch) = orchestrator(runner.clone());

        let err = orch.detach(Path::new("x.vhdx")).unwrap_err();
        match &err {
            VhdbranchError::CommandExecution { tool, summary, .. } => {
                assert_eq!(tool, "diskpart");
                assert_eq!(summary, "Virtual Disk Service error:");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.raw_output().unwrap().contains("The file exists."));
    }

    #[test]
    fn test_nonzero_exit_is_command_error() {
        let runner = Scripted::new(vec![CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "Access is denied.".into(),
        }]);
        let (_dir, orch) = orchestrator(runner);

        let err = orch.set_next_boot("{guid}").unwrap_err();
        assert_eq!(err.kind(), "command_execution");
        assert_eq!(err.raw_output(), Some("Access is denied."));
    }

    #[test]
    fn test_script_file_removed_after_run() {
        let runner = Scripted::new(vec![ok(
            "DiskPart successfully detached the virtual disk file.",
        )]);
        let (dir, orch) = orchestrator(runner.clone());

        orch.detach(Path::new("x.vhdx")).unwrap();

        let calls = runner.calls.lock();
        assert_eq!(calls[0].0, "diskpart");
        assert_eq!(calls[0].1[0], "/s");
        assert!(!Path::new(&calls[0].1[1]).exists());
        let tmp = dir.path().join("meta").join("tmp");
        assert_eq!(std::fs::read_dir(tmp).unwrap().count(), 0);
    }

    #[test]
    fn test_delete_missing_entry_is_not_an_error() {
        let runner = Scripted::new(vec![ok(
            "Windows Boot Manager\n--------------------\nidentifier              {bootmgr}\n",
        )]);
        let (_dir, orch) = orchestrator(runner.clone());

        assert!(!orch.delete_boot_entry("{gone}").unwrap());
        assert_eq!(runner.calls.lock().len(), 1);
    }

    #[test]
    fn test_privilege_check() {
        let denied = Scripted::new(vec![CommandOutput {
            exit_code: Some(2),
            ..Default::default()
        }]);
        let (_dir, orch) = orchestrator(denied);
        assert_eq!(orch.check_privileges().unwrap_err().kind(), "privilege");

        let (_dir, orch) = orchestrator(Scripted::new(vec![ok("")]));
        assert!(orch.check_privileges().is_ok());
    }
}
