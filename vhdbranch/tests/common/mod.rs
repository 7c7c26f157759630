//! Simulated Windows machine for integration tests.
//!
//! `FakeMachine` implements `ToolRunner` by interpreting diskpart scripts and
//! dism/bcdboot/bcdedit command lines over in-memory disk and boot-store
//! state. Disk files and mount directories are real files under a temp dir,
//! so the engine's filesystem checks see the same picture.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use uuid::Uuid;
use vhdbranch::{
    CommandOutput, CreateBaseRequest, Node, ToolRunner, VhdbranchResult, Workspace,
    WorkspaceOptions,
};

const BOOT_MANAGER_ID: &str = "{9dea862c-5cdd-4e70-acc1-f32b344d4795}";

// ============================================================================
// MACHINE STATE
// ============================================================================

#[derive(Clone, Debug)]
struct FakeVolume {
    fs: &'static str,
    label: String,
    size_mb: u64,
    has_windows: bool,
}

#[derive(Debug)]
struct Attachment {
    disk_number: u32,
    readonly: bool,
    volume_numbers: Vec<u32>,
}

#[derive(Debug)]
struct FakeDisk {
    parent: Option<PathBuf>,
    size_mb: u64,
    volumes: Vec<FakeVolume>,
    attachment: Option<Attachment>,
}

/// A boot-store entry as the simulated firmware sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeBootEntry {
    pub identifier: String,
    pub description: String,
    pub disk: PathBuf,
}

struct Injected {
    pattern: String,
    output: CommandOutput,
}

#[derive(Default)]
struct Cursor {
    vdisk: Option<PathBuf>,
    disk: Option<u32>,
    volume: Option<u32>,
    pending_partition: Option<Option<u64>>,
}

struct MachineState {
    disks: HashMap<PathBuf, FakeDisk>,
    next_disk_number: u32,
    next_volume_number: u32,
    mounts: HashMap<u32, PathBuf>,
    letters: HashMap<u32, char>,
    entries: Vec<FakeBootEntry>,
    boot_sequence: Option<String>,
    injected: Vec<Injected>,
    reject_mount_dirs: bool,
    elevated: bool,
    invocations: Vec<String>,
}

type Hook = Box<dyn FnOnce() + Send>;

pub struct FakeMachine {
    state: Mutex<MachineState>,
    /// Callback fired once, before the next invocation of the named tool.
    hook: Mutex<Option<(String, Hook)>>,
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn fail(code: i32, stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

/// Value of `key="..."` in a directive.
fn quoted(directive: &str, key: &str) -> Option<PathBuf> {
    let start = directive.find(&format!("{key}=\""))? + key.len() + 2;
    let len = directive[start..].find('"')?;
    Some(PathBuf::from(&directive[start..start + len]))
}

/// Value of `key=value` (unquoted) in a directive.
fn plain(directive: &str, key: &str) -> Option<String> {
    directive
        .split_whitespace()
        .find_map(|token| token.strip_prefix(&format!("{key}=")))
        .map(str::to_string)
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
}

fn clear_dir(dir: &Path) {
    if let Ok(read) = std::fs::read_dir(dir) {
        for entry in read.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(&path);
            } else {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

impl MachineState {
    fn take_injected(&mut self, command_line: &str) -> Option<CommandOutput> {
        let idx = self
            .injected
            .iter()
            .position(|i| command_line.contains(&i.pattern))?;
        Some(self.injected.remove(idx).output)
    }

    /// Disk path and volume index of an attached volume number.
    fn locate_volume(&self, number: u32) -> Option<(PathBuf, usize)> {
        self.disks.iter().find_map(|(path, disk)| {
            let attachment = disk.attachment.as_ref()?;
            let idx = attachment.volume_numbers.iter().position(|n| *n == number)?;
            Some((path.clone(), idx))
        })
    }

    fn volume_mut(&mut self, number: u32) -> Option<&mut FakeVolume> {
        let (path, idx) = self.locate_volume(number)?;
        self.disks.get_mut(&path)?.volumes.get_mut(idx)
    }

    fn volume_mounted_at(&self, dir: &Path) -> Option<u32> {
        self.mounts
            .iter()
            .find(|(_, mounted)| same_path(mounted, dir))
            .map(|(n, _)| *n)
    }

    fn selected_disk_path(&self, cursor: &Cursor) -> Option<PathBuf> {
        if let Some(number) = cursor.disk {
            return self.disks.iter().find_map(|(path, disk)| {
                (disk.attachment.as_ref()?.disk_number == number).then(|| path.clone())
            });
        }
        cursor
            .vdisk
            .clone()
            .filter(|p| self.disks.get(p).is_some_and(|d| d.attachment.is_some()))
    }

    // ------------------------------------------------------------------------
    // diskpart
    // ------------------------------------------------------------------------

    fn diskpart(&mut self, script: &str) -> CommandOutput {
        let mut out = String::from("\nMicrosoft DiskPart version 10.0.22621.1\n\n");
        let mut cursor = Cursor::default();
        for directive in script.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Err(message) = self.directive(directive, &mut cursor, &mut out) {
                out.push_str(&message);
                return fail(1, out);
            }
            out.push('\n');
        }
        ok(out)
    }

    fn directive(
        &mut self,
        directive: &str,
        cursor: &mut Cursor,
        out: &mut String,
    ) -> Result<(), String> {
        let lower = directive.to_lowercase();
        let invalid = || "The arguments specified for this command are not valid.\n".to_string();

        if lower.starts_with("create vdisk") {
            let file = quoted(directive, "file").ok_or_else(invalid)?;
            if file.exists() {
                return Err("Virtual Disk Service error:\nThe file exists.\n".into());
            }
            let disk = match quoted(directive, "parent") {
                Some(parent) => {
                    let source = self
                        .disks
                        .get(&parent)
                        .filter(|_| parent.is_file())
                        .ok_or(
                            "Virtual Disk Service error:\nThe system cannot find the file specified.\n",
                        )?;
                    FakeDisk {
                        parent: Some(parent.clone()),
                        size_mb: source.size_mb,
                        volumes: source.volumes.clone(),
                        attachment: None,
                    }
                }
                None => FakeDisk {
                    parent: None,
                    size_mb: plain(&lower, "maximum")
                        .and_then(|m| m.parse().ok())
                        .ok_or_else(invalid)?,
                    volumes: Vec::new(),
                    attachment: None,
                },
            };
            std::fs::write(&file, b"vhdx").map_err(|e| {
                format!("Virtual Disk Service error:\n{e}\n")
            })?;
            self.disks.insert(file, disk);
            out.push_str(
                "  100 percent completed\n\nDiskPart successfully created the virtual disk file.\n",
            );
        } else if lower.starts_with("select vdisk") {
            let file = quoted(directive, "file").ok_or_else(invalid)?;
            if !file.is_file() || !self.disks.contains_key(&file) {
                return Err(
                    "DiskPart has encountered an error: The system cannot find the file specified.\n"
                        .into(),
                );
            }
            cursor.vdisk = Some(file);
            out.push_str("DiskPart successfully selected the virtual disk file.\n");
        } else if lower.starts_with("attach vdisk") {
            let path = cursor
                .vdisk
                .clone()
                .ok_or("There is no virtual disk selected.\n")?;
            let readonly = lower.contains("readonly");
            let disk_number = self.next_disk_number;
            let first_volume = self.next_volume_number;
            let disk = self
                .disks
                .get_mut(&path)
                .ok_or("There is no virtual disk selected.\n")?;
            if disk.attachment.is_some() {
                return Err(
                    "Virtual Disk Service error:\nThe virtual disk is already attached.\n".into(),
                );
            }
            let count = disk.volumes.len() as u32;
            disk.attachment = Some(Attachment {
                disk_number,
                readonly,
                volume_numbers: (first_volume..first_volume + count).collect(),
            });
            self.next_disk_number += 1;
            self.next_volume_number += count;
            cursor.disk = Some(disk_number);
            out.push_str(
                "  100 percent completed\n\nDiskPart successfully attached the virtual disk file.\n",
            );
        } else if lower.starts_with("detach vdisk") {
            let path = cursor
                .vdisk
                .clone()
                .ok_or("There is no virtual disk selected.\n")?;
            let attachment = self
                .disks
                .get_mut(&path)
                .and_then(|d| d.attachment.take())
                .ok_or("Virtual Disk Service error:\nThe virtual disk is not attached.\n")?;
            for number in attachment.volume_numbers {
                self.mounts.remove(&number);
                self.letters.remove(&number);
            }
            out.push_str("DiskPart successfully detached the virtual disk file.\n");
        } else if lower.starts_with("convert gpt") {
            self.selected_disk_path(cursor)
                .ok_or("There is no disk selected to convert.\n")?;
            out.push_str("DiskPart successfully converted the selected disk to GPT format.\n");
        } else if lower.starts_with("create partition") {
            self.selected_disk_path(cursor)
                .ok_or("There is no disk selected.\n")?;
            let size = plain(&lower, "size").and_then(|s| s.parse().ok());
            cursor.pending_partition = (!lower.contains(" msr")).then_some(size);
            out.push_str("DiskPart succeeded in creating the specified partition.\n");
        } else if lower.starts_with("format") {
            let path = self
                .selected_disk_path(cursor)
                .ok_or("There is no volume selected.\n")?;
            let size = cursor
                .pending_partition
                .take()
                .ok_or("There is no volume selected.\n")?;
            let fs = match plain(&lower, "fs").as_deref() {
                Some("fat32") => "FAT32",
                Some("ntfs") => "NTFS",
                _ => return Err(invalid()),
            };
            let label = quoted(directive, "label")
                .map(|l| l.to_string_lossy().into_owned())
                .unwrap_or_default();
            let number = self.next_volume_number;
            let disk = self.disks.get_mut(&path).ok_or_else(invalid)?;
            let attachment = disk.attachment.as_mut().ok_or_else(invalid)?;
            if attachment.readonly {
                return Err("Virtual Disk Service error:\nThe media is write protected.\n".into());
            }
            let used: u64 = disk.volumes.iter().map(|v| v.size_mb).sum::<u64>() + 16;
            disk.volumes.push(FakeVolume {
                fs,
                label,
                size_mb: size.unwrap_or(disk.size_mb.saturating_sub(used)),
                has_windows: false,
            });
            attachment.volume_numbers.push(number);
            self.next_volume_number += 1;
            cursor.volume = Some(number);
            out.push_str(
                "  100 percent completed\n\nDiskPart successfully formatted the volume.\n",
            );
        } else if lower.starts_with("detail vdisk") {
            let path = cursor
                .vdisk
                .clone()
                .ok_or("There is no virtual disk selected.\n")?;
            self.detail_vdisk(&path, out);
        } else if lower.starts_with("select disk") {
            let number: u32 = lower["select disk".len()..]
                .trim()
                .parse()
                .map_err(|_| invalid())?;
            let exists = self
                .disks
                .values()
                .any(|d| d.attachment.as_ref().is_some_and(|a| a.disk_number == number));
            if !exists {
                return Err("The disk you specified is not valid.\n".into());
            }
            cursor.disk = Some(number);
            out.push_str(&format!("Disk {number} is now the selected disk.\n"));
        } else if lower.starts_with("detail disk") {
            let path = self
                .selected_disk_path(cursor)
                .ok_or("There is no disk selected.\n")?;
            self.detail_disk(&path, out);
        } else if lower.starts_with("select volume") {
            let number: u32 = lower["select volume".len()..]
                .trim()
                .parse()
                .map_err(|_| invalid())?;
            if self.locate_volume(number).is_none() {
                return Err("The volume you selected is not valid or does not exist.\n".into());
            }
            cursor.volume = Some(number);
            out.push_str(&format!("Volume {number} is the selected volume.\n"));
        } else if lower.starts_with("assign mount") {
            let volume = cursor.volume.ok_or("There is no volume selected.\n")?;
            let dir = quoted(directive, "mount").ok_or_else(invalid)?;
            let empty = std::fs::read_dir(&dir)
                .map(|mut r| r.next().is_none())
                .unwrap_or(false);
            if !empty || self.mounts.contains_key(&volume) {
                return Err("Virtual Disk Service error:\nThe path is not valid.\n".into());
            }
            let has_windows = self.volume_mut(volume).is_some_and(|v| v.has_windows);
            if has_windows {
                let _ = std::fs::create_dir_all(dir.join("Windows").join("System32"));
            }
            self.mounts.insert(volume, dir);
            out.push_str("DiskPart successfully assigned the drive letter or mount point.\n");
        } else if lower.starts_with("remove mount") {
            let volume = cursor.volume.ok_or("There is no volume selected.\n")?;
            let dir = quoted(directive, "mount").ok_or_else(invalid)?;
            match self.mounts.get(&volume) {
                Some(mounted) if same_path(mounted, &dir) => {}
                _ => {
                    return Err(
                        "Virtual Disk Service error:\nThe mount point is not valid.\n".into(),
                    );
                }
            }
            self.mounts.remove(&volume);
            clear_dir(&dir);
            out.push_str("DiskPart successfully removed the drive letter or mount point.\n");
        } else if lower.starts_with("assign letter") {
            let volume = cursor.volume.ok_or("There is no volume selected.\n")?;
            let letter = plain(directive, "letter")
                .and_then(|l| l.chars().next())
                .ok_or_else(invalid)?
                .to_ascii_uppercase();
            if self.letters.values().any(|l| *l == letter) {
                return Err("The specified assigned drive letter is not available.\n".into());
            }
            self.letters.insert(volume, letter);
            out.push_str("DiskPart successfully assigned the drive letter or mount point.\n");
        } else if lower.starts_with("remove letter") {
            let volume = cursor.volume.ok_or("There is no volume selected.\n")?;
            let letter = plain(directive, "letter")
                .and_then(|l| l.chars().next())
                .ok_or_else(invalid)?
                .to_ascii_uppercase();
            if self.letters.get(&volume) != Some(&letter) {
                return Err(
                    "Virtual Disk Service error:\nThe drive letter is not assigned.\n".into(),
                );
            }
            self.letters.remove(&volume);
            out.push_str("DiskPart successfully removed the drive letter or mount point.\n");
        } else {
            return Err(invalid());
        }
        Ok(())
    }

    fn detail_vdisk(&self, path: &Path, out: &mut String) {
        let Some(disk) = self.disks.get(path) else {
            return;
        };
        let parent = disk
            .parent
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let associated = disk
            .attachment
            .as_ref()
            .map(|a| a.disk_number.to_string())
            .unwrap_or_else(|| "Not found.".to_string());
        out.push_str(&format!(
            "Device type ID: 3 (Unknown)\n\
             Vendor ID: {{EC984AEC-A0F9-47E9-901F-71415A66345B}} (Microsoft Corporation)\n\
             State: {}\n\
             Virtual size: {:>6} GB\n\
             Physical size: 4096 KB\n\
             Filename: {}\n\
             Is Child: {}\n\
             Parent Filename: {}\n\
             Associated disk#: {}\n",
            if disk.attachment.is_some() { "Attached not open" } else { "Added" },
            disk.size_mb / 1024,
            path.display(),
            if disk.parent.is_some() { "Yes" } else { "No" },
            parent,
            associated
        ));
    }

    fn detail_disk(&self, path: &Path, out: &mut String) {
        let Some(disk) = self.disks.get(path) else {
            return;
        };
        let Some(attachment) = &disk.attachment else {
            return;
        };
        out.push_str(
            "Msft Virtual Disk SCSI Disk Device\n\
             Disk ID: {8A3F2C10-6B1E-4C6A-9F1D-2D3B4A5C6D7E}\n\
             Type   : File Backed Virtual\n\
             Status : Online\n\n",
        );
        if disk.volumes.is_empty() {
            out.push_str("There are no volumes.\n");
            return;
        }

        let row = |cells: [&str; 8]| {
            format!(
                "  {:<10}  {:<3}  {:<11}  {:<5}  {:<10}  {:>7}  {:<9}  {:<8}\n",
                cells[0], cells[1], cells[2], cells[3], cells[4], cells[5], cells[6], cells[7]
            )
        };
        out.push_str(&row([
            "Volume ###", "Ltr", "Label", "Fs", "Type", "Size", "Status", "Info",
        ]));
        out.push_str(&row([
            "----------", "---", "-----------", "-----", "----------", "-------", "---------",
            "--------",
        ]));
        for (volume, number) in disk.volumes.iter().zip(&attachment.volume_numbers) {
            let name = format!("Volume {number}");
            let letter = self
                .letters
                .get(number)
                .map(|l| l.to_string())
                .unwrap_or_default();
            let size = if volume.size_mb >= 1024 {
                format!("{} GB", volume.size_mb / 1024)
            } else {
                format!("{} MB", volume.size_mb)
            };
            let info = if volume.fs == "FAT32" { "Hidden" } else { "" };
            out.push_str(&row([
                &name,
                &letter,
                &volume.label,
                volume.fs,
                "Partition",
                &size,
                "Healthy",
                info,
            ]));
        }
    }

    // ------------------------------------------------------------------------
    // dism
    // ------------------------------------------------------------------------

    fn dism(&mut self, args: &[String]) -> CommandOutput {
        let arg = |prefix: &str| {
            args.iter()
                .find_map(|a| a.strip_prefix(prefix))
                .map(str::to_string)
        };

        if args.iter().any(|a| a == "/Get-WimInfo") {
            let wim = arg("/WimFile:").unwrap_or_default();
            if !Path::new(&wim).is_file() {
                return fail(2, "Error: 2\n\nThe system cannot find the file specified.\n");
            }
            return ok(format!(
                "Deployment Image Servicing and Management tool\n\
                 Version: 10.0.22621.1\n\n\
                 Details for image : {wim}\n\n\
                 Index : 1\nName : Windows 11 Home\nDescription : Windows 11 Home\n\
                 Size : 16,815,487,301 bytes\n\n\
                 Index : 6\nName : Windows 11 Pro\nDescription : Windows 11 Pro\n\
                 Size : 17,027,352,135 bytes\n\n\
                 The operation completed successfully.\n"
            ));
        }

        if args.iter().any(|a| a == "/Apply-Image") {
            let index = arg("/Index:").unwrap_or_default();
            if index != "1" && index != "6" {
                return fail(87, "Error: 87\n\nThe specified image index is not valid.\n");
            }
            let dir = PathBuf::from(arg("/ApplyDir:").unwrap_or_default());
            let Some(volume) = self.volume_mounted_at(&dir) else {
                return fail(3, "Error: 3\n\nThe system cannot find the path specified.\n");
            };
            if let Some(v) = self.volume_mut(volume) {
                v.has_windows = true;
            }
            let _ = std::fs::create_dir_all(dir.join("Windows").join("System32"));
            return ok(
                "Applying image\n[==========================100.0%==========================]\n\
                 The operation completed successfully.\n",
            );
        }

        fail(87, "Error: 87\n\nThe option is unknown.\n")
    }

    // ------------------------------------------------------------------------
    // bcdboot / bcdedit
    // ------------------------------------------------------------------------

    fn bcdboot(&mut self, args: &[String]) -> CommandOutput {
        const FAILED: &str = "Failure when attempting to copy boot files.\n";

        let (Some(windows), Some(target)) = (args.first(), args.get(2)) else {
            return fail(87, "The parameter is incorrect.\n");
        };
        let windows = PathBuf::from(windows);
        let Some(system_volume) = windows
            .parent()
            .filter(|_| windows.is_dir())
            .and_then(|dir| self.volume_mounted_at(dir))
        else {
            return fail(1, FAILED);
        };

        let is_letter = target.len() == 2 && target.ends_with(':');
        let efi_volume = if is_letter {
            let letter = target.chars().next().unwrap_or(' ').to_ascii_uppercase();
            self.letters
                .iter()
                .find(|(_, l)| **l == letter)
                .map(|(n, _)| *n)
        } else if self.reject_mount_dirs {
            None
        } else {
            self.volume_mounted_at(Path::new(target))
        };
        let Some(efi_volume) = efi_volume else {
            return fail(1, FAILED);
        };

        let (Some((disk, _)), Some((efi_disk, efi_idx))) = (
            self.locate_volume(system_volume),
            self.locate_volume(efi_volume),
        ) else {
            return fail(1, FAILED);
        };
        let efi_is_fat = self
            .disks
            .get(&efi_disk)
            .and_then(|d| d.volumes.get(efi_idx))
            .is_some_and(|v| v.fs == "FAT32");
        if disk != efi_disk || !efi_is_fat {
            return fail(1, FAILED);
        }

        self.entries.push(FakeBootEntry {
            identifier: format!("{{{}}}", Uuid::new_v4()),
            description: "Windows 11".into(),
            disk,
        });
        ok("Boot files successfully created.\n")
    }

    fn bcdedit(&mut self, args: &[String]) -> CommandOutput {
        const MISSING: &str = "An error occurred while attempting to reference the specified entry.\n\
                               The system cannot find the file specified.\n";
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let position = |guid: &str| -> Option<usize> {
            self.entries
                .iter()
                .position(|e| e.identifier.eq_ignore_ascii_case(guid))
        };

        match args.as_slice() {
            ["/enum", "all", "/v"] => ok(self.render_store()),
            ["/delete", guid] => match position(guid) {
                Some(idx) => {
                    self.entries.remove(idx);
                    if self
                        .boot_sequence
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case(guid))
                    {
                        self.boot_sequence = None;
                    }
                    ok("The operation completed successfully.\n")
                }
                None => fail(1, MISSING),
            },
            ["/bootsequence", guid] => match position(guid) {
                Some(_) => {
                    self.boot_sequence = Some(guid.to_string());
                    ok("The operation completed successfully.\n")
                }
                None => fail(1, MISSING),
            },
            ["/set", guid, "description", text] => match position(guid) {
                Some(idx) => {
                    self.entries[idx].description = text.to_string();
                    ok("The operation completed successfully.\n")
                }
                None => fail(1, MISSING),
            },
            _ => fail(87, "The parameter is incorrect.\n"),
        }
    }

    fn render_store(&self) -> String {
        let mut out = format!(
            "\nWindows Boot Manager\n--------------------\n\
             identifier              {BOOT_MANAGER_ID}\n\
             device                  partition=\\Device\\HarddiskVolume1\n\
             description             Windows Boot Manager\n"
        );
        for (i, entry) in self.entries.iter().enumerate() {
            let key = if i == 0 { "displayorder" } else { "" };
            out.push_str(&format!("{key:<24}{}\n", entry.identifier));
        }
        if let Some(sequence) = &self.boot_sequence {
            out.push_str(&format!("bootsequence            {sequence}\n"));
        }
        out.push_str("timeout                 30\n");

        for entry in &self.entries {
            let device = format!("vhd=[locate]{}", entry.disk.display());
            out.push_str(&format!(
                "\nWindows Boot Loader\n-------------------\n\
                 identifier              {}\n\
                 device                  {device}\n\
                 path                    \\Windows\\system32\\winload.efi\n\
                 description             {}\n\
                 osdevice                {device}\n\
                 systemroot              \\Windows\n",
                entry.identifier, entry.description
            ));
        }
        out
    }
}

impl FakeMachine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hook: Mutex::new(None),
            state: Mutex::new(MachineState {
                disks: HashMap::new(),
                next_disk_number: 2,
                next_volume_number: 3,
                mounts: HashMap::new(),
                letters: HashMap::new(),
                entries: Vec::new(),
                boot_sequence: None,
                injected: Vec::new(),
                reject_mount_dirs: false,
                elevated: true,
                invocations: Vec::new(),
            }),
        })
    }

    /// Answer the next invocation whose command line (or diskpart script)
    /// contains `pattern` with a failure instead of running it.
    pub fn fail_next(&self, pattern: &str, exit_code: i32, output: &str) {
        self.state.lock().injected.push(Injected {
            pattern: pattern.to_string(),
            output: fail(exit_code, output),
        });
    }

    /// Run `f` just before the next `tool` invocation, while the calling
    /// workflow is in flight.
    pub fn before_next(&self, tool: &str, f: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some((tool.to_string(), Box::new(f)));
    }

    /// Make bcdboot refuse directory targets, forcing the drive-letter path.
    pub fn reject_mount_directories(&self, reject: bool) {
        self.state.lock().reject_mount_dirs = reject;
    }

    pub fn set_elevated(&self, elevated: bool) {
        self.state.lock().elevated = elevated;
    }

    pub fn boot_entries(&self) -> Vec<FakeBootEntry> {
        self.state.lock().entries.clone()
    }

    pub fn boot_sequence(&self) -> Option<String> {
        self.state.lock().boot_sequence.clone()
    }

    /// Delete a boot entry behind the engine's back.
    pub fn remove_boot_entry(&self, guid: &str) {
        self.state
            .lock()
            .entries
            .retain(|e| !e.identifier.eq_ignore_ascii_case(guid));
    }

    /// Point an existing entry at another disk.
    pub fn rebind_boot_entry(&self, guid: &str, disk: &Path) {
        let mut state = self.state.lock();
        for entry in state.entries.iter_mut() {
            if entry.identifier.eq_ignore_ascii_case(guid) {
                entry.disk = disk.to_path_buf();
            }
        }
    }

    /// Add another entry pointing at `disk`, as a stray bcdboot run would.
    pub fn add_boot_entry(&self, disk: &Path) -> String {
        let identifier = format!("{{{}}}", Uuid::new_v4());
        self.state.lock().entries.push(FakeBootEntry {
            identifier: identifier.clone(),
            description: "Windows 11".into(),
            disk: disk.to_path_buf(),
        });
        identifier
    }

    pub fn attached_disks(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .disks
            .iter()
            .filter(|(_, d)| d.attachment.is_some())
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn is_readonly_attached(&self, disk: &Path) -> bool {
        self.state
            .lock()
            .disks
            .get(disk)
            .and_then(|d| d.attachment.as_ref())
            .is_some_and(|a| a.readonly)
    }

    pub fn mounted_dirs(&self) -> Vec<PathBuf> {
        self.state.lock().mounts.values().cloned().collect()
    }

    pub fn assigned_letters(&self) -> Vec<char> {
        self.state.lock().letters.values().copied().collect()
    }

    /// Parent recorded inside the disk file.
    pub fn parent_of(&self, disk: &Path) -> Option<PathBuf> {
        self.state.lock().disks.get(disk)?.parent.clone()
    }

    /// Tool invocations so far, one line each (`tool args` or the script).
    pub fn invocations(&self) -> Vec<String> {
        self.state.lock().invocations.clone()
    }
}

impl ToolRunner for FakeMachine {
    fn run(&self, program: &Path, args: &[String]) -> VhdbranchResult<CommandOutput> {
        let tool = program
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let script = match (tool.as_str(), args.get(1)) {
            ("diskpart", Some(path)) => std::fs::read_to_string(path)?,
            _ => String::new(),
        };

        let hook = {
            let mut slot = self.hook.lock();
            match slot.take() {
                Some((name, f)) if name == tool => Some(f),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(f) = hook {
            f();
        }

        let mut state = self.state.lock();
        let summary = if script.is_empty() {
            format!("{tool} {}", args.join(" "))
        } else {
            format!("{tool} {}", script.lines().collect::<Vec<_>>().join("; "))
        };
        state.invocations.push(summary.clone());

        if let Some(output) = state.take_injected(&summary) {
            return Ok(output);
        }

        Ok(match tool.as_str() {
            "diskpart" => state.diskpart(&script),
            "dism" => state.dism(args),
            "bcdboot" => state.bcdboot(args),
            "bcdedit" => state.bcdedit(args),
            "net" if state.elevated => ok("There are no entries in the list.\n"),
            "net" => fail(2, "System error 5 has occurred.\n\nAccess is denied.\n"),
            other => fail(9009, format!("'{other}' is not recognized as a command.\n")),
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Initialized workspace on a fresh simulated machine.
pub struct TestContext {
    pub machine: Arc<FakeMachine>,
    pub workspace: Workspace,
    pub image: PathBuf,
    pub root: PathBuf,
    _temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("ws");
        let image = temp_dir.path().join("install.wim");
        std::fs::write(&image, b"wim").expect("Failed to write image");

        let machine = FakeMachine::new();
        let workspace = Workspace::initialize(Self::options_for(&root), machine.clone())
            .expect("Failed to initialize workspace");
        Self {
            machine,
            workspace,
            image,
            root,
            _temp_dir: temp_dir,
        }
    }

    pub fn options_for(root: &Path) -> WorkspaceOptions {
        WorkspaceOptions {
            reconcile_on_open: false,
            ..WorkspaceOptions::with_root(root)
        }
    }

    pub fn base_request(&self, name: &str) -> CreateBaseRequest {
        CreateBaseRequest {
            name: name.to_string(),
            desc: None,
            image: self.image.clone(),
            index: 6,
            size_gb: 60,
        }
    }

    pub fn create_base(&self, name: &str) -> Node {
        self.workspace
            .create_base(&self.base_request(name))
            .expect("Failed to create base")
    }

    pub fn create_diff(&self, parent: &Node, name: &str) -> Node {
        self.workspace
            .create_diff(&parent.id, name, None)
            .expect("Failed to create diff")
    }

    /// Workspace opened again over the same root and machine.
    pub fn reopen(&self) -> Workspace {
        Workspace::open(Self::options_for(&self.root), self.machine.clone())
            .expect("Failed to reopen workspace")
    }

    /// Entries left under the mount scratch directory.
    pub fn mount_residue(&self) -> usize {
        std::fs::read_dir(self.workspace.layout().mount_root())
            .map(|r| r.count())
            .unwrap_or(0)
    }
}
