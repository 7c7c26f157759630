//! Boot entries from `bcdedit /enum all /v`.

use std::collections::HashSet;

use serde::Serialize;

use super::{BCDEDIT_FAILURES, find_failure};
use crate::util::normalize_disk_path;
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

/// One entry of the boot configuration store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BootEntry {
    /// Section heading, e.g. `Windows Boot Loader`.
    pub kind: String,
    pub identifier: String,
    pub description: Option<String>,
    pub device: Option<String>,
    pub osdevice: Option<String>,
}

impl BootEntry {
    /// Whether `device` or `osdevice` points at the disk file `disk_path`.
    pub fn references_disk(&self, disk_path: &str) -> bool {
        [&self.device, &self.osdevice]
            .into_iter()
            .flatten()
            .filter_map(|value| vhd_reference(value))
            .any(|reference| reference.matches(disk_path))
    }
}

/// Disk file named by a `vhd=[<volume>]<path>,...` device value.
#[derive(Debug, PartialEq, Eq)]
struct VhdReference {
    /// `C:` style volume, absent for `[locate]` and device paths.
    drive: Option<String>,
    path: String,
}

impl VhdReference {
    fn matches(&self, disk_path: &str) -> bool {
        let target = normalize_disk_path(disk_path);
        match &self.drive {
            Some(drive) => normalize_disk_path(&format!("{drive}{}", self.path)) == target,
            None => {
                let target = strip_drive(&target);
                normalize_disk_path(&self.path) == target
            }
        }
    }
}

fn strip_drive(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        &path[2..]
    } else {
        path
    }
}

fn vhd_reference(value: &str) -> Option<VhdReference> {
    let rest = value.trim().strip_prefix("vhd=")?;
    let rest = rest.split(",locate").next().unwrap_or(rest);
    let (volume, path) = match rest.strip_prefix('[') {
        Some(inner) => {
            let (volume, path) = inner.split_once(']')?;
            (Some(volume.trim()), path)
        }
        None => (None, rest),
    };

    let drive = volume.filter(|v| {
        let b = v.as_bytes();
        b.len() == 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
    });
    Some(VhdReference {
        drive: drive.map(str::to_string),
        path: path.trim().to_string(),
    })
}

/// Parse a verbose enumeration into entries, in store order.
pub fn parse_boot_entries(output: &str) -> VhdbranchResult<Vec<BootEntry>> {
    const TARGET: &str = "boot entries";

    if let Some(line) = find_failure(output, BCDEDIT_FAILURES) {
        return Err(VhdbranchError::parse(
            TARGET,
            format!("tool reported failure: {line}"),
            output,
        ));
    }

    let lines: Vec<&str> = output.lines().collect();
    let mut entries: Vec<BootEntry> = Vec::new();
    let mut current: Option<BootEntry> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let is_heading = lines
            .get(i + 1)
            .is_some_and(|next| is_underline(next) && !line.trim().is_empty());

        if is_heading {
            if let Some(entry) = current.take() {
                entries.push(finish(entry, output)?);
            }
            current = Some(BootEntry {
                kind: line.trim().to_string(),
                ..Default::default()
            });
            i += 2;
            continue;
        }

        // Continuation lines of multi-valued elements start with whitespace.
        if let Some(entry) = current.as_mut()
            && !line.starts_with(char::is_whitespace)
            && let Some((key, value)) = split_element(line)
        {
            match key.to_ascii_lowercase().as_str() {
                "identifier" => entry.identifier = value.to_string(),
                "description" => entry.description = Some(value.to_string()),
                "device" => entry.device = Some(value.to_string()),
                "osdevice" => entry.osdevice = Some(value.to_string()),
                _ => {}
            }
        }
        i += 1;
    }
    if let Some(entry) = current.take() {
        entries.push(finish(entry, output)?);
    }

    if entries.is_empty() {
        return Err(VhdbranchError::parse(TARGET, "no boot entries found", output));
    }
    Ok(entries)
}

fn is_underline(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '-')
}

fn split_element(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end();
    let split = line.find(char::is_whitespace)?;
    let (key, value) = line.split_at(split);
    let value = value.trim();
    (!value.is_empty()).then_some((key, value))
}

fn finish(entry: BootEntry, output: &str) -> VhdbranchResult<BootEntry> {
    if entry.identifier.is_empty() {
        return Err(VhdbranchError::parse(
            "boot entries",
            format!("entry {:?} has no identifier", entry.kind),
            output,
        ));
    }
    Ok(entry)
}

/// Identifier of the single entry referencing `disk_path`.
///
/// No match is `Ok(None)`. Several distinct matching entries are ambiguous
/// and fail rather than picking one.
pub fn resolve_entry_for_disk(
    entries: &[BootEntry],
    disk_path: &str,
    output: &str,
) -> VhdbranchResult<Option<String>> {
    let mut matches: Vec<&str> = Vec::new();
    for entry in entries.iter().filter(|e| e.references_disk(disk_path)) {
        if !matches
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&entry.identifier))
        {
            matches.push(&entry.identifier);
        }
    }

    match matches.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(only.to_string())),
        many => Err(VhdbranchError::parse(
            "boot entry resolution",
            format!(
                "{} entries reference {}: {}",
                many.len(),
                disk_path,
                many.join(", ")
            ),
            output,
        )),
    }
}

/// Lowercased identifiers of every entry, for existence checks.
pub fn identifiers(entries: &[BootEntry]) -> HashSet<String> {
    entries
        .iter()
        .map(|e| e.identifier.to_ascii_lowercase())
        .collect()
}
