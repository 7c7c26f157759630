//! Facts recovered from diskpart reports.

use serde::Serialize;

use super::{DISKPART_FAILURES, field, find_failure};
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

/// Parsed `detail vdisk` report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VdiskDetail {
    pub filename: Option<String>,
    pub state: Option<String>,
    pub is_child: bool,
    /// Parent disk file; `None` for base disks.
    pub parent: Option<String>,
    /// Disk number while attached.
    pub disk_number: Option<u32>,
}

impl VdiskDetail {
    pub fn is_attached(&self) -> bool {
        self.disk_number.is_some()
    }
}

/// Parse a `detail vdisk` report, possibly preceded by other script output.
pub fn parse_vdisk_detail(output: &str) -> VhdbranchResult<VdiskDetail> {
    const TARGET: &str = "detail vdisk";

    if let Some(line) = find_failure(output, DISKPART_FAILURES) {
        return Err(VhdbranchError::parse(
            TARGET,
            format!("tool reported failure: {line}"),
            output,
        ));
    }

    let mut detail = VdiskDetail::default();
    let mut seen_report = false;

    for line in output.lines() {
        if let Some(value) = field(line, "Filename") {
            detail.filename = non_empty(value);
            seen_report = true;
        } else if let Some(value) = field(line, "State") {
            detail.state = non_empty(value);
        } else if let Some(value) = field(line, "Is Child") {
            detail.is_child = value.eq_ignore_ascii_case("yes");
            seen_report = true;
        } else if let Some(value) = field(line, "Parent Filename") {
            detail.parent = non_empty(value).filter(|v| !is_not_found(v));
        } else if let Some(value) = field(line, "Associated disk#") {
            seen_report = true;
            if is_not_found(value) {
                detail.disk_number = None;
            } else {
                let number = value.parse::<u32>().map_err(|_| {
                    VhdbranchError::parse(
                        TARGET,
                        format!("unexpected disk number {value:?}"),
                        output,
                    )
                })?;
                detail.disk_number = Some(number);
            }
        }
    }

    if !seen_report {
        return Err(VhdbranchError::parse(
            TARGET,
            "virtual disk report not found",
            output,
        ));
    }
    if detail.is_child && detail.parent.is_none() {
        return Err(VhdbranchError::parse(
            TARGET,
            "child disk reports no parent filename",
            output,
        ));
    }

    Ok(detail)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn is_not_found(value: &str) -> bool {
    let lower = value.trim().trim_end_matches('.').to_lowercase();
    lower == "not found" || lower == "none"
}

/// One row of a diskpart volume table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    /// Volume number, valid while the owning disk stays attached.
    pub number: u32,
    pub letter: Option<char>,
    pub label: Option<String>,
    pub fs: Option<String>,
    pub kind: Option<String>,
    pub size: Option<String>,
    pub status: Option<String>,
    pub info: Option<String>,
    /// Volume GUID, when the report prints a `GUID:` line under the row.
    pub guid: Option<String>,
}

impl VolumeInfo {
    /// `size` in bytes, e.g. `"59 GB"`.
    pub fn size_bytes(&self) -> Option<u64> {
        let size = self.size.as_deref()?;
        let mut parts = size.split_whitespace();
        let value: u64 = parts.next()?.parse().ok()?;
        let multiplier: u64 = match parts.next()?.to_ascii_uppercase().as_str() {
            "B" => 1,
            "KB" => 1 << 10,
            "MB" => 1 << 20,
            "GB" => 1 << 30,
            "TB" => 1 << 40,
            _ => return None,
        };
        value.checked_mul(multiplier)
    }

    fn has_fs(&self, fs: &str) -> bool {
        self.fs.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(fs))
    }
}

/// Parse the volume table of a `list volume` or `detail disk` report.
///
/// Columns are located from the dashed separator line, so labels containing
/// spaces are preserved. A report stating the disk has no volumes yields an
/// empty list.
pub fn parse_volume_table(output: &str) -> VhdbranchResult<Vec<VolumeInfo>> {
    const TARGET: &str = "volume table";

    if let Some(line) = find_failure(output, DISKPART_FAILURES) {
        return Err(VhdbranchError::parse(
            TARGET,
            format!("tool reported failure: {line}"),
            output,
        ));
    }

    let lines: Vec<&str> = output.lines().collect();
    let Some(header_idx) = lines.iter().position(|l| l.contains("Volume ###")) else {
        if output.to_lowercase().contains("there are no volumes") {
            return Ok(Vec::new());
        }
        return Err(VhdbranchError::parse(TARGET, "volume table not found", output));
    };

    let separator = lines
        .get(header_idx + 1)
        .filter(|l| l.trim_start().starts_with('-'))
        .ok_or_else(|| VhdbranchError::parse(TARGET, "missing column separator", output))?;

    let columns = column_starts(separator);
    // The header may be indented differently from the separator and rows.
    let shift = indent(lines[header_idx]) as isize - indent(separator) as isize;
    let header_columns: Vec<usize> = columns
        .iter()
        .map(|&c| c.saturating_add_signed(shift))
        .collect();
    let headers: Vec<String> = slice_columns(lines[header_idx], &header_columns)
        .into_iter()
        .map(|h| h.to_lowercase())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (ltr, label, fs, kind, size, status, info) = (
        column("ltr"),
        column("label"),
        column("fs"),
        column("type"),
        column("size"),
        column("status"),
        column("info"),
    );

    let mut volumes: Vec<VolumeInfo> = Vec::new();
    for line in &lines[header_idx + 2..] {
        if line.trim().is_empty() {
            break;
        }
        if let Some((_, guid)) = line.split_once("GUID:") {
            if let Some(last) = volumes.last_mut() {
                let guid = guid.trim();
                last.guid = (!guid.is_empty()).then(|| guid.to_string());
            }
            continue;
        }
        let cells = slice_columns(line, &columns);
        let get = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .filter(|c| !c.is_empty())
                .cloned()
        };

        let first = cells.first().map(String::as_str).unwrap_or("");
        let first = first.trim_start_matches('*').trim();
        let number = first
            .strip_prefix("Volume")
            .and_then(|n| n.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                VhdbranchError::parse(TARGET, format!("unexpected volume row {line:?}"), output)
            })?;

        let letter = get(ltr).and_then(|l| {
            let mut chars = l.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase()),
                _ => None,
            }
        });

        volumes.push(VolumeInfo {
            number,
            letter,
            label: get(label),
            fs: get(fs),
            kind: get(kind),
            size: get(size),
            status: get(status),
            info: get(info),
            guid: None,
        });
    }

    Ok(volumes)
}

fn indent(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Start offsets (in chars) of each dash run.
fn column_starts(separator: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev = ' ';
    for (i, c) in separator.chars().enumerate() {
        if c == '-' && prev != '-' {
            starts.push(i);
        }
        prev = c;
    }
    starts
}

/// Cut `line` at the column starts. Each cell extends to the next column
/// start; the row's leading selection marker is kept in the first cell.
fn slice_columns(line: &str, starts: &[usize]) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut cells = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let from = if i == 0 { 0 } else { start.min(chars.len()) };
        let to = starts
            .get(i + 1)
            .copied()
            .unwrap_or(chars.len())
            .min(chars.len());
        let cell: String = if from < to {
            chars[from..to].iter().collect()
        } else {
            String::new()
        };
        cells.push(cell.trim().to_string());
    }
    cells
}

/// The two partitions every bootable disk in the tree carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskVolumes {
    pub efi: VolumeInfo,
    pub system: VolumeInfo,
}

/// Pick the EFI (FAT32) and system (largest NTFS) volumes of one disk.
pub fn classify_volumes(volumes: &[VolumeInfo], output: &str) -> VhdbranchResult<DiskVolumes> {
    const TARGET: &str = "disk volumes";

    let efi = volumes
        .iter()
        .find(|v| v.has_fs("FAT32"))
        .cloned()
        .ok_or_else(|| VhdbranchError::parse(TARGET, "no FAT32 EFI volume", output))?;

    let system = volumes
        .iter()
        .filter(|v| v.has_fs("NTFS"))
        .fold(None::<&VolumeInfo>, |best, v| match best {
            Some(b) if b.size_bytes().unwrap_or(0) >= v.size_bytes().unwrap_or(0) => Some(b),
            _ => Some(v),
        })
        .cloned()
        .ok_or_else(|| VhdbranchError::parse(TARGET, "no NTFS system volume", output))?;

    Ok(DiskVolumes { efi, system })
}
