//! Output parsers for the external tools.
//!
//! Pure functions from raw tool text to structured facts. A missing,
//! malformed or ambiguous fact is a `Parse` error, never a silent default.
//! All tool-version-specific matching lives under this module.

pub mod bcdedit;
pub mod diskpart;
pub mod dism;

/// Lines diskpart prints when a directive failed, even with exit code 0.
pub const DISKPART_FAILURES: &[&str] = &[
    "diskpart has encountered an error",
    "virtual disk service error",
    "diskpart failed to",
    "there is no disk selected",
    "there is no volume selected",
    "there is no virtual disk selected",
    "the volume you selected is not valid",
    "the disk you specified is not valid",
    "the system cannot find the file specified",
    "the specified assigned drive letter is not available",
    "the arguments specified for this command are not valid",
];

/// Lines bcdedit prints on failure.
pub const BCDEDIT_FAILURES: &[&str] = &[
    "an error occurred",
    "an error has occurred",
    "the boot configuration data store could not be opened",
    "the parameter is incorrect",
    "the specified entry identifier",
];

/// Lines bcdboot prints on failure.
pub const BCDBOOT_FAILURES: &[&str] = &[
    "failure when attempting",
    "bfsvc error",
    "the parameter is incorrect",
];

/// Lines dism prints on failure.
pub const DISM_FAILURES: &[&str] = &["error:", "an error occurred"];

/// First line of `output` containing one of `markers`, case-insensitively.
pub fn find_failure<'a>(output: &'a str, markers: &[&str]) -> Option<&'a str> {
    output.lines().map(str::trim).find(|line| {
        let lower = line.to_lowercase();
        markers.iter().any(|marker| lower.contains(marker))
    })
}

/// Value after the first `:` of a `Key: value` line whose key matches
/// `key` case-insensitively.
pub(crate) fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (k, v) = line.split_once(':')?;
    if k.trim().eq_ignore_ascii_case(key) {
        Some(v.trim())
    } else {
        None
    }
}
