//! Image-tool reports (`dism /English`).

use super::{DISM_FAILURES, field, find_failure};
use crate::runtime::types::ImageInfo;
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

const COMPLETED: &str = "the operation completed successfully";

/// Parse `/Get-WimInfo` into one entry per image index.
pub fn parse_image_info(output: &str) -> VhdbranchResult<Vec<ImageInfo>> {
    const TARGET: &str = "image info";

    if let Some(line) = find_failure(output, DISM_FAILURES) {
        return Err(VhdbranchError::parse(
            TARGET,
            format!("tool reported failure: {line}"),
            output,
        ));
    }

    let mut images: Vec<ImageInfo> = Vec::new();
    for line in output.lines() {
        if let Some(value) = field(line, "Index") {
            let index = value.parse::<u32>().map_err(|_| {
                VhdbranchError::parse(TARGET, format!("invalid index {value:?}"), output)
            })?;
            images.push(ImageInfo {
                index,
                name: String::new(),
                description: None,
                size_bytes: None,
            });
            continue;
        }

        let Some(image) = images.last_mut() else {
            continue;
        };
        if let Some(value) = field(line, "Name") {
            image.name = value.to_string();
        } else if let Some(value) = field(line, "Description") {
            image.description = (!value.is_empty()).then(|| value.to_string());
        } else if let Some(value) = field(line, "Size") {
            image.size_bytes = parse_size(value);
        }
    }

    if images.is_empty() {
        return Err(VhdbranchError::parse(TARGET, "no images listed", output));
    }
    if let Some(unnamed) = images.iter().find(|i| i.name.is_empty()) {
        return Err(VhdbranchError::parse(
            TARGET,
            format!("image {} has no name", unnamed.index),
            output,
        ));
    }
    Ok(images)
}

/// `16,815,487,301 bytes` -> 16815487301.
fn parse_size(value: &str) -> Option<u64> {
    let digits: String = value
        .split_whitespace()
        .next()?
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Confirm an `/Apply-Image` run finished.
pub fn check_apply(output: &str) -> VhdbranchResult<()> {
    const TARGET: &str = "apply image";

    if let Some(line) = find_failure(output, DISM_FAILURES) {
        return Err(VhdbranchError::parse(
            TARGET,
            format!("tool reported failure: {line}"),
            output,
        ));
    }
    if !output.to_lowercase().contains(COMPLETED) {
        return Err(VhdbranchError::parse(
            TARGET,
            "completion message not found",
            output,
        ));
    }
    Ok(())
}
