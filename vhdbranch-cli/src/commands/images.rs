use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use tabled::Tabled;
use vhdbranch::ImageInfo;

use crate::cli::GlobalFlags;
use crate::formatter::{self, format_size, or_dash};

/// List the images inside a WIM or ESD file
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Path to install.wim or install.esd
    pub image: PathBuf,
}

#[derive(Tabled)]
struct ImageRow {
    #[tabled(rename = "INDEX")]
    index: u32,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
    #[tabled(rename = "SIZE")]
    size: String,
}

impl From<&ImageInfo> for ImageRow {
    fn from(info: &ImageInfo) -> Self {
        Self {
            index: info.index,
            name: info.name.clone(),
            description: or_dash(info.description.as_deref()),
            size: info
                .size_bytes
                .map(format_size)
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub fn execute(args: ImagesArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let images = workspace.list_boot_images(&args.image)?;

    formatter::print_output(
        &mut std::io::stdout(),
        &images,
        global.output_format()?,
        |w, images| {
            writeln!(
                w,
                "{}",
                formatter::create_table(images.iter().map(ImageRow::from))
            )?;
            Ok(())
        },
    )
}
