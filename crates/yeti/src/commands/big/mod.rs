use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use miette::{Context, Result};
use tracing::info;
use yeti_bigfile::{BigFile, BigFileConfig};

pub mod find;
pub mod info;
pub mod pack;
pub mod unpack;

#[derive(clap::Subcommand)]
pub enum BigCommands {
    /// Show the folders and files of a bigfile
    Info(info::InfoArgs),
    /// Look up a single file by key
    Find(find::FindArgs),
    /// Unpack a bigfile into a directory
    Unpack(unpack::UnpackArgs),
    /// Pack an unpacked directory into a bigfile
    Pack(pack::PackArgs),
}

impl BigCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            BigCommands::Info(info) => info.handle(),
            BigCommands::Find(find) => find.handle(),
            BigCommands::Unpack(unpack) => unpack.handle(),
            BigCommands::Pack(pack) => pack.handle(),
        }
    }
}

/// Open and load a `.big` file or an unpacked directory
fn open_archive(path: &Path) -> Result<BigFile> {
    let big = BigFile::open(path);
    big.load_from_disk()
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(big)
}

/// Settings from `--config`, or the defaults
fn load_config(path: Option<&PathBuf>) -> Result<BigFileConfig> {
    match path {
        Some(path) => Ok(BigFileConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?),
        None => Ok(BigFileConfig::default()),
    }
}

/// Progress callback logging every tenth of the work
fn progress(operation: &'static str) -> impl Fn(usize, usize) + Send + Sync + 'static {
    let reported = AtomicUsize::new(0);
    move |completed, total| {
        let tenth = completed * 10 / total.max(1);
        if tenth > reported.fetch_max(tenth, Ordering::Relaxed) {
            info!("{operation}: {}% ({completed}/{total})", tenth * 10);
        }
    }
}
