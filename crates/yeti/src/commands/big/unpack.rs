use std::path::PathBuf;

use clap::Args;
use miette::{miette, Result};
use owo_colors::OwoColorize;
use tracing::info;
use yeti_bigfile::BigFile;

#[derive(Args)]
pub struct UnpackArgs {
    /// An input bigfile
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A JSON settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of workers, overrides the settings file
    #[arg(short, long)]
    threads: Option<usize>,

    /// Keep compressed files as their stored zlib stream
    #[arg(long, default_value_t = false)]
    keep_compressed: bool,
}

impl UnpackArgs {
    pub fn handle(&self) -> Result<()> {
        if !self.file.is_file() {
            return Err(miette!("{} is not a bigfile", self.file.display()));
        }
        let config = super::load_config(self.config.as_ref())?;

        let mut options = config.unpack_options(&self.directory);
        if let Some(threads) = self.threads {
            options.threads = threads.max(1);
        }
        if self.keep_compressed {
            options.decompress = false;
        }

        let big = BigFile::open_packed(&self.file);
        big.load_from_disk()?;

        info!("unpacking {} into {}", self.file.display(), self.directory.display());
        let diagnostics = big
            .unpacker()
            .with_progress(super::progress("unpack"))
            .unpack(&options)?;

        println!(
            "{} {} files, {} skipped in {:.3}s",
            "unpacked".green(),
            diagnostics.processed(),
            diagnostics.skipped(),
            (diagnostics.metadata + diagnostics.directories + diagnostics.mapping + diagnostics.files)
                .as_secs_f64()
        );
        Ok(())
    }
}
