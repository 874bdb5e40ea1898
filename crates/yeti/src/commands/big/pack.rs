use std::path::PathBuf;

use clap::Args;
use miette::{miette, Result};
use owo_colors::OwoColorize;
use tracing::info;
use yeti_bigfile::archive::METADATA_FILE_NAME;
use yeti_bigfile::BigFile;

#[derive(Args)]
pub struct PackArgs {
    /// An unpacked bigfile directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// File name of the bigfile, without extension
    #[arg(short, long, default_value = "Yeti")]
    name: String,

    /// Directory the bigfile is written to, the unpacked directory by default
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Deflate every payload
    #[arg(long, default_value_t = false)]
    compress: bool,

    /// A JSON settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of workers, overrides the settings file
    #[arg(short, long)]
    threads: Option<usize>,

    /// Remove `chunks/` once the bigfile has been verified
    #[arg(long, default_value_t = false)]
    delete_chunks: bool,
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        if !self.directory.join(METADATA_FILE_NAME).is_file() {
            return Err(miette!(
                "{} is not an unpacked bigfile, {METADATA_FILE_NAME} is missing",
                self.directory.display()
            ));
        }
        let config = super::load_config(self.config.as_ref())?;

        let target = self.output.as_ref().unwrap_or(&self.directory);
        let mut options = config.pack_options(target);
        options.output_name = self.name.clone();
        options.compress = self.compress;
        options.delete_chunks |= self.delete_chunks;
        if let Some(threads) = self.threads {
            options.threads = threads.max(1);
        }

        let big = BigFile::open_unpacked(&self.directory);
        big.load_from_disk()?;

        info!("packing {} into {}", self.directory.display(), options.output_path().display());
        let diagnostics = big
            .packer()
            .with_progress(super::progress("pack"))
            .pack(&options)?;

        match &diagnostics.output {
            Some(output) => println!(
                "{} {} ({} files, {} without payload) in {:.3}s",
                "packed".green(),
                output.display(),
                diagnostics.processed(),
                diagnostics.skipped(),
                (diagnostics.files + diagnostics.assemble + diagnostics.verify).as_secs_f64()
            ),
            None => println!("{}", "pack cancelled".yellow()),
        }
        Ok(())
    }
}
