use std::path::PathBuf;

use clap::Args;
use itertools::Itertools;
use miette::{miette, Result};
use owo_colors::OwoColorize;
use yeti_bigfile::{ArchetypeView, FileKey};

#[derive(Args)]
pub struct FindArgs {
    /// A `.big` file or an unpacked directory
    #[arg(value_name = "ARCHIVE")]
    archive: PathBuf,

    /// Key of the file, in hexadecimal
    #[arg(short, long, value_parser = parse_key)]
    key: FileKey,
}

fn parse_key(value: &str) -> std::result::Result<FileKey, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16)
        .map(FileKey)
        .map_err(|e| format!("{value} is not a hexadecimal key: {e}"))
}

impl FindArgs {
    pub fn handle(&self) -> Result<()> {
        let big = super::open_archive(&self.archive)?;
        let file = big
            .file(self.key)
            .ok_or_else(|| miette!("no file with key {}", self.key))?;

        println!("{} {}", file.key().cyan(), file.full_path().bold());
        if let Some(folder) = big.folder(file.folder()) {
            println!("folder    {} ({})", folder.id(), folder.path());
        }
        println!("offset    {}", file.offset());
        println!("size      {}", file.size());
        println!("stored    {:?}", file.compression());
        println!("archetype {:?}", file.archetype());

        if file.is_unlinked() {
            println!("{}", "file has no payload".red());
            return Ok(());
        }

        big.file_loader()?.load_files(std::slice::from_ref(&file))?;
        println!(
            "refs      [{}]",
            file.references().iter().join(", ").dimmed()
        );
        if let Some(payload) = file.payload() {
            println!("payload   {} bytes", payload.len());
        }
        if let Some(ArchetypeView::TextureMetadata(texture)) = file.view() {
            println!(
                "texture   {}x{}, {} mips, {:?}",
                texture.width, texture.height, texture.mip_count, texture.format
            );
            if let Some(payload) = texture.payload.and_then(|key| big.file(key)) {
                println!("texels    {} {}", payload.key().cyan(), payload.full_path());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use yeti_bigfile::FileKey;

    use super::parse_key;

    #[test]
    fn keys_parse_with_or_without_prefix() {
        assert_eq!(parse_key("0x0000BEEF"), Ok(FileKey(0xBEEF)));
        assert_eq!(parse_key("beef"), Ok(FileKey(0xBEEF)));
        assert!(parse_key("zz").is_err());
    }
}
