use std::fmt::Write;
use std::path::PathBuf;

use clap::Args;
use itertools::Itertools;
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use tracing::warn;
use walkdir::WalkDir;
use yeti_bigfile::tree::{FileEntry, Folder};
use yeti_bigfile::{Backing, BigFile};

#[derive(Args)]
pub struct InfoArgs {
    /// A `.big` file or an unpacked directory
    #[arg(value_name = "ARCHIVE")]
    archive: PathBuf,

    /// Read the references of every file
    #[arg(long, default_value_t = false)]
    references: bool,

    /// Sort folders and files by name
    #[arg(long, default_value_t = false)]
    sort: bool,

    /// Print a JSON document instead of a tree
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn describe(file: &FileEntry) -> String {
    let location = if file.is_unlinked() {
        "unlinked".red().to_string()
    } else {
        format!("@{}", file.offset())
    };
    let mut line = format!(
        "{} {} {} bytes, {:?}, {:?}, {}",
        file.key().cyan(),
        file.name(),
        file.size(),
        file.compression(),
        file.archetype(),
        location
    );

    let references = file.references();
    if !references.is_empty() {
        let _ = write!(line, " -> {}", references.iter().join(", ").dimmed());
    }
    line
}

fn print_folder(out: &mut String, folder: &Folder, depth: usize) {
    let indent = "  ".repeat(depth);
    let name = if folder.name().is_empty() { "/" } else { folder.name() };
    let _ = writeln!(out, "{indent}{}", name.bold());

    for file in folder.files() {
        let _ = writeln!(out, "{indent}  {}", describe(file));
    }
    for child in folder.folders().values() {
        print_folder(out, child, depth + 1);
    }
}

fn as_json(big: &BigFile) -> Result<serde_json::Value> {
    let files = big
        .files_list()?
        .iter()
        .map(|f| {
            serde_json::json!({
                "key": f.key(),
                "path": f.full_path(),
                "offset": f.offset(),
                "size": f.size(),
                "compressed": f.compression().is_compressed(),
                "archetype": u8::from(f.archetype()),
                "references": f.references(),
            })
        })
        .collect_vec();

    Ok(serde_json::json!({
        "dataOffset": big.data_offset()?,
        "folders": big.tree().map(|t| t.folder_count()).unwrap_or_default(),
        "files": files,
    }))
}

/// Number of loose files below `chunks/` of an unpacked directory
fn loose_file_count(big: &BigFile) -> Option<usize> {
    let chunks = big.chunks_dir()?;
    Some(
        WalkDir::new(chunks)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count(),
    )
}

impl InfoArgs {
    pub fn handle(&self) -> Result<()> {
        let big = super::open_archive(&self.archive)?;

        if self.sort {
            big.sort_tree()?;
        }
        if self.references {
            let files = big.files_list()?;
            big.file_loader()?.load_references(&files)?;
        }

        if self.json {
            let json = as_json(&big)?;
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
            return Ok(());
        }

        let loaded = big.require_loaded()?;
        let header = &loaded.metadata.header;
        let unlinked = loaded
            .mapping
            .files_list()
            .iter()
            .filter(|f| f.is_unlinked())
            .count();

        let kind = match big.backing() {
            Backing::Packed(_) => "packed",
            Backing::Unpacked(_) => "unpacked",
        };
        println!("{} ({kind})", self.archive.display().bold());
        println!(
            "version {}, unknown {:#010X}, data offset {}",
            header.version,
            header.unknown,
            loaded.metadata.data_offset()
        );
        println!(
            "{} files ({} unlinked) in {} folders",
            loaded.mapping.len(),
            unlinked,
            loaded.tree.folder_count()
        );

        if let Some(count) = loose_file_count(&big) {
            let expected = loaded.mapping.len() - unlinked;
            if count != expected {
                warn!("{count} loose files on disk, expected {expected}");
            }
        }

        let mut out = String::new();
        print_folder(&mut out, loaded.tree.root(), 0);
        print!("{out}");

        Ok(())
    }
}
