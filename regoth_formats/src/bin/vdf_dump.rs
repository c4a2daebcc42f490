use std::fs;
use std::path::{Component, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use regoth_formats::VdfArchive;

#[derive(Parser, Debug)]
#[command(about = "List or extract the entries of a VDF volume", version)]
struct Args {
    /// VDF volume to read
    vdf: PathBuf,

    /// Write every entry into this directory instead of listing
    #[arg(long, value_name = "DIR")]
    extract: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let archive = VdfArchive::open(&args.vdf)?;

    let Some(dest) = args.extract else {
        println!(
            "{} entries in {}",
            archive.entries().len(),
            archive.path().display()
        );
        for entry in archive.entries() {
            println!(
                "{name:<48} {offset:>10} {size:>10}",
                name = entry.name,
                offset = entry.offset,
                size = entry.size
            );
        }
        return Ok(());
    };

    fs::create_dir_all(&dest).with_context(|| format!("creating {}", dest.display()))?;
    let mut extracted = 0usize;
    for entry in archive.entries() {
        // Entry names are flat; drop anything that would escape `dest`.
        let relative: PathBuf = PathBuf::from(entry.name.replace('\\', "/"))
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        archive
            .extract_entry(entry, dest.join(&relative))
            .with_context(|| format!("extracting {}", entry.name))?;
        extracted += 1;
    }
    println!(
        "Extracted {} entries from {} into {}",
        extracted,
        archive.path().display(),
        dest.display()
    );
    Ok(())
}
