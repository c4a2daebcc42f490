use std::env;
use std::fs;

use anyhow::{Context, Result};
use regoth_formats::{ScriptImage, SymbolKind, disassemble};

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let path = args
        .next()
        .context("usage: script_dump <script image> [--json|--code]")?;
    let mode = args.next();

    let bytes = fs::read(&path).with_context(|| format!("reading {path}"))?;
    let image = ScriptImage::from_bytes(&bytes).with_context(|| format!("decoding {path}"))?;

    if mode.as_deref() == Some("--json") {
        let json = serde_json::to_string_pretty(&image).context("serializing symbol table")?;
        println!("{json}");
        return Ok(());
    }

    println!(
        "{} symbols, {} code bytes (image v{})",
        image.symbols.len(),
        image.code.len(),
        image.version
    );
    for (index, symbol) in image.symbols.iter().enumerate() {
        let code = symbol
            .code_offset
            .map(|offset| format!("@{offset}"))
            .unwrap_or_default();
        let parent = symbol
            .parent
            .map(|parent| format!("<- #{parent}"))
            .unwrap_or_default();
        println!(
            "{index:>6} {kind:<10} {name:<40} {slots:>3} {code:>8} {parent}",
            kind = format!("{:?}", symbol.kind),
            name = symbol.name,
            slots = symbol.slots.len(),
        );
    }

    if mode.as_deref() == Some("--code") {
        let listing = disassemble(&image.code).context("disassembling code block")?;
        let mut owners: Vec<(u32, &str)> = image
            .symbols
            .iter()
            .filter(|symbol| {
                matches!(
                    symbol.kind,
                    SymbolKind::Function | SymbolKind::Instance | SymbolKind::Prototype
                )
            })
            .filter_map(|symbol| symbol.code_offset.map(|offset| (offset, symbol.name.as_str())))
            .collect();
        owners.sort();
        for (offset, instruction) in listing {
            if let Ok(found) = owners.binary_search_by_key(&(offset as u32), |(start, _)| *start) {
                println!("\n{}:", owners[found].1);
            }
            println!("  {offset:>8}  {instruction}");
        }
    }
    Ok(())
}
