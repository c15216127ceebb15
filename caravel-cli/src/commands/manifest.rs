//! Manifest inspection commands

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use caravel_manifest::{FileCategory, Manifest, ManifestEntry};
use caravel_transfer::format_bytes;

use crate::ManifestCommands;

pub fn handle(cmd: ManifestCommands) -> anyhow::Result<()> {
    match cmd {
        ManifestCommands::Show { file } => show(&file),
        ManifestCommands::Diff { old, new } => diff(&old, &new),
    }
}

fn load(path: &Path) -> anyhow::Result<Manifest> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    Manifest::from_json_lenient(&text)
        .with_context(|| format!("parsing manifest {}", path.display()))
}

fn show(file: &Path) -> anyhow::Result<()> {
    let manifest = load(file)?;

    let mut base = 0usize;
    let mut optional = 0usize;
    let mut language = 0usize;
    let mut ignored = 0usize;
    let mut multipart = 0usize;
    for entry in &manifest.files {
        match entry.category() {
            FileCategory::Base => base += 1,
            FileCategory::Optional => optional += 1,
            FileCategory::Language => language += 1,
        }
        if entry.is_ignored() {
            ignored += 1;
        }
        if entry.parts.as_ref().is_some_and(|p| !p.is_empty()) {
            multipart += 1;
        }
    }

    println!("Manifest: {}", file.display());
    if let Some(version) = &manifest.version {
        println!("  version:    {version}");
    }
    if !manifest.languages.is_empty() {
        println!("  languages:  {}", manifest.languages.join(", "));
    }
    println!("  files:      {}", manifest.len());
    println!("  total size: {}", format_bytes(manifest.total_size()));
    println!("  base:       {base}");
    println!("  optional:   {optional}");
    println!("  language:   {language}");
    if ignored > 0 {
        println!("  unverified: {ignored} (ignore checksum)");
    }
    if multipart > 0 {
        println!("  multi-part: {multipart}");
    }
    Ok(())
}

fn diff(old_path: &Path, new_path: &Path) -> anyhow::Result<()> {
    let old = load(old_path)?;
    let new = load(new_path)?;

    let old_by_path: HashMap<String, &ManifestEntry> = old
        .files
        .iter()
        .map(|e| (e.path.to_ascii_lowercase(), e))
        .collect();
    let new_keys: std::collections::HashSet<String> = new
        .files
        .iter()
        .map(|e| e.path.to_ascii_lowercase())
        .collect();

    let mut added = 0usize;
    let mut changed = 0usize;
    let mut changed_bytes = 0u64;
    for entry in &new.files {
        match old_by_path.get(&entry.path.to_ascii_lowercase()) {
            None => {
                println!("+ {}", entry.path);
                added += 1;
                changed_bytes += entry.size;
            }
            Some(previous) if differs(entry, previous) => {
                println!("~ {}", entry.path);
                changed += 1;
                changed_bytes += entry.size;
            }
            Some(_) => {}
        }
    }

    let mut removed = 0usize;
    for entry in &old.files {
        if !new_keys.contains(&entry.path.to_ascii_lowercase()) {
            println!("- {}", entry.path);
            removed += 1;
        }
    }

    println!(
        "{added} added, {changed} changed, {removed} removed ({} to download)",
        format_bytes(changed_bytes)
    );
    Ok(())
}

fn differs(new: &ManifestEntry, old: &ManifestEntry) -> bool {
    if new.is_ignored() || old.is_ignored() {
        new.size != old.size
    } else {
        !new.checksum.eq_ignore_ascii_case(&old.checksum)
    }
}
