//! Channel publishing: build a publishable tree and purge stale CDN cache
//!
//! `publish build` turns a game tree into the directory a channel serves:
//! every file compressed to its `.zst` form (or, for very large files, the
//! plain object plus a checksummed part list so clients can fetch it as
//! byte ranges), alongside `checksums.json`, `version.txt` and a
//! `clearcache.txt` listing the URLs whose content changed since the
//! previous build. `publish purge` feeds that list to a Cloudflare-style
//! cache purge API in bounded batches.

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use caravel_manifest::{
    Manifest, ManifestBuilder, ManifestEntry, ManifestPart, hash_reader,
};
use caravel_sync::{MANIFEST_NAME, VERSION_NAME};
use caravel_transfer::{COMPRESSED_SUFFIX, join_url};
use futures_util::{StreamExt, stream};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::PublishCommands;

/// Files at least this large publish as checksummed parts. Deliberately
/// below the client's 1 GiB reassembly arithmetic so hosts that cap object
/// sizes still accept each range.
pub const PUBLISH_PART_SIZE: u64 = 490 * 1024 * 1024;

/// Most URLs one purge request may carry.
pub const PURGE_BATCH_SIZE: usize = 30;

/// Name of the changed-URL list written next to the manifest.
pub const CLEARCACHE_NAME: &str = "clearcache.txt";

pub async fn handle(cmd: PublishCommands) -> anyhow::Result<()> {
    match cmd {
        PublishCommands::Build {
            root,
            out,
            version,
            previous,
            base_url,
            level,
            excludes,
            ignore_checksums,
            part_size,
            concurrency,
        } => {
            build(BuildParams {
                root,
                out,
                version,
                previous,
                base_url,
                level,
                excludes,
                ignore_checksums,
                part_size,
                concurrency: concurrency.max(1),
            })
            .await
        }
        PublishCommands::Purge {
            api,
            token,
            list,
            all,
        } => purge(&api, &token, &list, all).await,
    }
}

struct BuildParams {
    root: PathBuf,
    out: PathBuf,
    version: String,
    previous: Option<PathBuf>,
    base_url: Option<String>,
    level: i32,
    excludes: Vec<String>,
    ignore_checksums: Vec<String>,
    part_size: u64,
    concurrency: usize,
}

async fn build(params: BuildParams) -> anyhow::Result<()> {
    let scan_bar = progress_bar("hashing");
    let mut builder = ManifestBuilder::new(&params.root)
        .version(&*params.version)
        .concurrency(params.concurrency)
        .on_progress({
            let bar = scan_bar.clone();
            move |progress| {
                bar.set_length(progress.total);
                bar.set_position(progress.hashed);
                bar.set_message(progress.path.clone());
            }
        });
    for needle in &params.excludes {
        builder = builder.exclude(needle.clone());
    }
    for needle in &params.ignore_checksums {
        builder = builder.ignore_checksum(needle.clone());
    }
    let scanned = builder.build().await.context("scanning game tree")?;
    scan_bar.finish_and_clear();
    info!(
        files = scanned.len(),
        bytes = scanned.total_size(),
        "game tree hashed"
    );

    fs::create_dir_all(&params.out)
        .with_context(|| format!("creating output directory {}", params.out.display()))?;

    let publish_bar = progress_bar("publishing");
    publish_bar.set_length(scanned.len() as u64);
    let results: Vec<anyhow::Result<ManifestEntry>> = stream::iter(scanned.files.clone())
        .map(|entry| {
            let root = params.root.clone();
            let out = params.out.clone();
            let bar = publish_bar.clone();
            let level = params.level;
            let part_size = params.part_size;
            async move {
                let path = entry.path.clone();
                let entry = tokio::task::spawn_blocking(move || {
                    publish_entry(&root, &out, entry, level, part_size)
                })
                .await?
                .with_context(|| format!("publishing {path}"))?;
                bar.inc(1);
                bar.set_message(entry.path.clone());
                Ok(entry)
            }
        })
        .buffer_unordered(params.concurrency)
        .collect()
        .await;
    publish_bar.finish_and_clear();

    let mut files = results.into_iter().collect::<anyhow::Result<Vec<_>>>()?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let manifest = Manifest {
        version: scanned.version,
        languages: scanned.languages,
        files,
    };

    let previous = match &params.previous {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading previous manifest {}", path.display()))?;
            Some(Manifest::from_json_lenient(&text).context("parsing previous manifest")?)
        }
        None => None,
    };
    let urls = changed_urls(&manifest, previous.as_ref(), params.base_url.as_deref());

    fs::write(params.out.join(MANIFEST_NAME), manifest.to_json()?)?;
    fs::write(params.out.join(VERSION_NAME), &params.version)?;
    fs::write(params.out.join(CLEARCACHE_NAME), urls.join("\n") + "\n")?;

    info!(
        "✅ published {} files at version {} ({} changed URLs in {CLEARCACHE_NAME})",
        manifest.len(),
        params.version,
        urls.len()
    );
    Ok(())
}

/// Land one entry in the output tree, on the blocking pool.
///
/// Small files publish as their compressed form only; the client falls
/// back to the plain URL when a channel chooses not to serve one. Large
/// files publish as the plain object so ranged part requests work, with
/// the part list recorded in the entry.
fn publish_entry(
    root: &Path,
    out: &Path,
    mut entry: ManifestEntry,
    level: i32,
    part_size: u64,
) -> anyhow::Result<ManifestEntry> {
    let src = root.join(&entry.path);
    let dest = out.join(&entry.path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if entry.size >= part_size.max(1) {
        fs::copy(&src, &dest)?;
        entry.parts = Some(compute_parts(&src, part_size.max(1))?);
    } else {
        let mut compressed = dest.into_os_string();
        compressed.push(COMPRESSED_SUFFIX);
        let input = BufReader::new(fs::File::open(&src)?);
        let mut output = BufWriter::new(fs::File::create(PathBuf::from(compressed))?);
        zstd::stream::copy_encode(input, &mut output, level)?;
        output.flush()?;
    }
    Ok(entry)
}

/// Checksum `part_size`-byte ranges of a file, in order.
fn compute_parts(path: &Path, part_size: u64) -> std::io::Result<Vec<ManifestPart>> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut parts = Vec::new();
    loop {
        let mut chunk = CountingReader {
            inner: (&mut reader).take(part_size),
            count: 0,
        };
        let checksum = hash_reader(&mut chunk)?;
        if chunk.count == 0 {
            break;
        }
        parts.push(ManifestPart {
            checksum,
            size: chunk.count,
        });
        if chunk.count < part_size {
            break;
        }
    }
    Ok(parts)
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// The URL a client actually fetches for an entry: the plain object for
/// multi-part files, the compressed form otherwise.
fn published_object(entry: &ManifestEntry) -> String {
    if entry.parts.as_ref().is_some_and(|p| !p.is_empty()) {
        entry.path.clone()
    } else {
        format!("{}{COMPRESSED_SUFFIX}", entry.path)
    }
}

/// Every URL whose cached content is stale after this build. The manifest
/// and version marker always change; file objects only when their content
/// differs from the previous manifest.
fn changed_urls(
    manifest: &Manifest,
    previous: Option<&Manifest>,
    base_url: Option<&str>,
) -> Vec<String> {
    let join = |path: &str| match base_url {
        Some(base) => join_url(base, path),
        None => path.to_string(),
    };
    let mut urls = vec![join(VERSION_NAME), join(MANIFEST_NAME)];
    for entry in &manifest.files {
        let changed = previous.is_none_or(|prev| {
            prev.find(&entry.path)
                .is_none_or(|old| entry_changed(entry, old))
        });
        if changed {
            urls.push(join(&published_object(entry)));
        }
    }
    urls
}

fn entry_changed(new: &ManifestEntry, old: &ManifestEntry) -> bool {
    if new.is_ignored() || old.is_ignored() {
        new.size != old.size
    } else {
        !new.checksum.eq_ignore_ascii_case(&old.checksum)
    }
}

/// Request bodies for one purge run, at most [`PURGE_BATCH_SIZE`] URLs each.
fn purge_bodies(urls: &[&str]) -> Vec<serde_json::Value> {
    urls.chunks(PURGE_BATCH_SIZE)
        .map(|batch| serde_json::json!({ "files": batch }))
        .collect()
}

async fn purge(api: &str, token: &str, list: &Path, all: bool) -> anyhow::Result<()> {
    let bodies = if all {
        vec![serde_json::json!({ "purge_everything": true })]
    } else {
        let text = fs::read_to_string(list)
            .with_context(|| format!("reading {}", list.display()))?;
        let urls: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if urls.is_empty() {
            info!("nothing to purge");
            return Ok(());
        }
        purge_bodies(&urls)
    };

    let client = reqwest::Client::new();
    let endpoint = format!("{}/purge_cache", api.trim_end_matches('/'));
    for (index, body) in bodies.iter().enumerate() {
        loop {
            let response = client
                .post(&endpoint)
                .bearer_auth(token)
                .json(body)
                .send()
                .await?;
            let status = response.status();
            if status.as_u16() == 429 {
                let wait = retry_after(&response).unwrap_or(Duration::from_secs(1));
                warn!(batch = index + 1, "purge API rate limited, waiting {}s", wait.as_secs());
                tokio::time::sleep(wait).await;
                continue;
            }
            if !status.is_success() {
                bail!("purge batch {} failed with status {status}", index + 1);
            }
            break;
        }
    }
    info!("✅ purge complete ({} request(s))", bodies.len());
    Ok(())
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn progress_bar(verb: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(&format!(
            "{{spinner:.green}} {verb} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    bar
}
