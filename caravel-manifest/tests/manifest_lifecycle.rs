//! End-to-end manifest lifecycle: build, publish, parse, diff

use caravel_manifest::{DiffOptions, Manifest, ManifestBuilder, diff};
use pretty_assertions::assert_eq;
use std::path::Path;

fn write(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

fn sample_tree(root: &Path) {
    write(root, "bin/game.exe", b"executable bytes");
    write(root, "paks/Win64/common.rpak", b"common pak");
    write(root, "paks/Win64/highres_01.opt.starpak", b"hd textures");
    write(root, "audio/localized/french/general.mstr", b"bonjour");
    write(root, "logs/build.txt", b"2026-08-21 build 1742");
}

#[tokio::test]
async fn built_manifest_round_trips_and_diffs_clean() {
    let dir = tempfile::tempdir().unwrap();
    sample_tree(dir.path());

    let built = ManifestBuilder::new(dir.path())
        .ignore_checksum("logs/")
        .version("v2.1.7")
        .build()
        .await
        .unwrap();

    // What the publisher writes is what the client reads.
    let published = built.to_json().unwrap();
    let remote = Manifest::from_json_lenient(&published).unwrap();
    assert_eq!(remote, built);

    // A local scan of the same tree reconciles to nothing.
    let local = ManifestBuilder::new(dir.path())
        .ignore_checksum("logs/")
        .build()
        .await
        .unwrap();
    let opts = DiffOptions {
        include_optional: true,
        languages: vec!["french".to_string()],
        ..DiffOptions::default()
    };
    assert!(diff(&remote, &local, &opts).is_empty());
}

#[tokio::test]
async fn corrupted_file_shows_up_in_diff() {
    let dir = tempfile::tempdir().unwrap();
    sample_tree(dir.path());

    let remote = ManifestBuilder::new(dir.path())
        .ignore_checksum("logs/")
        .build()
        .await
        .unwrap();

    // Corrupt one file and touch the out-of-band log; only the former counts.
    write(dir.path(), "paks/Win64/common.rpak", b"flipped bits!");
    write(dir.path(), "logs/build.txt", b"2026-08-22 build 1743"); // same length

    let local = ManifestBuilder::new(dir.path())
        .ignore_checksum("logs/")
        .build()
        .await
        .unwrap();
    let opts = DiffOptions {
        include_optional: true,
        languages: vec!["french".to_string()],
        ..DiffOptions::default()
    };
    let work = diff(&remote, &local, &opts);
    let paths: Vec<&str> = work.to_fetch.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["paks/Win64/common.rpak"]);
    assert!(work.to_delete.is_empty());
}
