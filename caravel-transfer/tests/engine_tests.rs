//! Integration tests for the transfer engine against a mock channel

use std::path::Path;
use std::time::Duration;

use caravel_manifest::{ManifestEntry, ManifestPart, hash_bytes};
use caravel_transfer::{
    Error, Fetcher, TransferEngine, TransferJob, TransferOptions,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn entry_for(rel_path: &str, content: &[u8]) -> ManifestEntry {
    ManifestEntry {
        path: rel_path.to_string(),
        checksum: hash_bytes(content),
        size: content.len() as u64,
        optional: false,
        language: None,
        parts: None,
    }
}

fn quick_options() -> TransferOptions {
    TransferOptions {
        retry_delay: Duration::from_millis(10),
        ..TransferOptions::default()
    }
}

fn job(server: &MockServer, dir: &TempDir, entry: ManifestEntry) -> TransferJob {
    TransferJob::from_entry(&server.uri(), dir.path(), entry)
}

/// Test that a batch lands every reachable file and collects the rest,
/// instead of aborting on the first failure.
#[tokio::test]
async fn test_batch_collects_failures_without_aborting() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut jobs = Vec::new();
    let mut ok_bytes = 0u64;
    for i in 0..10 {
        let content = format!("content of file number {i}").into_bytes();
        let entry = entry_for(&format!("files/file{i}.bin"), &content);
        // file7 exists in the manifest but not on the channel.
        if i != 7 {
            ok_bytes += entry.size;
            Mock::given(method("GET"))
                .and(path(format!("/files/file{i}.bin")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(content))
                .expect(1)
                .mount(&server)
                .await;
        }
        jobs.push(job(&server, &dir, entry));
    }

    let engine = TransferEngine::new(Fetcher::new().unwrap(), quick_options());
    let outcome = engine.run(jobs).await;

    assert_eq!(outcome.completed.len(), 9);
    assert_eq!(outcome.failed.len(), 1);
    assert!(outcome.skipped.is_empty());
    let (failed_path, error) = &outcome.failed[0];
    assert_eq!(failed_path, "files/file7.bin");
    assert!(matches!(error, Error::NotFound { .. }), "got {error:?}");

    for i in 0..10 {
        let on_disk = dir.path().join(format!("files/file{i}.bin"));
        assert_eq!(on_disk.exists(), i != 7);
    }

    let snapshot = engine.stats().snapshot();
    assert_eq!(snapshot.transferred_bytes, ok_bytes);
    assert_eq!(snapshot.completed_files, 9);
    assert_eq!(snapshot.failed_files, 1);
    assert!(snapshot.percent < 100.0);
}

/// Test that a file already present and correct downloads nothing.
#[tokio::test]
async fn test_correct_local_file_is_skipped() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let content = b"already installed".to_vec();
    let entry = entry_for("data/installed.bin", &content);
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(dir.path().join("data/installed.bin"), &content).unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let engine = TransferEngine::new(Fetcher::new().unwrap(), quick_options());
    let outcome = engine.run(vec![job(&server, &dir, entry)]).await;

    assert_eq!(outcome.skipped, vec!["data/installed.bin".to_string()]);
    assert!(outcome.completed.is_empty());
    assert!(outcome.is_success());

    // Skips still count toward progress, or the bar would stall at 0%.
    let snapshot = engine.stats().snapshot();
    assert_eq!(snapshot.transferred_bytes, content.len() as u64);
    assert!((snapshot.percent - 100.0).abs() < f64::EPSILON);
}

/// Test that the compressed form is preferred and decompresses to the
/// manifest checksum.
#[tokio::test]
async fn test_compressed_form_preferred() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let plain = b"plain bytes that compress fine fine fine fine fine".to_vec();
    let compressed = zstd::encode_all(&plain[..], 3).unwrap();
    let entry = entry_for("data/asset.bin", &plain);

    Mock::given(method("GET"))
        .and(path("/data/asset.bin.zst"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/asset.bin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let engine = TransferEngine::new(Fetcher::new().unwrap(), quick_options());
    let outcome = engine.run(vec![job(&server, &dir, entry)]).await;

    assert!(outcome.is_success(), "failed: {:?}", outcome.failed);
    assert_eq!(
        std::fs::read(dir.path().join("data/asset.bin")).unwrap(),
        plain
    );
}

/// Test that a channel without compressed forms falls back to the plain
/// object without burning retry budget.
#[tokio::test]
async fn test_missing_compressed_form_falls_back_to_plain() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let plain = b"no compressed twin on this channel".to_vec();
    let entry = entry_for("data/asset.bin", &plain);

    // No mock for the .zst path: the channel answers 404 for it.
    Mock::given(method("GET"))
        .and(path("/data/asset.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(plain.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let engine = TransferEngine::new(Fetcher::new().unwrap(), quick_options());
    let outcome = engine.run(vec![job(&server, &dir, entry)]).await;

    assert!(outcome.is_success(), "failed: {:?}", outcome.failed);
    assert_eq!(
        std::fs::read(dir.path().join("data/asset.bin")).unwrap(),
        plain
    );
}

/// Test that a large object transfers as ranged parts and reassembles in
/// order with no intermediates left behind.
#[tokio::test]
async fn test_multipart_ranged_transfer() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let content: Vec<u8> = (0..250u32).map(|i| (i % 251) as u8).collect();
    let entry = entry_for("paks/huge.rpak", &content);

    // HEAD probe for the derived layout.
    Mock::given(method("HEAD"))
        .and(path("/paks/huge.rpak"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;
    for (range, slice) in [
        ("bytes=0-99", &content[0..100]),
        ("bytes=100-199", &content[100..200]),
        ("bytes=200-249", &content[200..250]),
    ] {
        Mock::given(method("GET"))
            .and(path("/paks/huge.rpak"))
            .and(header("range", range))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(slice.to_vec()))
            .expect(1)
            .mount(&server)
            .await;
    }
    // Parts are ranges of the plain object; no compressed form involved.
    Mock::given(method("GET"))
        .and(path("/paks/huge.rpak.zst"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let options = TransferOptions {
        multipart_threshold: 100,
        part_size: 100,
        ..quick_options()
    };
    let engine = TransferEngine::new(Fetcher::new().unwrap(), options);
    let outcome = engine.run(vec![job(&server, &dir, entry)]).await;

    assert!(outcome.is_success(), "failed: {:?}", outcome.failed);
    assert_eq!(
        std::fs::read(dir.path().join("paks/huge.rpak")).unwrap(),
        content
    );
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("paks"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec!["huge.rpak"]);

    let snapshot = engine.stats().snapshot();
    assert_eq!(snapshot.transferred_bytes, content.len() as u64);
}

/// Test that a surviving part intermediate that still verifies is reused
/// instead of re-downloaded.
#[tokio::test]
async fn test_multipart_reuses_verified_part() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let content: Vec<u8> = (0..250u32).map(|i| (i * 7 % 256) as u8).collect();
    let mut entry = entry_for("paks/huge.rpak", &content);
    entry.parts = Some(vec![
        ManifestPart {
            checksum: hash_bytes(&content[0..100]),
            size: 100,
        },
        ManifestPart {
            checksum: hash_bytes(&content[100..250]),
            size: 150,
        },
    ]);

    // Part 0 survived an earlier interrupted run.
    std::fs::create_dir_all(dir.path().join("paks")).unwrap();
    std::fs::write(dir.path().join("paks/huge.rpak.p0"), &content[0..100]).unwrap();

    Mock::given(method("GET"))
        .and(path("/paks/huge.rpak"))
        .and(header("range", "bytes=0-99"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(content[0..100].to_vec()))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/paks/huge.rpak"))
        .and(header("range", "bytes=100-249"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(content[100..250].to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let options = TransferOptions {
        multipart_threshold: 100,
        part_size: 100,
        ..quick_options()
    };
    let engine = TransferEngine::new(Fetcher::new().unwrap(), options);
    let outcome = engine.run(vec![job(&server, &dir, entry)]).await;

    assert!(outcome.is_success(), "failed: {:?}", outcome.failed);
    assert_eq!(
        std::fs::read(dir.path().join("paks/huge.rpak")).unwrap(),
        content
    );
    assert!(!dir.path().join("paks/huge.rpak.p0").exists());
    assert!(!dir.path().join("paks/huge.rpak.p1").exists());
}

/// Test that a transient server error is retried and succeeds.
#[tokio::test]
async fn test_transient_error_retried() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let content = b"eventually consistent".to_vec();
    let entry = entry_for("data/flaky.bin", &content);

    Mock::given(method("GET"))
        .and(path("/data/flaky.bin"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/flaky.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let options = TransferOptions {
        compressed: false,
        ..quick_options()
    };
    let engine = TransferEngine::new(Fetcher::new().unwrap(), options);
    let outcome = engine.run(vec![job(&server, &dir, entry)]).await;

    assert!(outcome.is_success(), "failed: {:?}", outcome.failed);
    assert_eq!(
        std::fs::read(dir.path().join("data/flaky.bin")).unwrap(),
        content
    );
}

/// Test that persistent corruption exhausts the attempt budget and
/// reports the final checksum mismatch.
#[tokio::test]
async fn test_persistent_corruption_exhausts_budget() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let entry = entry_for("data/honest.bin", b"what the manifest promises");

    Mock::given(method("GET"))
        .and(path("/data/honest.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"what the server delivers!!".to_vec()))
        .expect(3)
        .mount(&server)
        .await;

    let options = TransferOptions {
        compressed: false,
        network_attempts: 3,
        retry_delay: Duration::from_millis(5),
        ..TransferOptions::default()
    };
    let engine = TransferEngine::new(Fetcher::new().unwrap(), options);
    let outcome = engine.run(vec![job(&server, &dir, entry)]).await;

    assert_eq!(outcome.failed.len(), 1);
    match &outcome.failed[0].1 {
        Error::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**last, Error::ChecksumMismatch { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!dir.path().join("data/honest.bin").exists());
}

/// Test that a cancelled token fails queued files without touching the
/// channel.
#[tokio::test]
async fn test_cancellation_stops_batch() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let engine = TransferEngine::new(Fetcher::new().unwrap(), quick_options())
        .with_cancellation(cancel);

    let jobs = vec![
        job(&server, &dir, entry_for("a.bin", b"one")),
        job(&server, &dir, entry_for("b.bin", b"two")),
    ];
    let outcome = engine.run(jobs).await;

    assert_eq!(outcome.failed.len(), 2);
    assert!(
        outcome
            .failed
            .iter()
            .all(|(_, e)| matches!(e, Error::Cancelled))
    );
}

/// Test that job URLs and destinations derive from the entry path.
#[test]
fn test_job_derivation() {
    let entry = entry_for("audio/localized/japanese/voice.mstr", b"x");
    let job = TransferJob::from_entry(
        "https://cdn.example.com/live/",
        Path::new("/games/live"),
        entry,
    );
    assert_eq!(
        job.url,
        "https://cdn.example.com/live/audio/localized/japanese/voice.mstr"
    );
    assert_eq!(
        job.dest,
        Path::new("/games/live/audio/localized/japanese/voice.mstr")
    );
}
