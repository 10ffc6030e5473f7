//! Recycler integration tests
//!
//! Covers deduplication under concurrent resolution, reference counting and
//! the reaper's physical deletes.

mod helpers;

use jukebox_player::recycler::RecyclerStats;
use jukebox_player::resolver::ResolveError;
use jukebox_player::{ArtifactHandle, Error, Recycler};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Materializer that writes `path` after `delay`, counting its calls
async fn write_after(
    path: PathBuf,
    delay: Duration,
    calls: Arc<AtomicUsize>,
) -> Result<PathBuf, ResolveError> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    std::fs::write(&path, b"audio")?;
    Ok(path)
}

#[tokio::test]
async fn test_concurrent_resolve_materializes_once() {
    let dir = TempDir::new().unwrap();
    let recycler = Recycler::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let path = dir.path().join("song.mp3");

    let (first, second) = tokio::join!(
        recycler.resolve("https://youtu.be/song", || write_after(
            path.clone(),
            Duration::from_millis(50),
            Arc::clone(&calls)
        )),
        recycler.resolve("https://youtu.be/song", || write_after(
            path.clone(),
            Duration::from_millis(50),
            Arc::clone(&calls)
        )),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(recycler.refcount(&first), Some(2));
    assert_eq!(recycler.stats().in_flight, 0);
}

#[tokio::test]
async fn test_many_concurrent_waiters_share_one_handle() {
    let dir = TempDir::new().unwrap();
    let recycler = Arc::new(Recycler::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let path = dir.path().join("shared.mp3");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let recycler = Arc::clone(&recycler);
        let calls = Arc::clone(&calls);
        let path = path.clone();
        tasks.push(tokio::spawn(async move {
            recycler
                .resolve("shared", move || write_after(path, Duration::from_millis(30), calls))
                .await
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }
    assert!(handles.iter().all(|h| *h == handles[0]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(recycler.refcount(&handles[0]), Some(8));

    for handle in &handles {
        recycler.release(handle);
    }
    assert_eq!(recycler.refcount(&handles[0]), Some(0));
}

#[tokio::test]
async fn test_waiters_on_failed_flight_get_resolution_failed() {
    let recycler = Recycler::new();

    let (first, second) = tokio::join!(
        recycler.resolve("broken", || async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<PathBuf, _>(ResolveError::Extractor("video removed".to_string()))
        }),
        recycler.resolve("broken", || async {
            Err::<PathBuf, _>(ResolveError::Output("waiter must not materialize".to_string()))
        }),
    );

    for result in [first, second] {
        match result {
            Err(Error::ResolutionFailed { identity, reason }) => {
                assert_eq!(identity, "broken");
                assert!(reason.contains("video removed"));
            }
            other => panic!("expected ResolutionFailed, got {:?}", other),
        }
    }
    assert_eq!(recycler.stats(), RecyclerStats::default());
}

#[tokio::test]
async fn test_failure_clears_in_flight_marker() {
    let dir = TempDir::new().unwrap();
    let recycler = Recycler::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let failed = recycler
        .resolve("flaky", || async {
            Err::<PathBuf, _>(ResolveError::Extractor("timeout".to_string()))
        })
        .await;
    assert!(matches!(failed, Err(Error::ResolutionFailed { .. })));
    assert_eq!(recycler.stats().in_flight, 0);

    // A retry materializes again instead of waiting on a dead flight
    let handle = recycler
        .resolve("flaky", || {
            write_after(dir.path().join("flaky.mp3"), Duration::ZERO, Arc::clone(&calls))
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(recycler.refcount(&handle), Some(1));
}

#[tokio::test]
async fn test_reap_deletes_only_unreferenced_files() {
    let dir = TempDir::new().unwrap();
    let recycler = Recycler::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let kept = recycler
        .resolve("kept", || write_after(dir.path().join("kept.mp3"), Duration::ZERO, Arc::clone(&calls)))
        .await
        .unwrap();
    let dropped = recycler
        .resolve("dropped", || {
            write_after(dir.path().join("dropped.mp3"), Duration::ZERO, Arc::clone(&calls))
        })
        .await
        .unwrap();

    recycler.release(&dropped);
    // Release never deletes synchronously
    assert!(dropped.path().exists());

    let report = recycler.reap();
    assert_eq!(report.reaped, vec![dropped.clone()]);
    assert!(report.failures.is_empty());
    assert!(!dropped.path().exists());
    assert!(kept.path().exists());
    assert_eq!(recycler.refcount(&dropped), None);
    assert_eq!(recycler.refcount(&kept), Some(1));
}

#[tokio::test]
async fn test_resolve_after_reap_materializes_again() {
    let dir = TempDir::new().unwrap();
    let recycler = Recycler::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let path = dir.path().join("again.mp3");

    let handle = recycler
        .resolve("again", || write_after(path.clone(), Duration::ZERO, Arc::clone(&calls)))
        .await
        .unwrap();
    recycler.release(&handle);
    recycler.reap();

    let handle = recycler
        .resolve("again", || write_after(path.clone(), Duration::ZERO, Arc::clone(&calls)))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(handle.path().exists());
    assert_eq!(recycler.refcount(&handle), Some(1));
}

#[tokio::test]
async fn test_deletion_failure_removes_bookkeeping() {
    let dir = TempDir::new().unwrap();
    let recycler = Recycler::new();
    let missing = dir.path().join("never-written.mp3");

    let handle = recycler
        .resolve("ghost", || {
            let missing = missing.clone();
            async move { Ok::<_, ResolveError>(missing) }
        })
        .await
        .unwrap();
    recycler.release(&handle);

    let report = recycler.reap();
    assert_eq!(report.reaped.len(), 1);
    assert_eq!(report.failures.len(), 1);
    match &report.failures[0] {
        Error::DeletionFailed { path, .. } => assert_eq!(path, &missing),
        other => panic!("expected DeletionFailed, got {:?}", other),
    }
    assert_eq!(recycler.stats(), RecyclerStats::default());

    // No retry on the next sweep
    assert!(recycler.reap().reaped.is_empty());
}

#[tokio::test]
async fn test_reaper_task_sweeps_periodically() {
    let dir = TempDir::new().unwrap();
    let recycler = Arc::new(Recycler::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = recycler
        .resolve("swept", || write_after(dir.path().join("swept.mp3"), Duration::ZERO, calls))
        .await
        .unwrap();
    let reaper = recycler.spawn_reaper(Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.path().exists(), "referenced file must survive sweeps");

    recycler.release(&handle);
    let path = handle.path().to_path_buf();
    helpers::wait_until(Duration::from_secs(5), "reaper to delete the file", || !path.exists()).await;
    assert_eq!(recycler.refcount(&handle), None);

    reaper.abort();
}

#[tokio::test]
async fn test_release_of_unknown_handle_is_ignored() {
    let recycler = Recycler::new();
    recycler.release(&ArtifactHandle::new("/nowhere/unknown.mp3"));
    assert_eq!(recycler.stats(), RecyclerStats::default());
}
