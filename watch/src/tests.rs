// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::{Excludes, Invalidatable, InvalidationWatcher};

use std::collections::HashSet;
use std::fs::{self, create_dir};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use crossbeam_channel::{self, RecvTimeoutError};
use parking_lot::Mutex;
use task_executor::Executor;

fn setup_fs() -> (tempfile::TempDir, PathBuf) {
  let tempdir = tempfile::TempDir::new().unwrap();
  let build_root = tempdir.path();
  create_dir(build_root.join("foo")).unwrap();
  let file_path = build_root.join("foo/watch_me.txt");
  fs::write(&file_path, b"contents").unwrap();
  (tempdir, file_path)
}

async fn setup_watch(
  ignorer: Arc<Excludes>,
  build_root: PathBuf,
  file_path: PathBuf,
) -> Arc<InvalidationWatcher> {
  let executor = Executor::new();
  let watcher = InvalidationWatcher::new(executor, build_root, ignorer)
    .expect("Couldn't create InvalidationWatcher");
  watcher.watch(file_path).await.unwrap();
  watcher
}

#[tokio::test]
async fn receive_watch_event_on_file_change() {
  let (tempdir, file_path) = setup_fs();
  let build_root = tempdir.path().to_path_buf();
  let file_path_rel = file_path.strip_prefix(&build_root).unwrap().to_path_buf();

  let invalidatable = Arc::new(TestInvalidatable::default());
  let ignorer = Arc::new(Excludes::empty());
  let watcher = setup_watch(ignorer, build_root, file_path.clone()).await;
  watcher.start(&invalidatable);

  fs::write(&file_path, b"stnetnoc").unwrap();

  for _ in 0..20 {
    sleep(Duration::from_millis(100));
    if invalidatable.was_invalidated(&file_path_rel) {
      return;
    }
  }
  panic!("Did not observe invalidation.");
}

#[tokio::test]
async fn ignore_file_events_matching_exclusion_patterns() {
  let (tempdir, file_path) = setup_fs();
  let build_root = tempdir.path().to_path_buf();
  let file_path_rel = file_path.strip_prefix(&build_root).unwrap().to_path_buf();

  let invalidatable = Arc::new(TestInvalidatable::default());
  let ignorer = Arc::new(Excludes::from_patterns(&build_root, ["/foo"]).unwrap());
  let watcher = setup_watch(ignorer, build_root, file_path.clone()).await;
  watcher.start(&invalidatable);

  fs::write(&file_path, b"stnetnoc").unwrap();

  for _ in 0..10 {
    sleep(Duration::from_millis(100));
    assert!(
      !invalidatable.was_invalidated(&file_path_rel),
      "Node was invalidated even though it was excluded"
    );
  }
}

#[tokio::test]
async fn liveness_watch_error() {
  let (tempdir, file_path) = setup_fs();
  let build_root = tempdir.path().to_path_buf();

  let invalidatable = Arc::new(TestInvalidatable::default());
  let ignorer = Arc::new(Excludes::empty());
  // NB: We create this watcher, but we don't call start: instead we create the background thread
  // directly so that we can drive it with synthetic events.
  let _watcher = setup_watch(ignorer.clone(), build_root.clone(), file_path).await;
  let (liveness_sender, liveness_receiver) = crossbeam_channel::unbounded();
  let (event_sender, event_receiver) = crossbeam_channel::unbounded();
  let join_handle = InvalidationWatcher::start_background_thread(
    Arc::downgrade(&invalidatable),
    ignorer,
    build_root,
    liveness_sender,
    event_receiver,
  );

  assert_eq!(
    Err(RecvTimeoutError::Timeout),
    liveness_receiver.recv_timeout(Duration::from_millis(100))
  );
  event_sender
    .send(Err(notify::Error::generic(
      "This should kill the background thread",
    )))
    .unwrap();

  assert!(liveness_receiver
    .recv_timeout(Duration::from_millis(1000))
    .is_ok());
  join_handle.join().unwrap();
}

#[derive(Default)]
struct TestInvalidatable {
  pub calls: Mutex<Vec<HashSet<PathBuf>>>,
}

impl TestInvalidatable {
  fn was_invalidated(&self, path: &Path) -> bool {
    let calls = self.calls.lock();
    calls.iter().any(|call| call.contains(path))
  }
}

impl Invalidatable for TestInvalidatable {
  fn invalidate(&self, paths: &HashSet<PathBuf>, _caller: &str) -> usize {
    let invalidated = paths.len();
    self.calls.lock().push(paths.clone());
    invalidated
  }
}
