//! Capture-directory monitor.
//!
//! Performs the startup enumeration of the capture directory and then
//! watches it for create/delete events, keeping the in-memory registry in
//! lockstep with the files on disk. Duplicate events within a short window
//! are coalesced, and re-processing the pipeline's own writes is harmless
//! because registry inserts are idempotent by path.

use crate::consent::filename;
use crate::consent::registry::{ConsentRecord, ConsentRegistry};
use crate::defaults;
use crate::pipeline::health::Heartbeat;
use crate::vision::recognize::FaceIndexer;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Window within which repeated events for the same path are treated as one.
const COALESCE_WINDOW: Duration = Duration::from_millis(250);

/// Loads every parseable capture file in `dir` into the registry. Files
/// outside the filename grammar, unreadable images, and faceless images are
/// skipped with a warning. Returns the number of records inserted.
pub fn load_existing(
    dir: &Path,
    registry: &ConsentRegistry,
    indexer: &mut FaceIndexer,
) -> std::io::Result<usize> {
    std::fs::create_dir_all(dir)?;

    let mut loaded = 0;
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for path in entries {
        if upsert_capture(&path, registry, indexer) {
            loaded += 1;
        }
    }

    log::info!(
        "loaded {} consent records for {} individuals from {}",
        loaded,
        registry.names().len(),
        dir.display()
    );
    Ok(loaded)
}

/// Loads one capture file and inserts it into the registry. Returns true on
/// insert. Non-matching filenames and unusable images are skipped.
fn upsert_capture(path: &Path, registry: &ConsentRegistry, indexer: &mut FaceIndexer) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(parsed) = filename::parse_capture_filename(file_name) else {
        if path.is_file() {
            log::warn!("ignoring capture file outside naming grammar: {file_name}");
        }
        return false;
    };

    let image = match image::open(path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            log::warn!("failed to load capture image {}: {e}", path.display());
            return false;
        }
    };

    match indexer.embed_largest(&image) {
        Ok(Some(embedding)) => {
            registry.insert(ConsentRecord {
                path: path.to_path_buf(),
                name: parsed.name.clone(),
                embedding,
            });
            log::info!("consent added for '{}' from {}", parsed.name, file_name);
            true
        }
        Ok(None) => {
            log::warn!("no face detected in capture image {}", path.display());
            false
        }
        Err(e) => {
            log::warn!("failed to embed capture image {}: {e}", path.display());
            false
        }
    }
}

/// Background watcher thread keeping the registry synchronized with the
/// capture directory.
pub struct ConsentMonitor {
    handle: Option<JoinHandle<()>>,
}

impl ConsentMonitor {
    pub fn spawn(
        dir: PathBuf,
        registry: Arc<ConsentRegistry>,
        mut indexer: FaceIndexer,
        stop: Arc<AtomicBool>,
        heartbeat: Heartbeat,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;

        let handle = thread::Builder::new()
            .name("consent-monitor".to_string())
            .spawn(move || {
                let (tx, rx) = mpsc::channel::<notify::Result<Event>>();

                let mut watcher = match notify::recommended_watcher(tx) {
                    Ok(watcher) => watcher,
                    Err(e) => {
                        log::error!("failed to create capture watcher: {e}");
                        return;
                    }
                };
                if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                    log::error!("failed to watch {}: {e}", dir.display());
                    return;
                }

                let mut recent: HashMap<PathBuf, Instant> = HashMap::new();

                while !stop.load(Ordering::SeqCst) {
                    heartbeat.beat();

                    let event = match rx.recv_timeout(defaults::QUEUE_TIMEOUT) {
                        Ok(Ok(event)) => event,
                        Ok(Err(e)) => {
                            log::warn!("capture watcher error: {e}");
                            continue;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    };

                    handle_event(&event, &registry, &mut indexer, &mut recent);
                }

                log::debug!("consent monitor stopped");
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn into_handle(mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}

fn handle_event(
    event: &Event,
    registry: &ConsentRegistry,
    indexer: &mut FaceIndexer,
    recent: &mut HashMap<PathBuf, Instant>,
) {
    let now = Instant::now();
    recent.retain(|_, seen| now.duration_since(*seen) < COALESCE_WINDOW);

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in &event.paths {
                if !path.is_file() {
                    continue;
                }
                // Coalesce the create/modify bursts writers emit. Only a
                // successful load enters the window: a create observed
                // before the bytes landed is retried on the next event.
                if let Some(seen) = recent.get(path) {
                    if now.duration_since(*seen) < COALESCE_WINDOW {
                        continue;
                    }
                }
                if upsert_capture(path, registry, indexer) {
                    recent.insert(path.clone(), now);
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                recent.remove(path);
                if let Some(name) = registry.remove_file(path) {
                    if registry.snapshot().contains_name(&name) {
                        log::info!("consent record removed: {}", path.display());
                    } else {
                        log::info!("consent revoked for '{}'", name);
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::detect::MockFaceDetector;
    use crate::vision::recognize::{FaceIndexer, MockFaceRecognizer};
    use crate::vision::types::FaceDetection;
    use image::RgbImage;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn single_face_indexer() -> FaceIndexer {
        FaceIndexer::new(
            Box::new(MockFaceDetector::fixed(vec![FaceDetection::new(
                4.0, 4.0, 16.0, 16.0, 0.9,
            )])),
            Box::new(MockFaceRecognizer::new()),
        )
    }

    fn write_capture(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let image = RgbImage::from_pixel(32, 32, image::Rgb([120, 120, 120]));
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn test_load_existing_empty_dir() {
        let dir = TempDir::new().unwrap();
        let registry = ConsentRegistry::new();
        let mut indexer = single_face_indexer();

        let loaded = load_existing(dir.path(), &registry, &mut indexer).unwrap();
        assert_eq!(loaded, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_existing_creates_missing_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("captures");
        let registry = ConsentRegistry::new();
        let mut indexer = single_face_indexer();

        let loaded = load_existing(&nested, &registry, &mut indexer).unwrap();
        assert_eq!(loaded, 0);
        assert!(nested.exists());
    }

    #[test]
    fn test_load_existing_inserts_parseable_files() {
        let dir = TempDir::new().unwrap();
        write_capture(dir.path(), "20250101120000_alice.jpg");
        write_capture(dir.path(), "20250101120001_bob.jpg");

        let registry = ConsentRegistry::new();
        let mut indexer = single_face_indexer();
        let loaded = load_existing(dir.path(), &registry, &mut indexer).unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(
            registry.names(),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[test]
    fn test_load_existing_skips_bad_filenames() {
        let dir = TempDir::new().unwrap();
        write_capture(dir.path(), "20250101120000_alice.jpg");
        write_capture(dir.path(), "Not-A-Capture.jpg");
        let mut junk = std::fs::File::create(dir.path().join("notes.txt")).unwrap();
        junk.write_all(b"hello").unwrap();

        let registry = ConsentRegistry::new();
        let mut indexer = single_face_indexer();
        let loaded = load_existing(dir.path(), &registry, &mut indexer).unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(registry.names(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_load_existing_skips_corrupt_images() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("20250101120000_alice.jpg");
        std::fs::write(&path, b"not a jpeg at all").unwrap();

        let registry = ConsentRegistry::new();
        let mut indexer = single_face_indexer();
        let loaded = load_existing(dir.path(), &registry, &mut indexer).unwrap();

        assert_eq!(loaded, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_existing_skips_faceless_images() {
        let dir = TempDir::new().unwrap();
        write_capture(dir.path(), "20250101120000_alice.jpg");

        let registry = ConsentRegistry::new();
        let mut indexer = FaceIndexer::new(
            Box::new(MockFaceDetector::fixed(Vec::new())),
            Box::new(MockFaceRecognizer::new()),
        );
        let loaded = load_existing(dir.path(), &registry, &mut indexer).unwrap();

        assert_eq!(loaded, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_existing_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_capture(dir.path(), "20250101120000_alice.jpg");
        write_capture(dir.path(), "20250101120005_alice.jpg");

        let registry = ConsentRegistry::new();
        let mut indexer = single_face_indexer();

        load_existing(dir.path(), &registry, &mut indexer).unwrap();
        let names_first = registry.names();
        let count_first = registry.embedding_count();

        load_existing(dir.path(), &registry, &mut indexer).unwrap();
        assert_eq!(registry.names(), names_first);
        assert_eq!(registry.embedding_count(), count_first);
        assert_eq!(count_first, 2);
    }

    #[test]
    fn test_monitor_observes_create_and_delete() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ConsentRegistry::new());
        let stop = Arc::new(AtomicBool::new(false));
        let heartbeats = crate::pipeline::health::HeartbeatRegistry::new();

        let monitor = ConsentMonitor::spawn(
            dir.path().to_path_buf(),
            registry.clone(),
            single_face_indexer(),
            stop.clone(),
            heartbeats.register("consent-monitor"),
        )
        .unwrap();

        // Create a capture and wait for the watcher to pick it up.
        let path = write_capture(dir.path(), "20250101120000_alice.jpg");
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(registry.names(), vec!["alice".to_string()]);

        // Delete it and wait for revocation.
        std::fs::remove_file(&path).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !registry.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(registry.is_empty());

        stop.store(true, Ordering::SeqCst);
        monitor.join();
    }

    #[test]
    fn test_monitor_stops_promptly() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ConsentRegistry::new());
        let stop = Arc::new(AtomicBool::new(false));
        let heartbeats = crate::pipeline::health::HeartbeatRegistry::new();

        let monitor = ConsentMonitor::spawn(
            dir.path().to_path_buf(),
            registry,
            single_face_indexer(),
            stop.clone(),
            heartbeats.register("consent-monitor"),
        )
        .unwrap();

        stop.store(true, Ordering::SeqCst);
        let start = Instant::now();
        monitor.join();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
