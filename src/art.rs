//! Art Sources - vector-compatible art references by card id
//!
//! The composer receives an `Arc<dyn ArtSource>` and calls it once per card
//! under a deadline. Implementations may block on I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread;
use std::time::Duration;

use base64::Engine;
use tracing::{debug, warn};

/// What the composer places inside the art frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtReference {
    /// Inline vector content with its own coordinate system.
    ///
    /// `namespaces` are the prefixed declarations of the art's root element;
    /// `content` may use them and is only well-formed underneath them.
    Vector {
        view_box: Option<String>,
        namespaces: Vec<(String, String)>,
        content: String,
    },
    /// A self-contained image reference, usually a data URI.
    Image { href: String },
    /// Neutral fill sized to the art frame.
    Placeholder,
}

impl ArtReference {
    pub fn kind(&self) -> &'static str {
        match self {
            ArtReference::Vector { .. } => "vector",
            ArtReference::Image { .. } => "image",
            ArtReference::Placeholder => "placeholder",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtError {
    #[error("no art for card {0}")]
    NotFound(String),

    #[error("failed to read art {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("art {path} is not a usable SVG: {reason}")]
    InvalidSvg { path: String, reason: String },

    #[error("art source failed: {0}")]
    Failed(String),
}

/// Why art resolution did not produce a reference.
#[derive(Debug, thiserror::Error)]
pub enum ArtFailure {
    #[error(transparent)]
    Unavailable(#[from] ArtError),

    #[error("art source did not answer within {0:?}")]
    Timeout(Duration),
}

pub trait ArtSource: Send + Sync {
    fn resolve(&self, card_id: &str) -> Result<ArtReference, ArtError>;
}

/// Lookups allowed to run at once across the process.
pub const DEFAULT_ART_WORKERS: usize = 32;

/// Bound on art worker threads, including ones still running past their deadline.
#[derive(Debug)]
pub struct ArtWorkers {
    limit: usize,
    running: AtomicUsize,
}

impl ArtWorkers {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            running: AtomicUsize::new(0),
        }
    }

    /// Process-wide pool used by [`resolve_with_deadline`].
    pub fn global() -> Arc<ArtWorkers> {
        static GLOBAL: OnceLock<Arc<ArtWorkers>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ArtWorkers::new(DEFAULT_ART_WORKERS))))
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn acquire(self: &Arc<Self>) -> Option<WorkerSlot> {
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.limit).then_some(n + 1))
            .ok()
            .map(|_| WorkerSlot(Arc::clone(self)))
    }
}

/// Held by a worker thread until its source returns.
struct WorkerSlot(Arc<ArtWorkers>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Call `source` on a worker thread and wait at most `deadline`.
///
/// A source that overruns is left to finish on its own thread; its result is
/// dropped. Such threads keep their slot in the global [`ArtWorkers`] pool, so
/// a hanging source exhausts the pool instead of growing the thread count.
pub fn resolve_with_deadline(
    source: &Arc<dyn ArtSource>,
    card_id: &str,
    deadline: Duration,
) -> Result<ArtReference, ArtFailure> {
    resolve_with_workers(&ArtWorkers::global(), source, card_id, deadline)
}

pub fn resolve_with_workers(
    workers: &Arc<ArtWorkers>,
    source: &Arc<dyn ArtSource>,
    card_id: &str,
    deadline: Duration,
) -> Result<ArtReference, ArtFailure> {
    let slot = workers.acquire().ok_or_else(|| {
        warn!(card_id, running = workers.running(), "art workers exhausted");
        ArtError::Failed(format!("{} art lookups still running", workers.running()))
    })?;

    let (tx, rx) = mpsc::channel();
    let source = Arc::clone(source);
    let id = card_id.to_string();
    thread::Builder::new()
        .name("art-resolve".into())
        .spawn(move || {
            let _slot = slot;
            let _ = tx.send(source.resolve(&id));
        })
        .map_err(|e| ArtError::Failed(format!("could not start art worker: {e}")))?;

    match rx.recv_timeout(deadline) {
        Ok(result) => Ok(result?),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ArtFailure::Timeout(deadline)),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(ArtError::Failed("art worker exited without answering".into()).into())
        }
    }
}

/// Always answers with the placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderArtSource;

impl ArtSource for PlaceholderArtSource {
    fn resolve(&self, _card_id: &str) -> Result<ArtReference, ArtError> {
        Ok(ArtReference::Placeholder)
    }
}

/// Fixed art by card id; unknown ids are `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtSource {
    entries: HashMap<String, ArtReference>,
}

impl MemoryArtSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, card_id: impl Into<String>, art: ArtReference) -> Self {
        self.entries.insert(card_id.into(), art);
        self
    }
}

impl ArtSource for MemoryArtSource {
    fn resolve(&self, card_id: &str) -> Result<ArtReference, ArtError> {
        self.entries
            .get(card_id)
            .cloned()
            .ok_or_else(|| ArtError::NotFound(card_id.to_string()))
    }
}

/// Looks up `<card-id>.svg`, `.png`, `.jpg` or `.jpeg` in a directory.
/// SVG art is inlined; bitmaps become base64 data URIs.
#[derive(Debug, Clone)]
pub struct FileArtSource {
    dir: PathBuf,
}

impl FileArtSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidate(&self, card_id: &str) -> Option<(PathBuf, &'static str)> {
        const KINDS: [(&str, &str); 4] = [
            ("svg", "image/svg+xml"),
            ("png", "image/png"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
        ];
        KINDS.iter().find_map(|(ext, mime)| {
            let path = self.dir.join(format!("{card_id}.{ext}"));
            path.is_file().then_some((path, *mime))
        })
    }
}

impl ArtSource for FileArtSource {
    fn resolve(&self, card_id: &str) -> Result<ArtReference, ArtError> {
        if card_id.contains(['/', '\\']) || card_id.starts_with('.') {
            return Err(ArtError::NotFound(card_id.to_string()));
        }
        let (path, mime) = self
            .candidate(card_id)
            .ok_or_else(|| ArtError::NotFound(card_id.to_string()))?;
        debug!(card_id, path = %path.display(), "resolving art from file");

        let bytes = std::fs::read(&path).map_err(|source| ArtError::Io {
            path: path.display().to_string(),
            source,
        })?;

        if mime == "image/svg+xml" {
            let text = String::from_utf8(bytes).map_err(|e| ArtError::InvalidSvg {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            return inline_svg(&path, &text);
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Ok(ArtReference::Image {
            href: format!("data:{mime};base64,{encoded}"),
        })
    }
}

fn inline_svg(path: &Path, text: &str) -> Result<ArtReference, ArtError> {
    let invalid = |reason: String| ArtError::InvalidSvg {
        path: path.display().to_string(),
        reason,
    };
    let doc = roxmltree::Document::parse(text).map_err(|e| invalid(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(invalid(format!("root element is <{}>", root.tag_name().name())));
    }
    let content = root
        .children()
        .filter(|c| !c.is_comment())
        .map(|c| &text[c.range()])
        .collect::<String>()
        .trim()
        .to_string();
    let namespaces = root
        .namespaces()
        .filter_map(|ns| ns.name().map(|prefix| (prefix, ns.uri())))
        .filter(|(prefix, _)| *prefix != "xml")
        .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
        .collect();
    Ok(ArtReference::Vector {
        view_box: root.attribute("viewBox").map(str::to_string),
        namespaces,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct SlowArt(Duration);

    impl ArtSource for SlowArt {
        fn resolve(&self, _card_id: &str) -> Result<ArtReference, ArtError> {
            thread::sleep(self.0);
            Ok(ArtReference::Placeholder)
        }
    }

    #[test]
    fn deadline_elapses_as_timeout() {
        let source: Arc<dyn ArtSource> = Arc::new(SlowArt(Duration::from_millis(500)));
        let result = resolve_with_deadline(&source, "c1", Duration::from_millis(20));
        assert!(matches!(result, Err(ArtFailure::Timeout(_))));
    }

    #[test]
    fn overrunning_lookups_hold_their_worker_slot() {
        let workers = Arc::new(ArtWorkers::new(1));
        let slow: Arc<dyn ArtSource> = Arc::new(SlowArt(Duration::from_millis(200)));
        let fast: Arc<dyn ArtSource> = Arc::new(PlaceholderArtSource);

        let first = resolve_with_workers(&workers, &slow, "c1", Duration::from_millis(10));
        assert!(matches!(first, Err(ArtFailure::Timeout(_))));
        assert_eq!(workers.running(), 1);

        let second = resolve_with_workers(&workers, &fast, "c2", Duration::from_secs(1));
        assert!(matches!(second, Err(ArtFailure::Unavailable(ArtError::Failed(_)))));

        let started = std::time::Instant::now();
        while workers.running() > 0 && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(workers.running(), 0);
        let third = resolve_with_workers(&workers, &fast, "c3", Duration::from_secs(1));
        assert_eq!(third.unwrap(), ArtReference::Placeholder);
    }

    #[test]
    fn missing_art_is_unavailable() {
        let source: Arc<dyn ArtSource> = Arc::new(MemoryArtSource::new());
        let result = resolve_with_deadline(&source, "c1", Duration::from_secs(1));
        assert!(matches!(result, Err(ArtFailure::Unavailable(ArtError::NotFound(_)))));
    }

    #[test]
    fn file_source_inlines_svg_and_embeds_bitmaps() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("bear.svg"),
            r#"<?xml version="1.0"?><svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"><circle r="4"/></svg>"#,
        )
        .unwrap();
        fs::write(dir.path().join("wolf.png"), [0x89, b'P', b'N', b'G']).unwrap();

        let source = FileArtSource::new(dir.path());
        match source.resolve("bear").unwrap() {
            ArtReference::Vector {
                view_box,
                namespaces,
                content,
            } => {
                assert_eq!(view_box.as_deref(), Some("0 0 10 10"));
                assert!(namespaces.is_empty());
                assert_eq!(content, r#"<circle r="4"/>"#);
            }
            other => panic!("unexpected {other:?}"),
        }
        match source.resolve("wolf").unwrap() {
            ArtReference::Image { href } => assert!(href.starts_with("data:image/png;base64,")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(source.resolve("owl"), Err(ArtError::NotFound(_))));
        assert!(matches!(source.resolve("../bear"), Err(ArtError::NotFound(_))));
    }

    #[test]
    fn inkscape_art_keeps_its_prefixed_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("owl.svg"),
            r#"<svg xmlns="http://www.w3.org/2000/svg"
                xmlns:sodipodi="http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd"
                xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape">
              <sodipodi:namedview id="view"/>
              <g inkscape:label="Body"><rect width="4" height="4"/></g>
            </svg>"#,
        )
        .unwrap();

        match FileArtSource::new(dir.path()).resolve("owl").unwrap() {
            ArtReference::Vector { namespaces, .. } => {
                let prefixes: Vec<&str> = namespaces.iter().map(|(p, _)| p.as_str()).collect();
                assert!(prefixes.contains(&"sodipodi"));
                assert!(prefixes.contains(&"inkscape"));
                assert!(!prefixes.contains(&"xml"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
