//! Document loading and the shared cross-document cache.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::SkyhookError;
use crate::config::ResolverOptions;
use crate::interface::{resolve_in, Interface};
use crate::reference::collect_document_refs;

/// Source of raw document trees.
pub trait DocumentLoader: Send + Sync {
    /// Returns the decoded tree for `key`, a key produced by
    /// [`DocumentLoader::resolve_key`].
    fn load(&self, key: &str) -> Result<JsonValue, SkyhookError>;

    /// Turns the document part of a `$ref` met inside document `from` (or a
    /// root key when `from` is `None`) into the key the document is cached
    /// and loaded under. Every spelling of one document must map to the same
    /// key.
    fn resolve_key(&self, from: Option<&str>, raw: &str) -> Result<String, SkyhookError> {
        Ok(normalize_key(from, raw))
    }
}

/// Resolves `raw` against the directory of `from` and folds `.` and `..`
/// segments, so `palette.json`, `./palette.json` and
/// `lib/../palette.json` name the same key.
pub fn normalize_key(from: Option<&str>, raw: &str) -> String {
    let raw = raw.trim();
    let joined = match from.and_then(|from| from.rsplit_once('/')) {
        Some((dir, _)) if !raw.starts_with('/') => format!("{dir}/{raw}"),
        _ => raw.to_string(),
    };
    let absolute = joined.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            part => parts.push(part),
        }
    }
    let key = parts.join("/");
    if absolute {
        format!("/{key}")
    } else {
        key
    }
}

/// [`DocumentLoader`] reading JSON files relative to a base directory.
///
/// Keys are canonical paths, written relative to the base directory when the
/// file lives inside it, so symlinks and redundant segments collapse to one
/// key.
#[derive(Debug, Clone)]
pub struct FsLoader {
    base_dir: PathBuf,
}

impl FsLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl DocumentLoader for FsLoader {
    fn resolve_key(&self, from: Option<&str>, raw: &str) -> Result<String, SkyhookError> {
        let lexical = normalize_key(from, raw);
        let path = self.base_dir.join(&lexical);
        let canonical = fs::canonicalize(&path).map_err(|e| SkyhookError::Load {
            document: lexical.clone(),
            message: format!("failed to resolve '{}': {e}", path.display()),
        })?;
        let relative = fs::canonicalize(&self.base_dir)
            .ok()
            .and_then(|base| canonical.strip_prefix(base).ok().map(Path::to_path_buf));
        Ok(path_key(relative.as_deref().unwrap_or(&canonical)))
    }

    fn load(&self, key: &str) -> Result<JsonValue, SkyhookError> {
        let path = self.base_dir.join(key);
        let text = fs::read_to_string(&path).map_err(|e| SkyhookError::Load {
            document: key.to_string(),
            message: format!("failed to read '{}': {e}", path.display()),
        })?;
        serde_json::from_str(&text).map_err(|e| SkyhookError::Load {
            document: key.to_string(),
            message: format!("invalid JSON: {e}"),
        })
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// [`DocumentLoader`] backed by a caller-provided map. Map keys are matched
/// after [`normalize_key`].
#[derive(Debug, Clone, Default)]
pub struct MapLoader {
    documents: HashMap<String, JsonValue>,
}

impl MapLoader {
    pub fn new(documents: HashMap<String, JsonValue>) -> Self {
        let documents = documents
            .into_iter()
            .map(|(key, document)| (normalize_key(None, &key), document))
            .collect();
        Self { documents }
    }

    pub fn with_document(mut self, key: impl Into<String>, document: JsonValue) -> Self {
        self.documents.insert(normalize_key(None, &key.into()), document);
        self
    }
}

impl DocumentLoader for MapLoader {
    fn load(&self, key: &str) -> Result<JsonValue, SkyhookError> {
        self.documents
            .get(key)
            .cloned()
            .ok_or_else(|| SkyhookError::Load {
                document: key.to_string(),
                message: "no such document".to_string(),
            })
    }
}

type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

/// Process-wide cache of loaded and resolved documents.
///
/// Each key owns a slot; the first caller fills it while later callers for
/// the same key wait on the slot, so a document is loaded and resolved at
/// most once even under concurrent resolution. Failures are not cached.
pub struct DocumentCache {
    loader: Box<dyn DocumentLoader>,
    options: ResolverOptions,
    raw: Mutex<HashMap<String, Slot<JsonValue>>>,
    resolved: Mutex<HashMap<String, Slot<Interface>>>,
}

impl DocumentCache {
    pub fn new(loader: impl DocumentLoader + 'static, options: ResolverOptions) -> Self {
        Self {
            loader: Box::new(loader),
            options,
            raw: Mutex::new(HashMap::new()),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Returns the raw tree for `key`, loading it on first use.
    pub fn raw(&self, key: &str) -> Result<Arc<JsonValue>, SkyhookError> {
        let key = self.resolve_key(None, key)?;
        self.raw_at(&key)
    }

    /// Returns the resolved interface for `key`, resolving it on first use.
    pub fn interface(&self, key: &str) -> Result<Arc<Interface>, SkyhookError> {
        let key = self.resolve_key(None, key)?;
        self.interface_at(&key)
    }

    /// Cache key for the document `raw` names from inside document `from`.
    pub(crate) fn resolve_key(&self, from: Option<&str>, raw: &str) -> Result<String, SkyhookError> {
        self.loader.resolve_key(from, raw)
    }

    /// Like [`DocumentCache::interface`] for an already resolved key.
    pub(crate) fn interface_at(&self, key: &str) -> Result<Arc<Interface>, SkyhookError> {
        // Document-level cycles are rejected before any slot is held, so
        // nested resolution only ever waits along acyclic edges.
        self.check_document_graph(key)?;
        fill_slot(&self.resolved, key, || {
            let raw = self.raw_at(key)?;
            let interface = resolve_in(&raw, Some(key), Some(self), &self.options)?;
            Ok(Arc::new(interface))
        })
    }

    fn raw_at(&self, key: &str) -> Result<Arc<JsonValue>, SkyhookError> {
        fill_slot(&self.raw, key, || {
            debug!(document = key, "loading document");
            self.loader.load(key).map(Arc::new)
        })
    }

    /// Number of documents whose raw tree is currently cached.
    pub fn loaded_count(&self) -> usize {
        let slots: Vec<Slot<JsonValue>> = lock(&self.raw).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    fn check_document_graph(&self, root: &str) -> Result<(), SkyhookError> {
        let mut stack = Vec::new();
        let mut done = BTreeSet::new();
        self.visit_document(root, &mut stack, &mut done)
    }

    fn visit_document(
        &self,
        key: &str,
        stack: &mut Vec<String>,
        done: &mut BTreeSet<String>,
    ) -> Result<(), SkyhookError> {
        if done.contains(key) {
            return Ok(());
        }
        if let Some(start) = stack.iter().position(|k| k == key) {
            let mut cycle = stack[start..].to_vec();
            cycle.push(key.to_string());
            return Err(SkyhookError::CyclicReference {
                location: format!("{}#", stack.last().map(String::as_str).unwrap_or(key)),
                cycle: cycle.join(" -> "),
            });
        }
        let raw = self.raw_at(key)?;
        let mut refs = BTreeSet::new();
        collect_document_refs(&raw, &mut refs);
        let mut children = BTreeSet::new();
        for raw_ref in &refs {
            children.insert(self.resolve_key(Some(key), raw_ref)?);
        }
        children.remove(key);

        stack.push(key.to_string());
        for child in &children {
            self.visit_document(child, stack, done)?;
        }
        stack.pop();
        done.insert(key.to_string());
        Ok(())
    }
}

fn fill_slot<T>(
    slots: &Mutex<HashMap<String, Slot<T>>>,
    key: &str,
    init: impl FnOnce() -> Result<Arc<T>, SkyhookError>,
) -> Result<Arc<T>, SkyhookError> {
    let slot = Arc::clone(lock(slots).entry(key.to_string()).or_default());
    let mut guard = lock(&slot);
    if let Some(value) = guard.as_ref() {
        debug!(document = key, "document cache hit");
        return Ok(Arc::clone(value));
    }
    let value = init()?;
    *guard = Some(Arc::clone(&value));
    Ok(value)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    struct Counting {
        inner: MapLoader,
        loads: Arc<AtomicUsize>,
    }

    impl DocumentLoader for Counting {
        fn load(&self, key: &str) -> Result<JsonValue, SkyhookError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(key)
        }
    }

    fn library(name: &str) -> JsonValue {
        json!({
            "service": {"name": name, "version": "1.0.0", "description": "Shared types."},
            "types": [{"name": "colour", "description": "A colour.", "schema": {"enum": ["red", "blue"]}}]
        })
    }

    #[test]
    fn map_loader_reports_missing_documents() {
        let err = MapLoader::default().load("nope.json").unwrap_err();
        assert!(matches!(err, SkyhookError::Load { .. }));
    }

    #[test]
    fn keys_resolve_against_the_referencing_document() {
        assert_eq!(normalize_key(None, "./a.json"), "a.json");
        assert_eq!(normalize_key(None, " lib/../a.json "), "a.json");
        assert_eq!(normalize_key(Some("lib/x.json"), "b.json"), "lib/b.json");
        assert_eq!(normalize_key(Some("lib/x.json"), "../a.json"), "a.json");
        assert_eq!(normalize_key(Some("lib/x.json"), "/srv/a.json"), "/srv/a.json");
        assert_eq!(normalize_key(Some("/srv/lib/x.json"), "../../a.json"), "/a.json");
        assert_eq!(normalize_key(None, "../up.json"), "../up.json");
    }

    #[test]
    fn one_document_under_two_spellings_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let shop = json!({
            "service": {"name": "shop", "version": "1.0.0", "description": "Shop."},
            "messages": [
                {"name": "plain", "description": "P.", "schema": {"$ref": "shared.json#/types/colour"}},
                {"name": "dotted", "description": "D.", "schema": {"$ref": "./shared.json#/types/colour"}}
            ]
        });
        let cache = DocumentCache::new(
            Counting {
                inner: MapLoader::default()
                    .with_document("shared.json", library("shared"))
                    .with_document("./shop.json", shop),
                loads: Arc::clone(&loads),
            },
            ResolverOptions::default(),
        );

        let interface = cache.interface("shop.json").unwrap();
        assert_eq!(interface.document(), Some("shop.json"));
        assert_eq!(
            interface.registry().external_documents().collect::<Vec<_>>(),
            vec!["shared.json"]
        );
        assert_eq!(
            interface.message("plain").unwrap().schema,
            interface.message("dotted").unwrap().schema
        );
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(
            &cache.interface("shared.json").unwrap(),
            &cache.interface("lib/../shared.json").unwrap()
        ));
    }

    #[test]
    fn concurrent_resolution_loads_each_document_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(DocumentCache::new(
            Counting {
                inner: MapLoader::default().with_document("shared.json", library("shared")),
                loads: Arc::clone(&loads),
            },
            ResolverOptions::default(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.interface("shared.json").unwrap())
            })
            .collect();
        let resolved: Vec<Arc<Interface>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(resolved.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.loaded_count(), 1);
    }

    #[test]
    fn document_cycles_are_rejected() {
        let a = json!({
            "service": {"name": "a", "version": "1.0.0", "description": "A."},
            "types": [{"name": "x", "description": "X.", "schema": {"$ref": "b.json#/types/y"}}]
        });
        let b = json!({
            "service": {"name": "b", "version": "1.0.0", "description": "B."},
            "types": [{"name": "y", "description": "Y.", "schema": {"$ref": "a.json#/types/x"}}]
        });
        let cache = DocumentCache::new(
            MapLoader::default()
                .with_document("a.json", a)
                .with_document("b.json", b),
            ResolverOptions::default(),
        );
        let err = cache.interface("a.json").unwrap_err();
        match err {
            SkyhookError::CyclicReference { cycle, .. } => {
                assert_eq!(cycle, "a.json -> b.json -> a.json");
            }
            other => panic!("expected cycle, got {other}"),
        }
    }
}
