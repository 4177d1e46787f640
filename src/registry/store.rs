//! Registry store: snapshot-replace holder plus on-disk persistence.
//!
//! Readers call [`RegistryStore::current`] and get an `Arc<Registry>` that
//! never changes under them. Rebuilds merge fresh backend listings into a new
//! registry and swap it in only when the merge succeeds.
//!
//! On disk the registry lives at `<path>`, with `<path>.bak` holding the
//! previous version and `<path>.tmp` used for atomic replacement.

use crate::backend::Connector;
use crate::registry::Registry;
use crate::types::{BackendId, Error, Result};
use arc_swap::ArcSwap;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

// =============================================================================
// File helpers
// =============================================================================

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `<path>.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    sibling(path, ".bak")
}

/// Serialize to `<path>.tmp`, fsync, then rename over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = sibling(path, ".tmp");
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Persist a registry: back up the current file (best-effort), then replace it atomically.
pub fn persist(registry: &Registry, path: &Path) -> Result<()> {
    let contents = registry.to_json()?;

    if path.exists() {
        let backup = backup_path(path);
        if let Err(e) = fs::copy(path, &backup) {
            tracing::warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "registry backup failed; writing anyway"
            );
        }
    }

    write_atomic(path, contents.as_bytes())?;

    tracing::debug!(
        path = %path.display(),
        total_tools = registry.total_tools(),
        "registry persisted"
    );
    Ok(())
}

// =============================================================================
// Loading
// =============================================================================

/// Where a loaded registry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Primary,
    Backup,
    /// Neither file exists yet; the registry is empty.
    Missing,
}

/// Result of [`load`].
#[derive(Debug)]
pub struct LoadedRegistry {
    pub registry: Registry,
    pub source: LoadSource,
}

fn read_registry(path: &Path, known: &HashSet<BackendId>) -> Result<Option<Registry>> {
    match fs::read_to_string(path) {
        Ok(raw) => Registry::from_json(&raw, known).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::registry_corrupt(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Load a registry, falling back to `<path>.bak` once when the primary is
/// unreadable or violates the registry invariants.
pub fn load(path: &Path, known: &HashSet<BackendId>) -> Result<LoadedRegistry> {
    let primary_err = match read_registry(path, known) {
        Ok(Some(registry)) => {
            return Ok(LoadedRegistry {
                registry,
                source: LoadSource::Primary,
            })
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "primary registry unusable");
            Some(e)
        }
    };

    let backup = backup_path(path);
    match (read_registry(&backup, known), primary_err) {
        (Ok(Some(registry)), _) => {
            tracing::info!(
                backup = %backup.display(),
                total_tools = registry.total_tools(),
                "registry recovered from backup"
            );
            Ok(LoadedRegistry {
                registry,
                source: LoadSource::Backup,
            })
        }
        (Ok(None), None) => Ok(LoadedRegistry {
            registry: Registry::empty(),
            source: LoadSource::Missing,
        }),
        (Ok(None), Some(primary)) => Err(Error::registry_corrupt(format!(
            "{} ({}); no backup available",
            path.display(),
            primary
        ))),
        (Err(backup_err), None) => {
            tracing::warn!(
                backup = %backup.display(),
                error = %backup_err,
                "ignoring unusable backup; primary registry does not exist yet"
            );
            Ok(LoadedRegistry {
                registry: Registry::empty(),
                source: LoadSource::Missing,
            })
        }
        (Err(backup_err), Some(primary)) => Err(Error::registry_corrupt(format!(
            "{} ({}); backup also unusable ({})",
            path.display(),
            primary,
            backup_err
        ))),
    }
}

// =============================================================================
// Store
// =============================================================================

/// Consistency of the persisted file, as seen by health checks.
#[derive(Debug, Clone, Serialize)]
pub struct PersistedCheck {
    pub path: PathBuf,
    /// File parses and satisfies the registry invariants.
    pub consistent: bool,
    /// Persisted tool list equals the live registry's.
    pub matches_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tools: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
}

/// Holds the live registry snapshot and its on-disk home.
#[derive(Debug)]
pub struct RegistryStore {
    current: ArcSwap<Registry>,
    path: PathBuf,
    known: HashSet<BackendId>,
    /// Serializes writers; readers never take it.
    rebuild_lock: Mutex<()>,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>, known: HashSet<BackendId>) -> Self {
        Self {
            current: ArcSwap::from_pointee(Registry::empty()),
            path: path.into(),
            known,
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Latest successfully built registry.
    pub fn current(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn known_backends(&self) -> &HashSet<BackendId> {
        &self.known
    }

    /// Swap in a registry that has already been validated.
    pub fn replace(&self, registry: Registry) -> Result<Arc<Registry>> {
        registry.check_owners(&self.known)?;
        let registry = Arc::new(registry);
        self.current.store(registry.clone());
        Ok(registry)
    }

    /// Merge the tool lists of every listable connector into a new registry.
    ///
    /// A collision aborts the rebuild and leaves the previous registry live.
    /// A connector whose listing fails is left out of the new registry.
    pub async fn rebuild(&self, connectors: &[Arc<dyn Connector>]) -> Result<Arc<Registry>> {
        let _writer = self.rebuild_lock.lock().await;
        self.rebuild_locked(connectors).await
    }

    /// Rebuild, then persist the new registry.
    ///
    /// A persist failure leaves the new registry live and is returned.
    pub async fn reload(&self, connectors: &[Arc<dyn Connector>]) -> Result<Arc<Registry>> {
        let _writer = self.rebuild_lock.lock().await;
        let registry = self.rebuild_locked(connectors).await?;
        persist(&registry, &self.path)?;
        Ok(registry)
    }

    async fn rebuild_locked(&self, connectors: &[Arc<dyn Connector>]) -> Result<Arc<Registry>> {
        let eligible: Vec<&Arc<dyn Connector>> = connectors
            .iter()
            .filter(|c| c.status().is_listable())
            .collect();

        let listings = join_all(eligible.iter().map(|connector| async move {
            (connector.id().clone(), connector.list_tools().await)
        }))
        .await;

        let mut tools = Vec::new();
        for (backend, listing) in listings {
            match listing {
                Ok(defs) => {
                    tracing::debug!(backend = %backend, tools = defs.len(), "backend listed tools");
                    tools.extend(defs);
                }
                Err(e) => {
                    tracing::warn!(
                        backend = %backend,
                        error = %e,
                        "tool listing failed; backend left out of rebuild"
                    );
                }
            }
        }

        let registry = match Registry::build(tools, Utc::now()) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::error!(error = %e, "registry rebuild aborted; previous registry stays live");
                return Err(e);
            }
        };

        let previous = self.current().total_tools();
        let registry = self.replace(registry)?;
        tracing::info!(
            previous,
            current = registry.total_tools(),
            backends = eligible.len(),
            "registry rebuilt"
        );
        Ok(registry)
    }

    /// Persist the live registry to the configured path.
    pub async fn persist_current(&self) -> Result<()> {
        let _writer = self.rebuild_lock.lock().await;
        persist(&self.current(), &self.path)
    }

    /// Rewrite the primary file from the live registry without backing up
    /// what is there, so a corrupt primary never replaces a good backup.
    pub async fn repair(&self) -> Result<()> {
        let _writer = self.rebuild_lock.lock().await;
        let live = self.current();
        write_atomic(&self.path, live.to_json()?.as_bytes())?;
        tracing::info!(
            path = %self.path.display(),
            total_tools = live.total_tools(),
            "registry file rewritten from live registry"
        );
        Ok(())
    }

    /// Load the persisted registry into the live slot.
    ///
    /// When both the file and its backup are unusable the live registry is
    /// reset to empty and `RegistryCorrupt` is returned.
    pub fn load_from_disk(&self) -> Result<LoadSource> {
        match load(&self.path, &self.known) {
            Ok(LoadedRegistry { registry, source }) => {
                if source == LoadSource::Backup {
                    // Restore the primary without touching the good backup.
                    let restored = registry
                        .to_json()
                        .and_then(|json| write_atomic(&self.path, json.as_bytes()));
                    if let Err(e) = restored {
                        tracing::warn!(error = %e, "could not restore primary registry from backup");
                    }
                }
                tracing::info!(
                    path = %self.path.display(),
                    source = ?source,
                    total_tools = registry.total_tools(),
                    "registry loaded"
                );
                self.current.store(Arc::new(registry));
                Ok(source)
            }
            Err(e) => {
                tracing::error!(error = %e, "registry unrecoverable; starting empty");
                self.current.store(Arc::new(Registry::empty()));
                Err(e)
            }
        }
    }

    /// Check the persisted file against the registry invariants and the live snapshot.
    pub fn check_persisted(&self) -> PersistedCheck {
        let live = self.current();
        match read_registry(&self.path, &self.known) {
            Ok(Some(persisted)) => PersistedCheck {
                path: self.path.clone(),
                consistent: true,
                matches_live: persisted.tools() == live.tools(),
                total_tools: Some(persisted.total_tools()),
                issue: None,
            },
            Ok(None) => PersistedCheck {
                path: self.path.clone(),
                consistent: false,
                matches_live: live.is_empty(),
                total_tools: None,
                issue: Some("registry file missing".to_string()),
            },
            Err(e) => PersistedCheck {
                path: self.path.clone(),
                consistent: false,
                matches_live: false,
                total_tools: None,
                issue: Some(e.to_string()),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{known, tool};
    use crate::registry::ToolDefinition;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample() -> Registry {
        Registry::build(vec![tool("x", "a"), tool("y", "a"), tool("z", "b")], Utc::now()).unwrap()
    }

    #[test]
    fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = sample();

        persist(&registry, &path).unwrap();
        let loaded = load(&path, &known(&["a", "b"])).unwrap();

        assert_eq!(loaded.source, LoadSource::Primary);
        assert_eq!(loaded.registry, registry);
        assert!(!sibling(&path, ".tmp").exists());
    }

    #[test]
    fn test_persist_backs_up_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let first = Registry::build(vec![tool("x", "a")], Utc::now()).unwrap();
        persist(&first, &path).unwrap();
        assert!(!backup_path(&path).exists());

        persist(&sample(), &path).unwrap();
        let backup = fs::read_to_string(backup_path(&path)).unwrap();
        let backed_up = Registry::from_json(&backup, &known(&["a", "b"])).unwrap();
        assert_eq!(backed_up, first);
    }

    #[test]
    fn test_load_corrupt_primary_uses_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = sample();

        persist(&registry, &path).unwrap();
        persist(&registry, &path).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let loaded = load(&path, &known(&["a", "b"])).unwrap();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.registry, registry);
    }

    #[test]
    fn test_load_invariant_violation_uses_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let good = sample();

        fs::write(backup_path(&path), good.to_json().unwrap()).unwrap();
        let orphaned = Registry::build(vec![tool("x", "gone")], Utc::now()).unwrap();
        fs::write(&path, orphaned.to_json().unwrap()).unwrap();

        let loaded = load(&path, &known(&["a", "b"])).unwrap();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.registry, good);
    }

    #[test]
    fn test_load_both_corrupt_is_registry_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "garbage").unwrap();
        fs::write(backup_path(&path), "more garbage").unwrap();

        let err = load(&path, &known(&["a"])).unwrap_err();
        assert!(matches!(err, Error::RegistryCorrupt(_)));
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&dir.path().join("nope.json"), &known(&[])).unwrap();
        assert_eq!(loaded.source, LoadSource::Missing);
        assert!(loaded.registry.is_empty());
    }

    #[test]
    fn test_store_load_from_disk_resets_to_empty_when_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "garbage").unwrap();

        let store = RegistryStore::new(&path, known(&["a", "b"]));
        store.replace(sample()).unwrap();

        let err = store.load_from_disk().unwrap_err();
        assert!(matches!(err, Error::RegistryCorrupt(_)));
        assert!(store.current().is_empty());
    }

    #[test]
    fn test_store_load_from_backup_restores_primary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = sample();
        fs::write(backup_path(&path), registry.to_json().unwrap()).unwrap();
        fs::write(&path, "garbage").unwrap();

        let store = RegistryStore::new(&path, known(&["a", "b"]));
        assert_eq!(store.load_from_disk().unwrap(), LoadSource::Backup);
        assert_eq!(*store.current(), registry);

        let check = store.check_persisted();
        assert!(check.consistent);
        assert!(check.matches_live);
    }

    #[test]
    fn test_check_persisted_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let store = RegistryStore::new(&path, known(&["a", "b"]));

        let missing = store.check_persisted();
        assert!(!missing.consistent);
        assert_eq!(missing.issue.as_deref(), Some("registry file missing"));

        fs::write(&path, "garbage").unwrap();
        let corrupt = store.check_persisted();
        assert!(!corrupt.consistent);
        assert!(corrupt.issue.unwrap().contains("unparseable"));
    }

    #[tokio::test]
    async fn test_repair_keeps_good_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = sample();
        fs::write(backup_path(&path), registry.to_json().unwrap()).unwrap();
        fs::write(&path, "garbage").unwrap();

        let store = RegistryStore::new(&path, known(&["a", "b"]));
        store.replace(registry.clone()).unwrap();
        store.repair().await.unwrap();

        assert!(store.check_persisted().matches_live);
        let backup = fs::read_to_string(backup_path(&path)).unwrap();
        assert_eq!(Registry::from_json(&backup, &known(&["a", "b"])).unwrap(), registry);
    }

    #[test]
    fn test_replace_rejects_unknown_owner() {
        let store = RegistryStore::new("unused.json", known(&["a"]));
        let registry = Registry::build(vec![tool("x", "b")], Utc::now()).unwrap();
        assert!(store.replace(registry).is_err());
        assert!(store.current().is_empty());
    }

    fn arb_tools() -> impl Strategy<Value = Vec<ToolDefinition>> {
        prop::collection::btree_map("[a-z_]{1,12}", (0usize..2, "\\PC{0,24}"), 0..8).prop_map(
            |entries| {
                entries
                    .into_iter()
                    .map(|(name, (owner, description))| {
                        let mut def = tool(&name, ["a", "b"][owner]);
                        def.description = description;
                        def
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_persist_load_round_trip(tools in arb_tools()) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("registry.json");
            let registry = Registry::build(tools, Utc::now()).unwrap();

            persist(&registry, &path).unwrap();
            let loaded = load(&path, &known(&["a", "b"])).unwrap();

            prop_assert_eq!(loaded.source, LoadSource::Primary);
            prop_assert_eq!(loaded.registry, registry);
        }
    }
}
