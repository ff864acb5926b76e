// # File Object Store
//
// File-based implementation of ObjectStore with crash recovery.
//
// ## Purpose
//
// Keeps `ManagedUser` objects across daemon restarts for standalone
// deployments that have no external object store.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good file
// - Recovery: Falls back to backup if corruption detected
//
// ## Owner Edits
//
// The file is the owner's interface: users are added, changed or marked for
// deletion by editing it while the daemon runs. Every read and write first
// compares the file's modification time and length with those recorded at
// the last load or write, and re-reads the file when they differ. A spec
// change picked up this way bumps the generation. An edit that does not
// parse is ignored (with a warning) until it is fixed.
//
// Writes are last-write-wins: an edit landing between the re-read and the
// write-through of the same call is overwritten.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "objects": [
//     {
//       "apiVersion": "kcp.cogniteo.io/v1alpha1",
//       "kind": "User",
//       "metadata": { "name": "alice", "namespace": "default", "cluster": "root" },
//       "spec": { "email": "a@x.com", "enabled": true },
//       "status": {}
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::ObjectStoreConfig;
use crate::model::{ManagedUser, ObjectRef};
use crate::traits::object_store::{ObjectStore, ObjectStoreFactory};

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

/// File-based object store with crash recovery
///
/// Every mutation is written through to disk before the call returns, so a
/// successful `update` or `update_status` is durable.
///
/// # Example
///
/// ```rust,no_run
/// use usersync_core::model::ObjectRef;
/// use usersync_core::store::FileObjectStore;
/// use usersync_core::traits::ObjectStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileObjectStore::new("/var/lib/usersync/users.json").await?;
///     let user = store.get(&ObjectRef::new("root", "default", "alice")).await?;
///     println!("{:?}", user);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileObjectStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    objects: HashMap<ObjectRef, ManagedUser>,
    last_version: u64,
    dirty: bool,
    /// Fingerprint of the file as last loaded or written
    stamp: Option<FileStamp>,
}

/// Cheap change detection for the store file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    objects: Vec<ManagedUser>,
}

impl FileObjectStore {
    /// Create or load a file object store
    ///
    /// This will:
    /// 1. Try to load the existing store file
    /// 2. If corruption is detected, try to load from backup
    /// 3. If both fail, start with an empty store
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let objects = Self::load_with_recovery(&path).await?;
        let last_version = max_version(&objects);
        let stamp = Self::stamp(&path).await;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                objects,
                last_version,
                dirty: false,
                stamp,
            })),
        })
    }

    /// Insert or replace an object as its owner would
    pub async fn insert(&self, mut user: ManagedUser) -> Result<ManagedUser, Error> {
        self.refresh().await?;
        {
            let mut guard = self.state.write().await;
            guard.last_version += 1;
            user.metadata.resource_version = guard.last_version;
            if user.metadata.generation == 0 {
                user.metadata.generation = 1;
            }
            guard.objects.insert(user.object_ref(), user.clone());
            guard.dirty = true;
        }

        self.write_state().await?;
        Ok(user)
    }

    /// Load objects with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load the main file
    /// 2. If it fails to parse, try the backup
    /// 3. If the backup also fails, start empty
    async fn load_with_recovery(path: &Path) -> Result<HashMap<ObjectRef, ManagedUser>, Error> {
        match Self::load(path).await {
            Ok(objects) => {
                tracing::debug!("Loaded {} object(s) from {}", objects.len(), path.display());
                Ok(objects)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with an empty store.");
                    return Ok(HashMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(objects) => {
                        tracing::info!("Recovered {} object(s) from backup", objects.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(objects)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with an empty store.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn stamp(path: &Path) -> Option<FileStamp> {
        let metadata = fs::metadata(path).await.ok()?;
        Some(FileStamp {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    /// Re-read the file if it changed on disk since the last load or write
    async fn refresh(&self) -> Result<(), Error> {
        // A missing file is recreated by the next write
        let Some(current) = Self::stamp(&self.path).await else {
            return Ok(());
        };
        if self.state.read().await.stamp == Some(current) {
            return Ok(());
        }

        let mut guard = self.state.write().await;
        if guard.stamp == Some(current) {
            return Ok(());
        }

        match Self::load(&self.path).await {
            Ok(loaded) => {
                let objects = merge_external(&guard.objects, loaded);
                guard.last_version = guard.last_version.max(max_version(&objects));
                tracing::debug!(
                    "Store file {} changed on disk, reloaded {} object(s)",
                    self.path.display(),
                    objects.len()
                );
                guard.objects = objects;
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file {} changed on disk but does not parse, keeping the loaded objects: {}",
                    self.path.display(),
                    e
                );
            }
            Err(e) => return Err(e),
        }
        guard.stamp = Some(current);
        Ok(())
    }

    async fn load(path: &Path) -> Result<HashMap<ObjectRef, ManagedUser>, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::object_store(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content)?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file
            .objects
            .into_iter()
            .map(|u| (u.object_ref(), u))
            .collect())
    }

    /// Write the store to disk atomically
    async fn write_state(&self) -> Result<(), Error> {
        let guard = self.state.read().await;

        let mut objects: Vec<ManagedUser> = guard.objects.values().cloned().collect();
        objects.sort_by_key(|u| u.object_ref());
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            objects,
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::object_store(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut tmp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::object_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            tmp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::object_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            tmp.flush().await.map_err(|e| {
                Error::object_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::object_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        drop(guard);
        let stamp = Self::stamp(&self.path).await;
        let mut guard = self.state.write().await;
        guard.dirty = false;
        guard.stamp = stamp;

        tracing::trace!("Store written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

fn max_version(objects: &HashMap<ObjectRef, ManagedUser>) -> u64 {
    objects
        .values()
        .map(|u| u.metadata.resource_version)
        .max()
        .unwrap_or(0)
}

/// Fold a fresh read of the file into the cached objects
///
/// Owners edit the spec without touching the generation, so a spec that
/// differs from the cached one gets a bumped generation here. Objects the
/// owner marked for deletion with no finalizers left are dropped.
fn merge_external(
    cached: &HashMap<ObjectRef, ManagedUser>,
    loaded: HashMap<ObjectRef, ManagedUser>,
) -> HashMap<ObjectRef, ManagedUser> {
    loaded
        .into_iter()
        .filter(|(_, user)| !super::is_collectable(user))
        .map(|(object_ref, mut user)| {
            match cached.get(&object_ref) {
                Some(previous)
                    if previous.spec != user.spec
                        && user.metadata.generation <= previous.metadata.generation =>
                {
                    user.metadata.generation = previous.metadata.generation + 1;
                }
                None if user.metadata.generation == 0 => user.metadata.generation = 1,
                _ => {}
            }
            (object_ref, user)
        })
        .collect()
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn get(&self, object_ref: &ObjectRef) -> Result<Option<ManagedUser>, Error> {
        self.refresh().await?;
        let guard = self.state.read().await;
        Ok(guard.objects.get(object_ref).cloned())
    }

    async fn update(&self, user: &ManagedUser) -> Result<ManagedUser, Error> {
        self.refresh().await?;
        let object_ref = user.object_ref();
        let next = {
            let mut guard = self.state.write().await;
            let stored = guard
                .objects
                .get(&object_ref)
                .ok_or_else(|| Error::not_found(format!("object {}", object_ref)))?;
            let next = super::apply_update(stored, user, guard.last_version + 1);
            guard.last_version += 1;

            if super::is_collectable(&next) {
                guard.objects.remove(&object_ref);
            } else {
                guard.objects.insert(object_ref, next.clone());
            }
            guard.dirty = true;
            next
        };

        self.write_state().await?;
        Ok(next)
    }

    async fn update_status(&self, user: &ManagedUser) -> Result<ManagedUser, Error> {
        self.refresh().await?;
        let object_ref = user.object_ref();
        let next = {
            let mut guard = self.state.write().await;
            let stored = guard
                .objects
                .get(&object_ref)
                .ok_or_else(|| Error::not_found(format!("object {}", object_ref)))?;
            let next = super::apply_status(stored, user, guard.last_version + 1);
            guard.last_version += 1;
            guard.objects.insert(object_ref, next.clone());
            guard.dirty = true;
            next
        };

        self.write_state().await?;
        Ok(next)
    }

    async fn list(&self, cluster: Option<&str>) -> Result<Vec<ObjectRef>, Error> {
        self.refresh().await?;
        let guard = self.state.read().await;
        let mut refs: Vec<ObjectRef> = guard
            .objects
            .keys()
            .filter(|r| cluster.is_none_or(|c| r.cluster == c))
            .cloned()
            .collect();
        refs.sort();
        Ok(refs)
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write_state().await } else { Ok(()) }
    }
}

/// Factory for creating file object stores
pub struct FileObjectStoreFactory;

#[async_trait]
impl ObjectStoreFactory for FileObjectStoreFactory {
    async fn create(&self, config: &ObjectStoreConfig) -> Result<Box<dyn ObjectStore>, Error> {
        match config {
            ObjectStoreConfig::File { path } => Ok(Box::new(FileObjectStore::new(path).await?)),
            _ => Err(Error::config("Invalid config for file object store")),
        }
    }
}
