//! User store: one identity record per username.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use facegate_vision::signature::SignatureLengthError;
use facegate_vision::{ContentHash, Signature};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

const RECORD_FILE: &str = "record.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub username: String,
    /// Raw stored values; validated into a [`Signature`] when read.
    pub signature: Option<Vec<f32>>,
    pub content_hash: Option<ContentHash>,
    pub face_id: Option<String>,
    pub has_face: bool,
    pub created_at: DateTime<Utc>,
    /// Last face bind or removal.
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            username: username.into(),
            signature: None,
            content_hash: None,
            face_id: None,
            has_face: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_face(username: impl Into<String>, signature: &Signature) -> Self {
        let mut record = Self::new(username);
        record.bind_face(signature);
        record
    }

    /// `None` without a face, `Some(Err)` when the stored values are not a
    /// valid signature.
    pub fn signature(&self) -> Option<Result<Signature, SignatureLengthError>> {
        self.signature.clone().map(Signature::try_from)
    }

    fn bind_face(&mut self, signature: &Signature) {
        self.signature = Some(signature.to_vec());
        self.content_hash = Some(signature.content_hash());
        self.has_face = true;
        if self.face_id.is_none() {
            self.face_id = Some(new_face_id());
        }
        self.updated_at = Utc::now();
    }

    fn clear_face(&mut self) {
        self.signature = None;
        self.content_hash = None;
        self.face_id = None;
        self.has_face = false;
        self.updated_at = Utc::now();
    }
}

fn new_face_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("face_{}", &id[..8])
}

/// Field changes applied by [`UserStore::update`].
#[derive(Debug, Clone)]
pub enum RecordUpdate {
    BindFace(Signature),
    ClearFace,
}

/// Which fields `scan_all` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFields {
    WithSignatures,
    /// Everything except the signature values.
    Summary,
}

#[derive(Debug, Error)]
#[error("user {0} already exists")]
pub struct DuplicateKey(pub String);

pub trait UserStore {
    fn exists(&self, username: &str) -> Result<bool> {
        Ok(self.get(username)?.is_some())
    }

    fn get(&self, username: &str) -> Result<Option<IdentityRecord>>;

    /// Insert a new record; fails with [`DuplicateKey`] if the name is taken.
    fn put(&self, record: IdentityRecord) -> Result<()>;

    /// Returns false when no such user exists.
    fn update(&self, username: &str, update: RecordUpdate) -> Result<bool>;

    fn delete(&self, username: &str) -> Result<bool>;

    fn scan_all(&self, fields: ScanFields) -> Result<Vec<IdentityRecord>>;
}

fn apply(record: &mut IdentityRecord, update: &RecordUpdate) {
    match update {
        RecordUpdate::BindFace(sig) => record.bind_face(sig),
        RecordUpdate::ClearFace => record.clear_face(),
    }
}

fn project(mut record: IdentityRecord, fields: ScanFields) -> IdentityRecord {
    if fields == ScanFields::Summary {
        record.signature = None;
    }
    record
}

/// In-memory store; scans return records in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<IdentityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Vec<IdentityRecord>) -> T) -> T {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut records)
    }
}

impl UserStore for MemoryStore {
    fn get(&self, username: &str) -> Result<Option<IdentityRecord>> {
        Ok(self.with_records(|r| r.iter().find(|rec| rec.username == username).cloned()))
    }

    fn put(&self, record: IdentityRecord) -> Result<()> {
        self.with_records(|r| {
            if r.iter().any(|rec| rec.username == record.username) {
                return Err(DuplicateKey(record.username).into());
            }
            r.push(record);
            Ok(())
        })
    }

    fn update(&self, username: &str, update: RecordUpdate) -> Result<bool> {
        Ok(self.with_records(|r| match r.iter_mut().find(|rec| rec.username == username) {
            Some(rec) => {
                apply(rec, &update);
                true
            }
            None => false,
        }))
    }

    fn delete(&self, username: &str) -> Result<bool> {
        Ok(self.with_records(|r| {
            let before = r.len();
            r.retain(|rec| rec.username != username);
            r.len() != before
        }))
    }

    fn scan_all(&self, fields: ScanFields) -> Result<Vec<IdentityRecord>> {
        Ok(self.with_records(|r| r.iter().cloned().map(|rec| project(rec, fields)).collect()))
    }
}

/// One postcard-encoded record per user under `<root>/<username>/record.bin`.
/// Scans return records sorted by username.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, username: &str) -> Result<PathBuf> {
        if username.is_empty()
            || username == "."
            || username == ".."
            || username.contains(['/', '\\', '\0'])
        {
            anyhow::bail!("username {username:?} cannot be stored");
        }
        Ok(self.root.join(username))
    }

    fn read(file: &Path) -> Result<IdentityRecord> {
        let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        postcard::from_bytes(&data).with_context(|| format!("decoding {}", file.display()))
    }

    fn write(&self, record: &IdentityRecord) -> Result<()> {
        let dir = self.user_dir(&record.username)?;
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let file = dir.join(RECORD_FILE);
        let data = postcard::to_allocvec(record)?;
        std::fs::write(&file, data).with_context(|| format!("writing {}", file.display()))?;
        Ok(())
    }
}

impl UserStore for FileStore {
    fn get(&self, username: &str) -> Result<Option<IdentityRecord>> {
        let file = self.user_dir(username)?.join(RECORD_FILE);
        if !file.exists() {
            return Ok(None);
        }
        Self::read(&file).map(Some)
    }

    fn put(&self, record: IdentityRecord) -> Result<()> {
        if self.exists(&record.username)? {
            return Err(DuplicateKey(record.username).into());
        }
        self.write(&record)
    }

    fn update(&self, username: &str, update: RecordUpdate) -> Result<bool> {
        let Some(mut record) = self.get(username)? else {
            return Ok(false);
        };
        apply(&mut record, &update);
        self.write(&record)?;
        Ok(true)
    }

    fn delete(&self, username: &str) -> Result<bool> {
        let dir = self.user_dir(username)?;
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
        Ok(true)
    }

    fn scan_all(&self, fields: ScanFields) -> Result<Vec<IdentityRecord>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path().join(RECORD_FILE))
            .filter(|file| file.is_file())
            .collect();
        files.sort();

        let mut records = Vec::with_capacity(files.len());
        for file in files {
            match Self::read(&file) {
                Ok(record) => records.push(project(record, fields)),
                Err(e) => log::warn!("skipping unreadable record: {e:#}"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_vision::SIGNATURE_LEN;

    fn sig(v: f32) -> Signature {
        Signature::try_from(vec![v; SIGNATURE_LEN]).unwrap()
    }

    fn exercise(store: &dyn UserStore) -> Result<()> {
        assert!(!store.exists("alice")?);
        store.put(IdentityRecord::with_face("alice", &sig(1.0)))?;
        store.put(IdentityRecord::new("bob"))?;

        let dup = store.put(IdentityRecord::new("alice")).unwrap_err();
        assert!(dup.downcast_ref::<DuplicateKey>().is_some());

        let alice = store.get("alice")?.unwrap();
        assert!(alice.has_face);
        assert_eq!(alice.content_hash, Some(sig(1.0).content_hash()));
        let face_id = alice.face_id.clone().unwrap();
        assert!(face_id.starts_with("face_") && face_id.len() == 13);

        assert!(store.update("alice", RecordUpdate::BindFace(sig(2.0)))?);
        let alice = store.get("alice")?.unwrap();
        assert_eq!(alice.signature().unwrap()?, sig(2.0));
        assert_eq!(alice.face_id.as_deref(), Some(face_id.as_str()));
        assert!(!store.update("carol", RecordUpdate::ClearFace)?);

        let summary = store.scan_all(ScanFields::Summary)?;
        assert_eq!(summary.len(), 2);
        assert!(summary.iter().all(|r| r.signature.is_none()));
        assert!(summary.iter().any(|r| r.username == "alice" && r.has_face));

        assert!(store.update("alice", RecordUpdate::ClearFace)?);
        assert!(!store.get("alice")?.unwrap().has_face);

        assert!(store.delete("bob")?);
        assert!(!store.delete("bob")?);
        assert_eq!(store.scan_all(ScanFields::WithSignatures)?.len(), 1);
        Ok(())
    }

    #[test]
    fn memory_store_contract() -> Result<()> {
        exercise(&MemoryStore::new())
    }

    #[test]
    fn file_store_contract() -> Result<()> {
        let dir = tempfile::tempdir()?;
        exercise(&FileStore::new(dir.path()))
    }

    #[test]
    fn timestamps_track_face_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path());
        let record = IdentityRecord::new("dana");
        assert_eq!(record.created_at, record.updated_at);
        store.put(record.clone())?;

        let stored = store.get("dana")?.unwrap();
        assert_eq!(stored.created_at, record.created_at);

        store.update("dana", RecordUpdate::BindFace(sig(7.0)))?;
        let bound = store.get("dana")?.unwrap();
        assert_eq!(bound.created_at, record.created_at);
        assert!(bound.updated_at >= record.updated_at);

        store.update("dana", RecordUpdate::ClearFace)?;
        let cleared = store.get("dana")?.unwrap();
        assert!(cleared.updated_at >= bound.updated_at);
        assert_eq!(cleared.created_at, record.created_at);
        Ok(())
    }

    #[test]
    fn memory_scan_keeps_insertion_order() -> Result<()> {
        let store = MemoryStore::new();
        for name in ["zed", "amy", "kim"] {
            store.put(IdentityRecord::new(name))?;
        }
        let names: Vec<_> = store
            .scan_all(ScanFields::Summary)?
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(names, ["zed", "amy", "kim"]);
        Ok(())
    }

    #[test]
    fn file_scan_skips_corrupt_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path());
        store.put(IdentityRecord::with_face("bob", &sig(3.0)))?;
        store.put(IdentityRecord::new("amy"))?;
        std::fs::create_dir_all(dir.path().join("broken"))?;
        std::fs::write(dir.path().join("broken").join(RECORD_FILE), [0xff, 0xff, 0xff])?;

        let names: Vec<_> = store
            .scan_all(ScanFields::WithSignatures)?
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(names, ["amy", "bob"]);
        Ok(())
    }

    #[test]
    fn file_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get("../etc").is_err());
        assert!(store.put(IdentityRecord::new("a/b")).is_err());
    }

    #[test]
    fn invalid_stored_signature_is_reported() {
        let mut record = IdentityRecord::new("eve");
        record.signature = Some(vec![1.0; 10]);
        assert!(matches!(record.signature(), Some(Err(_))));
        assert!(IdentityRecord::new("x").signature().is_none());
    }
}
