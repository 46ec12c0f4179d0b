//! Persistent, deduplicating sample cache.
//!
//! A [`SampleDatabase`] maps canonical parameter hashes to stored samples. Every
//! parameter set is evaluated at most once: a lookup either returns the stored
//! sample or blocks on the generator and records the result before returning.
//!
//! On disk the database is one JSON index plus one JSON payload per sample:
//!
//! ```text
//! <index>            {"format_version":1,"origin":"pipeline","records":{<hash>:{...}}}
//! <index>.lock       advisory lock held while a handle is open
//! <sample_dir>/<name>.json
//!                    {"format_version":1,"kind":"map_matcher","sample":{...}}
//! ```
//!
//! Payloads are written before the index, and both are replaced via a
//! temporary file and a rename, so an interrupted write leaves the index as it
//! was.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::canonical::{ParamHash, canonical_hash};
use crate::error::{Result, StorageError};
use crate::generator::SampleGenerator;
use crate::params::{ParamSet, ParamValue, display_params};
use crate::sample::{Sample, SampleOrigin};

/// Current on-disk format version of index and payload files.
pub const FORMAT_VERSION: u32 = 1;

/// Index entry for one stored sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// File stem of the payload inside the sample directory.
    pub sample_name: String,
    /// Full parameter set the sample was generated with.
    pub parameters: ParamSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    origin: SampleOrigin,
    #[serde(default)]
    records: BTreeMap<ParamHash, CacheRecord>,
}

#[derive(Serialize)]
struct PayloadOut<'a, S> {
    format_version: u32,
    kind: &'a str,
    sample: &'a S,
}

#[derive(Deserialize)]
struct PayloadIn {
    format_version: u32,
    kind: String,
    sample: serde_json::Value,
}

/// Result of [`SampleDatabase::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Number of index records inspected.
    pub checked: usize,
    /// Records whose stored parameters do not hash to their key.
    pub mismatched: Vec<ParamHash>,
    /// Records whose payload file is gone.
    pub missing_payloads: Vec<ParamHash>,
    /// Payload files no record refers to.
    pub orphan_payloads: Vec<PathBuf>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.missing_payloads.is_empty() && self.orphan_payloads.is_empty()
    }
}

/// Persistent sample cache in front of a [`SampleGenerator`].
///
/// Holds an exclusive lock on `<index>.lock` for its whole lifetime, so only
/// one process works on a database at a time.
pub struct SampleDatabase<S: Sample, G: SampleGenerator<S>> {
    index_path: PathBuf,
    sample_dir: PathBuf,
    generator: G,
    index: IndexFile,
    _lock_file: File,
    _sample: PhantomData<fn() -> S>,
}

impl<S: Sample, G: SampleGenerator<S>> std::fmt::Debug for SampleDatabase<S, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleDatabase")
            .field("index_path", &self.index_path)
            .field("sample_dir", &self.sample_dir)
            .field("origin", &self.index.origin)
            .field("records", &self.index.records.len())
            .finish_non_exhaustive()
    }
}

impl<S: Sample, G: SampleGenerator<S>> SampleDatabase<S, G> {
    /// Open the database at `index_path`, creating an empty one if missing.
    ///
    /// `sample_dir` must already exist. A new index records the generator's
    /// origin; an existing index created for another origin is refused.
    pub fn open(index_path: impl AsRef<Path>, sample_dir: impl AsRef<Path>, generator: G) -> Result<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        let sample_dir = sample_dir.as_ref().to_path_buf();

        if index_path.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "database index {} is a directory",
                index_path.display()
            ))
            .into());
        }
        if !sample_dir.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "sample directory {} is not a directory",
                sample_dir.display()
            ))
            .into());
        }
        if let Some(parent) = index_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(StorageError::InvalidPath(format!(
                    "parent of database index {} does not exist",
                    index_path.display()
                ))
                .into());
            }
        }

        let lock_file = acquire_lock(&index_path)?;
        let requested = generator.origin();

        let index = if index_path.exists() {
            let index = load_index(&index_path)?;
            if index.origin != requested {
                return Err(StorageError::OriginMismatch {
                    database: index.origin.to_string(),
                    requested: requested.to_string(),
                }
                .into());
            }
            info!(
                index = %index_path.display(),
                samples = index.records.len(),
                "Loaded sample database"
            );
            index
        } else {
            let index = IndexFile {
                format_version: FORMAT_VERSION,
                origin: requested,
                records: BTreeMap::new(),
            };
            save_index(&index_path, &index)?;
            info!(
                index = %index_path.display(),
                origin = %requested,
                "Initialized new sample database"
            );
            index
        };

        Ok(Self {
            index_path,
            sample_dir,
            generator,
            index,
            _lock_file: lock_file,
            _sample: PhantomData,
        })
    }

    #[must_use]
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    #[must_use]
    pub fn sample_dir(&self) -> &Path {
        &self.sample_dir
    }

    /// Origin of every sample in this database.
    #[must_use]
    pub fn origin(&self) -> SampleOrigin {
        self.index.origin
    }

    #[must_use]
    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn generator_mut(&mut self) -> &mut G {
        &mut self.generator
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.records.is_empty()
    }

    /// Whether a sample for `params` is recorded.
    #[must_use]
    pub fn exists(&self, params: &ParamSet) -> bool {
        self.index.records.contains_key(&canonical_hash(params))
    }

    #[must_use]
    pub fn contains_hash(&self, hash: &ParamHash) -> bool {
        self.index.records.contains_key(hash)
    }

    #[must_use]
    pub fn record(&self, hash: &ParamHash) -> Option<&CacheRecord> {
        self.index.records.get(hash)
    }

    /// Index records in hash order, without touching payloads.
    pub fn records(&self) -> impl Iterator<Item = (&ParamHash, &CacheRecord)> + '_ {
        self.index.records.iter()
    }

    /// Return the sample for `params`, generating and recording it if needed.
    ///
    /// Generation blocks for as long as the generator takes.
    pub fn lookup_or_generate(&mut self, params: &ParamSet) -> Result<S> {
        if let Some(sample) = self.get(params)? {
            return Ok(sample);
        }

        let hash = canonical_hash(params);
        info!(
            hash = %hash,
            params = %display_params(params),
            "No sample in database, forwarding request to generator"
        );
        let mut sample = self.generator.generate(params)?;
        info!(hash = %hash, "Sample generation finished");
        self.add_sample(&mut sample, params, false)?;
        Ok(sample)
    }

    /// Return the stored sample for `params` without generating.
    ///
    /// Fails with a hash collision if the record filed under the hash of
    /// `params` holds a different parameter set.
    pub fn get(&self, params: &ParamSet) -> Result<Option<S>> {
        let hash = canonical_hash(params);
        let Some(record) = self.index.records.get(&hash) else {
            return Ok(None);
        };
        if &record.parameters != params {
            return Err(StorageError::HashCollision {
                hash: hash.to_string(),
                requested: display_params(params),
                stored: display_params(&record.parameters),
            }
            .into());
        }
        debug!(hash = %hash, sample = %record.sample_name, "Retrieving sample from database");
        self.read_payload(&record.sample_name).map(Some)
    }

    /// Return the stored sample filed under `hash`.
    pub fn get_by_hash(&self, hash: &ParamHash) -> Result<S> {
        let record = self
            .index
            .records
            .get(hash)
            .ok_or_else(|| StorageError::NotFound(hash.to_string()))?;
        self.read_payload(&record.sample_name)
    }

    /// Store `sample` as the result for `params`.
    ///
    /// A sample without a name is named after the parameter hash. Without
    /// `override_existing`, an existing record for the hash or an existing
    /// payload file of the same name is an error. The payload is written before
    /// the index; a replaced payload is only removed once the index no longer
    /// names it.
    pub fn add_sample(&mut self, sample: &mut S, params: &ParamSet, override_existing: bool) -> Result<ParamHash> {
        if sample.origin() != self.index.origin {
            return Err(StorageError::OriginMismatch {
                database: self.index.origin.to_string(),
                requested: sample.origin().to_string(),
            }
            .into());
        }

        let hash = canonical_hash(params);
        let previous = self.index.records.get(&hash).cloned();
        if let (Some(existing), false) = (&previous, override_existing) {
            return Err(StorageError::DuplicateKey {
                hash: hash.to_string(),
                existing_name: existing.sample_name.clone(),
            }
            .into());
        }

        let name = match sample.name() {
            Some(name) => name.to_string(),
            None => {
                warn!(hash = %hash, "Sample has no name, naming it after its parameter hash");
                sample.set_name(hash.to_string());
                hash.to_string()
            }
        };
        validate_name(&name)?;

        let path = self.payload_path(&name);
        if path.exists() && !override_existing {
            return Err(StorageError::PayloadExists {
                path: path.display().to_string(),
            }
            .into());
        }
        self.write_payload(&path, sample)?;

        self.index.records.insert(
            hash.clone(),
            CacheRecord {
                sample_name: name.clone(),
                parameters: params.clone(),
            },
        );
        if let Err(err) = self.save() {
            match &previous {
                Some(old) => self.index.records.insert(hash, old.clone()),
                None => self.index.records.remove(&hash),
            };
            return Err(err);
        }

        if let Some(old) = previous.filter(|old| old.sample_name != name) {
            self.discard_payload(&old.sample_name);
        }
        info!(hash = %hash, sample = %name, "Registered sample in database");
        Ok(hash)
    }

    /// Remove the record filed under `hash` and its payload.
    ///
    /// A payload that is already gone is only logged. The index is saved last.
    pub fn remove_sample(&mut self, hash: &ParamHash) -> Result<CacheRecord> {
        let record = self
            .index
            .records
            .get(hash)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(hash.to_string()))?;

        let path = self.payload_path(&record.sample_name);
        match fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "Removed sample payload"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Sample payload already missing");
            }
            Err(err) => return Err(err.into()),
        }

        self.index.records.remove(hash);
        if let Err(err) = self.save() {
            self.index.records.insert(hash.clone(), record);
            return Err(err);
        }
        info!(hash = %hash, "Removed sample record");
        Ok(record)
    }

    /// Replace the sample filed under `old_hash` with `sample`.
    ///
    /// The record is re-keyed under the hash of the sample's current
    /// parameters and keeps its payload name.
    pub fn update_sample(&mut self, old_hash: &ParamHash, mut sample: S) -> Result<ParamHash> {
        let old = self
            .index
            .records
            .get(old_hash)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(old_hash.to_string()))?;
        if sample.origin() != self.index.origin {
            return Err(StorageError::OriginMismatch {
                database: self.index.origin.to_string(),
                requested: sample.origin().to_string(),
            }
            .into());
        }

        let params = sample.parameters().clone();
        let new_hash = canonical_hash(&params);
        if &new_hash != old_hash {
            if let Some(existing) = self.index.records.get(&new_hash) {
                return Err(StorageError::DuplicateKey {
                    hash: new_hash.to_string(),
                    existing_name: existing.sample_name.clone(),
                }
                .into());
            }
        }

        sample.set_name(old.sample_name.clone());
        let path = self.payload_path(&old.sample_name);
        self.write_payload(&path, &sample)?;

        self.index.records.remove(old_hash);
        self.index.records.insert(
            new_hash.clone(),
            CacheRecord {
                sample_name: old.sample_name.clone(),
                parameters: params,
            },
        );
        if let Err(err) = self.save() {
            self.index.records.remove(&new_hash);
            self.index.records.insert(old_hash.clone(), old);
            return Err(err);
        }
        debug!(old = %old_hash, new = %new_hash, "Updated sample record");
        Ok(new_hash)
    }

    /// Add a newly introduced parameter to every stored sample lacking it.
    ///
    /// `value` should reproduce the behavior from before the parameter existed.
    /// If some stored sample already carries the parameter, `value` is cast to
    /// that sample's numeric kind first. Returns the number of patched samples.
    ///
    /// Every patched set is checked against the existing records before any
    /// file is written, and the index is saved once at the end.
    pub fn add_parameter(&mut self, name: &str, value: ParamValue) -> Result<usize> {
        let value = self
            .index
            .records
            .values()
            .find_map(|r| r.parameters.get(name))
            .map_or_else(|| value.clone(), |template| value.cast_like(template));

        let pending: Vec<(ParamHash, CacheRecord)> = self
            .index
            .records
            .iter()
            .filter(|(_, r)| !r.parameters.contains_key(name))
            .map(|(h, r)| (h.clone(), r.clone()))
            .collect();

        let mut patched = Vec::with_capacity(pending.len());
        for (hash, record) in pending {
            let mut params = record.parameters.clone();
            params.insert(name.to_string(), value.clone());
            let new_hash = canonical_hash(&params);
            if let Some(existing) = self.index.records.get(&new_hash) {
                return Err(StorageError::DuplicateKey {
                    hash: new_hash.to_string(),
                    existing_name: existing.sample_name.clone(),
                }
                .into());
            }
            let mut sample: S = self.read_payload(&record.sample_name)?;
            sample.set_name(record.sample_name.clone());
            *sample.parameters_mut() = params.clone();
            let record = CacheRecord {
                sample_name: record.sample_name,
                parameters: params,
            };
            patched.push((hash, new_hash, sample, record));
        }

        for (_, _, sample, record) in &patched {
            self.write_payload(&self.payload_path(&record.sample_name), sample)?;
        }

        let before = self.index.records.clone();
        let count = patched.len();
        for (old_hash, new_hash, _, record) in patched {
            self.index.records.remove(&old_hash);
            self.index.records.insert(new_hash, record);
        }
        if let Err(err) = self.save() {
            self.index.records = before;
            return Err(err);
        }

        info!(
            param = name,
            value = %value,
            patched = count,
            "Added parameter to stored samples"
        );
        Ok(count)
    }

    /// Lazily read every stored sample from disk.
    ///
    /// Each call starts a fresh pass; samples are not cached in memory.
    pub fn iter(&self) -> SampleIter<'_, S> {
        SampleIter {
            records: self.index.records.values(),
            sample_dir: &self.sample_dir,
            _sample: PhantomData,
        }
    }

    /// Check the index against its payloads.
    pub fn verify(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport {
            checked: self.index.records.len(),
            ..IntegrityReport::default()
        };

        for (hash, record) in &self.index.records {
            if &canonical_hash(&record.parameters) != hash {
                report.mismatched.push(hash.clone());
            }
            if !self.payload_path(&record.sample_name).is_file() {
                report.missing_payloads.push(hash.clone());
            }
        }

        let known: std::collections::HashSet<&str> = self
            .index
            .records
            .values()
            .map(|r| r.sample_name.as_str())
            .collect();
        let index_canonical = fs::canonicalize(&self.index_path).ok();
        for entry in fs::read_dir(&self.sample_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if index_canonical.is_some() && fs::canonicalize(&path).ok() == index_canonical {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if !known.contains(stem) {
                report.orphan_payloads.push(path);
            }
        }
        report.orphan_payloads.sort();

        if report.is_clean() {
            debug!(checked = report.checked, "Database integrity check passed");
        } else {
            warn!(
                mismatched = report.mismatched.len(),
                missing = report.missing_payloads.len(),
                orphans = report.orphan_payloads.len(),
                "Database integrity check found problems"
            );
        }
        Ok(report)
    }

    fn payload_path(&self, name: &str) -> PathBuf {
        payload_path(&self.sample_dir, name)
    }

    fn read_payload(&self, name: &str) -> Result<S> {
        read_payload(&self.sample_dir, name)
    }

    fn write_payload(&self, path: &Path, sample: &S) -> Result<()> {
        let envelope = PayloadOut {
            format_version: FORMAT_VERSION,
            kind: S::KIND,
            sample,
        };
        let content = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(path, &content)?;
        debug!(path = %path.display(), "Wrote sample payload");
        Ok(())
    }

    fn discard_payload(&self, name: &str) {
        let path = self.payload_path(name);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "Failed to remove replaced payload");
            }
        }
    }

    fn save(&self) -> Result<()> {
        save_index(&self.index_path, &self.index)
    }
}

/// Lazy pass over the stored samples of a [`SampleDatabase`].
pub struct SampleIter<'a, S> {
    records: btree_map::Values<'a, ParamHash, CacheRecord>,
    sample_dir: &'a Path,
    _sample: PhantomData<fn() -> S>,
}

impl<S: Sample> Iterator for SampleIter<'_, S> {
    type Item = Result<S>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(read_payload(self.sample_dir, &record.sample_name))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

fn payload_path(sample_dir: &Path, name: &str) -> PathBuf {
    sample_dir.join(format!("{name}.json"))
}

fn read_payload<S: Sample>(sample_dir: &Path, name: &str) -> Result<S> {
    let path = payload_path(sample_dir, name);
    let content = fs::read(&path)?;
    let envelope: PayloadIn = serde_json::from_slice(&content)?;
    if envelope.format_version > FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion {
            path: path.display().to_string(),
            found: envelope.format_version,
            supported: FORMAT_VERSION,
        }
        .into());
    }
    if envelope.kind != S::KIND {
        return Err(StorageError::TypeMismatch {
            path: path.display().to_string(),
            expected: S::KIND.to_string(),
            found: envelope.kind,
        }
        .into());
    }
    Ok(serde_json::from_value(envelope.sample)?)
}

fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidName(name.to_string()).into());
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp_path = with_suffix(path, ".tmp");
    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn load_index(path: &Path) -> Result<IndexFile> {
    let content = fs::read(path)?;
    let index: IndexFile = serde_json::from_slice(&content)?;
    if index.format_version > FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion {
            path: path.display().to_string(),
            found: index.format_version,
            supported: FORMAT_VERSION,
        }
        .into());
    }
    Ok(index)
}

fn save_index(path: &Path, index: &IndexFile) -> Result<()> {
    let content = serde_json::to_vec_pretty(index)?;
    write_atomic(path, &content)
}

fn acquire_lock(index_path: &Path) -> Result<File> {
    let lock_path = with_suffix(index_path, ".lock");
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    match lock_file.try_lock_exclusive() {
        Ok(()) => {
            debug!(lock = %lock_path.display(), "Acquired database lock");
            Ok(lock_file)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            Err(StorageError::Locked(index_path.display().to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}
