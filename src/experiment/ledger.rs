//! Experiment ledger
//!
//! Append/update storage for experiment and trial records, keyed by
//! experiment id. The orchestrator is the only writer of a given record.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use super::errors::{ExperimentError, ExperimentResult};
use super::record::{ExperimentRecord, TrialRecord};

pub trait ExperimentLedger: Send + Sync {
    /// Store a new record
    fn create(&self, record: &ExperimentRecord) -> ExperimentResult<()>;

    /// Append one trial to a stored record
    fn append_trial(&self, id: Uuid, trial: &TrialRecord) -> ExperimentResult<()>;

    /// Replace a stored record
    fn update(&self, record: &ExperimentRecord) -> ExperimentResult<()>;

    fn load(&self, id: Uuid) -> ExperimentResult<Option<ExperimentRecord>>;
}

fn not_found(id: Uuid) -> ExperimentError {
    ExperimentError::Ledger(format!("experiment {} not found", id))
}

/// Ledger held in process memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<BTreeMap<Uuid, ExperimentRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

impl ExperimentLedger for MemoryLedger {
    fn create(&self, record: &ExperimentRecord) -> ExperimentResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record.clone());
        Ok(())
    }

    fn append_trial(&self, id: Uuid, trial: &TrialRecord) -> ExperimentResult<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records.get_mut(&id).ok_or_else(|| not_found(id))?;
        record.trials.push(trial.clone());
        Ok(())
    }

    fn update(&self, record: &ExperimentRecord) -> ExperimentResult<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = records.get_mut(&record.id).ok_or_else(|| not_found(record.id))?;
        *stored = record.clone();
        Ok(())
    }

    fn load(&self, id: Uuid) -> ExperimentResult<Option<ExperimentRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }
}

/// One pretty-printed JSON document per experiment, `<dir>/<id>.json`.
/// Documents are replaced through a temporary file and a rename.
#[derive(Debug)]
pub struct FileLedger {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileLedger {
    /// Open a ledger directory, creating it if needed
    pub fn open(dir: impl AsRef<Path>) -> ExperimentResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn path_of(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn write(&self, record: &ExperimentRecord) -> ExperimentResult<()> {
        let path = self.path_of(record.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(&self, id: Uuid) -> ExperimentResult<Option<ExperimentRecord>> {
        let path = self.path_of(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }
}

impl ExperimentLedger for FileLedger {
    fn create(&self, record: &ExperimentRecord) -> ExperimentResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(record)
    }

    fn append_trial(&self, id: Uuid, trial: &TrialRecord) -> ExperimentResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.read(id)?.ok_or_else(|| not_found(id))?;
        record.trials.push(trial.clone());
        self.write(&record)
    }

    fn update(&self, record: &ExperimentRecord) -> ExperimentResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.path_of(record.id).exists() {
            return Err(not_found(record.id));
        }
        self.write(record)
    }

    fn load(&self, id: Uuid) -> ExperimentResult<Option<ExperimentRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read(id)
    }
}
