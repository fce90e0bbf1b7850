use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tallyform_core::ConsolidatedForm;

use crate::errors::EvalError;

/// Ordered page images making up one form set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormSetInput {
    pub pages: Vec<PathBuf>,
}

/// One labeled dataset record: input form set plus ground truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledRecord {
    pub id: String,
    pub input: FormSetInput,
    pub expected: ConsolidatedForm,
}

/// Pull/push boundary to the dataset service.
///
/// The harness only pulls for experiments and never mutates a pulled
/// dataset in place. Record order is part of the dataset contract: the
/// deterministic sample is a prefix of the pulled order.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn pull(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Vec<LabeledRecord>, EvalError>;

    async fn push(&self, name: &str, records: &[LabeledRecord]) -> Result<String, EvalError>;
}

/// File-backed store: one JSON array of records per dataset, versions as
/// `<name>@<version>.json` next to the unversioned `<name>.json`.
pub struct FileDatasetStore {
    root: PathBuf,
}

impl FileDatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dataset_path(&self, name: &str, version: Option<&str>) -> PathBuf {
        let stem = match version {
            Some(version) => format!("{name}@{version}"),
            None => name.to_string(),
        };
        self.root.join(format!("{stem}.json"))
    }
}

#[async_trait]
impl DatasetStore for FileDatasetStore {
    async fn pull(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Vec<LabeledRecord>, EvalError> {
        let path = self.dataset_path(name, version);
        if !path.exists() {
            return Err(EvalError::DatasetNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(&path)?;
        let records: Vec<LabeledRecord> = serde_json::from_str(&contents)?;
        Ok(records)
    }

    async fn push(&self, name: &str, records: &[LabeledRecord]) -> Result<String, EvalError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.dataset_path(name, None);
        write_json(&path, records)?;
        Ok(name.to_string())
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatasetStore {
    datasets: std::collections::HashMap<String, Vec<LabeledRecord>>,
}

impl InMemoryDatasetStore {
    pub fn with_dataset(name: impl Into<String>, records: Vec<LabeledRecord>) -> Self {
        let mut store = Self::default();
        store.datasets.insert(name.into(), records);
        store
    }
}

#[async_trait]
impl DatasetStore for InMemoryDatasetStore {
    async fn pull(
        &self,
        name: &str,
        _version: Option<&str>,
    ) -> Result<Vec<LabeledRecord>, EvalError> {
        self.datasets
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::DatasetNotFound(name.to_string()))
    }

    async fn push(&self, name: &str, _records: &[LabeledRecord]) -> Result<String, EvalError> {
        // The in-memory store is read-only by construction.
        Err(EvalError::Evaluator(format!(
            "in-memory store cannot push dataset '{name}'"
        )))
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), EvalError> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
