//! Where the guard learns when the pipeline last produced a result.
//!
//! The log only reports raw timestamps. Parsing, and the fail-open policy
//! for malformed values, belong to [`crate::refresh::cooldown`].

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::{
    error::CompletionLogError,
    refresh::{RefreshScope, ScopeFamily},
};

/// Read access to completed-job records.
///
/// Implementations are synchronous: the guard consults them while holding
/// its state lock.
pub trait CompletionLog: Send + Sync + fmt::Debug {
    /// Raw `generated_at` of the most recent completion for `scope`.
    fn last_completion(
        &self,
        scope: &RefreshScope,
    ) -> Result<Option<String>, CompletionLogError>;

    /// Raw timestamps of every recorded completion in `family`.
    fn completions(
        &self,
        family: ScopeFamily,
    ) -> Result<Vec<String>, CompletionLogError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCompletionLog {
    records: Mutex<Vec<(RefreshScope, String)>>,
}

impl InMemoryCompletionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, scope: &RefreshScope, raw: impl Into<String>) {
        self.records.lock().push((scope.clone(), raw.into()));
    }

    pub fn record_at(&self, scope: &RefreshScope, at: DateTime<Utc>) {
        self.record(scope, at.to_rfc3339_opts(SecondsFormat::Micros, false));
    }
}

impl CompletionLog for InMemoryCompletionLog {
    fn last_completion(
        &self,
        scope: &RefreshScope,
    ) -> Result<Option<String>, CompletionLogError> {
        Ok(self
            .records
            .lock()
            .iter()
            .rev()
            .find(|(recorded, _)| recorded == scope)
            .map(|(_, raw)| raw.clone()))
    }

    fn completions(
        &self,
        family: ScopeFamily,
    ) -> Result<Vec<String>, CompletionLogError> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|(scope, _)| scope.family() == family)
            .map(|(_, raw)| raw.clone())
            .collect())
    }
}

const DAILY_SUFFIX: &str = "_summary.json";
const ADHOC_DIR: &str = "adhoc";

#[derive(Debug, Deserialize)]
struct CompletionRecord {
    generated_at: Option<String>,
    #[serde(default)]
    item_id: Option<Value>,
    #[serde(default)]
    url: Option<String>,
}

impl CompletionRecord {
    fn matches_item(&self, id: &str) -> bool {
        let by_id = match &self.item_id {
            Some(Value::String(s)) => s == id,
            Some(Value::Number(n)) => n.to_string() == id,
            _ => false,
        };
        by_id || self.url.as_deref() == Some(id)
    }
}

/// Reads the pipeline's JSON artifacts from a summaries directory.
///
/// Daily results live at `<root>/YYYY-MM-DD_summary.json`, single-article
/// results at `<root>/adhoc/*.json`. Files are considered in filename order;
/// unreadable or malformed files are logged and skipped.
#[derive(Debug, Clone)]
pub struct FileCompletionLog {
    root: PathBuf,
}

impl FileCompletionLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn adhoc_dir(&self) -> PathBuf {
        self.root.join(ADHOC_DIR)
    }

    fn daily_files(&self) -> Result<Vec<PathBuf>, CompletionLogError> {
        let mut files = list_json_files(&self.root)?;
        files.retain(|path| is_daily_summary(path));
        Ok(files)
    }

    fn records(
        files: Vec<PathBuf>,
    ) -> impl DoubleEndedIterator<Item = CompletionRecord> {
        files
            .into_iter()
            .filter_map(|path| match read_record(&path) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(error = %err, "skipping completion record");
                    None
                }
            })
    }
}

impl CompletionLog for FileCompletionLog {
    fn last_completion(
        &self,
        scope: &RefreshScope,
    ) -> Result<Option<String>, CompletionLogError> {
        let found = match scope {
            RefreshScope::Daily => Self::records(self.daily_files()?)
                .rev()
                .find_map(|record| record.generated_at),
            RefreshScope::Item(id) => {
                Self::records(list_json_files(&self.adhoc_dir())?)
                    .rev()
                    .filter(|record| record.matches_item(id.as_str()))
                    .find_map(|record| record.generated_at)
            }
        };
        Ok(found)
    }

    fn completions(
        &self,
        family: ScopeFamily,
    ) -> Result<Vec<String>, CompletionLogError> {
        let files = match family {
            ScopeFamily::Daily => self.daily_files()?,
            ScopeFamily::Item => list_json_files(&self.adhoc_dir())?,
        };
        Ok(Self::records(files)
            .filter_map(|record| record.generated_at)
            .collect())
    }
}

fn is_daily_summary(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(DAILY_SUFFIX))
        .is_some_and(|date| {
            NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
        })
}

/// `*.json` files directly under `dir`, sorted by name. A missing directory
/// yields no files.
fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, CompletionLogError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(CompletionLogError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CompletionLogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file()
            && path.extension().is_some_and(|ext| ext == "json")
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_record(path: &Path) -> Result<CompletionRecord, CompletionLogError> {
    let bytes = fs::read(path).map_err(|source| CompletionLogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CompletionLogError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
