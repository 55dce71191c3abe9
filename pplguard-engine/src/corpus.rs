//! Text corpus loading
//!
//! A corpus is an ordered, immutable list of training-example texts. Files can
//! be JSON arrays, JSON Lines, or plain text (one text per line). Records are
//! either bare strings or objects carrying the text in a named field
//! (`"input"` by default).

use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors that can occur while loading a corpus.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} at line {line}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {record} in {path} has no string field '{field}'")]
    MissingField {
        path: PathBuf,
        record: usize,
        field: String,
    },

    #[error("unknown split '{0}' (expected train, dev, or test)")]
    UnknownSplit(String),
}

type Result<T> = std::result::Result<T, CorpusError>;

/// Default record field holding the text.
pub const DEFAULT_FIELD: &str = "input";

/// Dataset split in the task-directory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = CorpusError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "dev" => Ok(Split::Dev),
            "test" => Ok(Split::Test),
            other => Err(CorpusError::UnknownSplit(other.to_string())),
        }
    }
}

/// Ordered sequence of raw input texts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    texts: Vec<String>,
}

impl Corpus {
    pub fn from_texts(texts: Vec<String>) -> Self {
        Self { texts }
    }

    /// Load a corpus file, picking the format from the extension:
    /// `.json` (array), `.jsonl` (one record per line), anything else plain text.
    pub fn load(path: &Path, field: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let corpus = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::parse_json(&content, path, field)?,
            Some("jsonl") => Self::parse_jsonl(&content, path, field)?,
            _ => Self::parse_lines(&content),
        };
        tracing::info!("Loaded {} texts from {}", corpus.len(), path.display());
        Ok(corpus)
    }

    /// Load one split of one or more tasks from a directory laid out as
    /// `{data_dir}/{task}/{task}_{k}_{seed}_{split}.jsonl`.
    ///
    /// `tasks` is comma-separated; texts are concatenated in task order.
    pub fn load_task(
        data_dir: &Path,
        tasks: &str,
        k: usize,
        seed: u64,
        split: Split,
        field: &str,
    ) -> Result<Self> {
        let mut texts = Vec::new();
        for task in tasks.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let path = task_file(data_dir, task, k, seed, split);
            texts.extend(Self::load(&path, field)?.texts);
        }
        Ok(Self { texts })
    }

    /// Parse a JSON array of strings or objects.
    pub fn parse_json(content: &str, path: &Path, field: &str) -> Result<Self> {
        let records: Vec<Value> =
            serde_json::from_str(content).map_err(|source| CorpusError::Parse {
                path: path.to_path_buf(),
                line: source.line(),
                source,
            })?;
        let texts = records
            .iter()
            .enumerate()
            .map(|(i, record)| extract_text(record, field, path, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { texts })
    }

    /// Parse JSON Lines; blank lines are skipped.
    pub fn parse_jsonl(content: &str, path: &Path, field: &str) -> Result<Self> {
        let mut texts = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(line).map_err(|source| CorpusError::Parse {
                path: path.to_path_buf(),
                line: line_no + 1,
                source,
            })?;
            texts.push(extract_text(&record, field, path, texts.len())?);
        }
        Ok(Self { texts })
    }

    /// One text per line, kept verbatim (empty lines included).
    pub fn parse_lines(content: &str) -> Self {
        Self {
            texts: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.texts.get(index).map(String::as_str)
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.texts.iter().map(String::as_str)
    }
}

/// Path of one task split file.
pub fn task_file(data_dir: &Path, task: &str, k: usize, seed: u64, split: Split) -> PathBuf {
    data_dir
        .join(task)
        .join(format!("{}_{}_{}_{}.jsonl", task, k, seed, split))
}

fn extract_text(record: &Value, field: &str, path: &Path, index: usize) -> Result<String> {
    let text = match record {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get(field).and_then(Value::as_str),
        _ => None,
    };
    text.map(str::to_string)
        .ok_or_else(|| CorpusError::MissingField {
            path: path.to_path_buf(),
            record: index,
            field: field.to_string(),
        })
}
