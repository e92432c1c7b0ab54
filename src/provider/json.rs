//! JSON file document source.
//!
//! Reads structured documents from disk. The path may be:
//!
//! - a single `.json` file holding one document object or an array of them
//! - a directory, in which case every `*.json` file in it is read (sorted by
//!   file name, not recursive)
//!
//! A document without a `paper_id` field is indexed under its file stem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{DocumentSource, ProviderError, ProviderResult, SourceDocument};
use crate::chunking::DocumentStructure;

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    paper_id: Option<String>,

    #[serde(flatten)]
    document: DocumentStructure,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFile {
    Many(Vec<RawDocument>),
    One(Box<RawDocument>),
}

#[derive(Debug, Clone)]
pub struct JsonFileDocumentSource {
    path: PathBuf,
    name: String,
}

impl JsonFileDocumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("json:{}", path.display());
        Self { path, name }
    }

    fn parse_file(path: &Path, contents: &str) -> ProviderResult<Vec<SourceDocument>> {
        let raw: RawFile = serde_json::from_str(contents)
            .map_err(|e| ProviderError::ParseError(format!("{}: {}", path.display(), e)))?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string);

        let documents = match raw {
            RawFile::One(doc) => vec![*doc],
            RawFile::Many(docs) => docs,
        };
        let single = documents.len() == 1;

        documents
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let paper_id = match (raw.paper_id, &stem) {
                    (Some(id), _) => id,
                    (None, Some(stem)) if single => stem.clone(),
                    (None, Some(stem)) => format!("{}-{}", stem, i),
                    (None, None) => {
                        return Err(ProviderError::ParseError(format!(
                            "{}: document {} has no paper_id",
                            path.display(),
                            i
                        )))
                    }
                };
                Ok(SourceDocument {
                    paper_id,
                    document: raw.document,
                })
            })
            .collect()
    }

    async fn read_file(path: &Path) -> ProviderResult<Vec<SourceDocument>> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::parse_file(path, &contents)
    }
}

#[async_trait]
impl DocumentSource for JsonFileDocumentSource {
    async fn fetch_documents(&self) -> ProviderResult<Vec<SourceDocument>> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            ProviderError::ConfigError(format!("Cannot access {}: {}", self.path.display(), e))
        })?;

        if metadata.is_file() {
            return Self::read_file(&self.path).await;
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            warn!(path = %self.path.display(), "No JSON documents found");
        }

        let mut documents = Vec::new();
        for file in files {
            let parsed = Self::read_file(&file).await?;
            debug!(file = %file.display(), documents = parsed.len(), "Read document file");
            documents.extend(parsed);
        }
        Ok(documents)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "title": "Paper One",
        "abstract": "We study things.",
        "sections": [{"heading": "Introduction", "text": "Things matter."}]
    }"#;

    #[tokio::test]
    async fn test_single_file_uses_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attention.json");
        std::fs::write(&path, DOC).unwrap();

        let source = JsonFileDocumentSource::new(&path);
        let docs = source.fetch_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].paper_id, "attention");
        assert_eq!(docs[0].document.title, "Paper One");
    }

    #[tokio::test]
    async fn test_directory_reads_sorted_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), DOC).unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"[{"paper_id": "x1", "title": "X"}, {"paper_id": "x2", "title": "Y"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = JsonFileDocumentSource::new(dir.path());
        let ids: Vec<String> = source
            .fetch_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.paper_id)
            .collect();
        assert_eq!(ids, vec!["x1", "x2", "b"]);

        let limited = source.fetch_documents_limit(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = JsonFileDocumentSource::new(&path).fetch_documents().await;
        assert!(matches!(result, Err(ProviderError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_missing_path_is_config_error() {
        let result = JsonFileDocumentSource::new("/definitely/not/here.json")
            .fetch_documents()
            .await;
        assert!(matches!(result, Err(ProviderError::ConfigError(_))));
    }
}
