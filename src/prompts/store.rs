//! On-disk template store.
//!
//! Persists one file per template at `{template_dir}/{id}.yaml` plus a single
//! `{template_dir}/performance_metrics.json` mapping template id to its
//! performance history. An in-memory store (no directory) never touches disk.
//!
//! Mutations only change memory. Each returns, or lets the caller build, a
//! [`PendingWrite`] holding the serialized file, so callers can release their
//! locks before the write runs on `tokio::fs`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use super::template::{bump_patch, default_version, PerformanceRecord, TemplateRecord};

/// File holding performance history for every template.
pub const PERFORMANCE_FILE: &str = "performance_metrics.json";

/// Summary of a template's recorded performance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub template_id: String,
    pub count: usize,
    pub mean_score: f64,
    pub version: String,
}

/// A serialized file waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub path: PathBuf,
    pub contents: String,
}

impl PendingWrite {
    pub async fn persist(&self) -> anyhow::Result<()> {
        tokio::fs::write(&self.path, &self.contents)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        tracing::debug!("Saved {}", self.path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TemplateStore {
    dir: Option<PathBuf>,
    templates: BTreeMap<String, TemplateRecord>,
}

impl TemplateStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load every template and the performance history from `dir`, creating it if absent.
    ///
    /// Unreadable or incomplete template files are skipped with a warning.
    pub fn load(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating template dir {}", dir.display()))?;

        let mut templates = BTreeMap::new();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("reading template dir {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(stem) = template_stem(&path) else {
                continue;
            };
            match read_template(&path) {
                Ok(mut record) => {
                    record.id = stem.clone();
                    tracing::debug!(template_id = %stem, "Loaded template");
                    templates.insert(stem, record);
                }
                Err(e) => {
                    tracing::warn!("Skipping template {}: {:#}", path.display(), e);
                }
            }
        }

        let metrics_path = dir.join(PERFORMANCE_FILE);
        if metrics_path.exists() {
            let contents = std::fs::read_to_string(&metrics_path)
                .with_context(|| format!("reading {}", metrics_path.display()))?;
            let metrics: BTreeMap<String, Vec<PerformanceRecord>> =
                serde_json::from_str(&contents)
                    .with_context(|| format!("parsing {}", metrics_path.display()))?;
            for (id, records) in metrics {
                match templates.get_mut(&id) {
                    Some(t) => t.performance = records,
                    None => tracing::debug!(template_id = %id, "Metrics for unknown template ignored"),
                }
            }
        }

        tracing::info!(
            "Template store loaded {} templates from {}",
            templates.len(),
            dir.display()
        );
        Ok(Self {
            dir: Some(dir),
            templates,
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TemplateRecord> {
        self.templates.get(id)
    }

    /// Templates serving `(agent_id, task_type)`, ordered by id.
    pub fn candidates(&self, agent_id: &str, task_type: &str) -> Vec<&TemplateRecord> {
        self.templates
            .values()
            .filter(|t| t.matches(agent_id, task_type))
            .collect()
    }

    /// Insert a fully-formed record without versioning or persistence.
    pub fn insert(&mut self, record: TemplateRecord) {
        self.templates.insert(record.id.clone(), record);
    }

    /// Add a template body for `(agent_id, task_type)`.
    ///
    /// An existing template for the pair keeps its id and gets its patch version
    /// bumped; otherwise the id is `{agent_id}_{task_type}` lowercased at `1.0.0`.
    /// Returns the template id. Persist with [`TemplateStore::template_write`].
    pub fn add_template_version(&mut self, agent_id: &str, task_type: &str, body: &str) -> String {
        let existing = self
            .templates
            .values()
            .find(|t| t.matches(agent_id, task_type))
            .map(|t| (t.id.clone(), t.version.clone()));

        let (id, version) = match existing {
            Some((id, version)) => (id, bump_patch(&version)),
            None => (
                format!("{}_{}", agent_id, task_type).to_lowercase(),
                default_version(),
            ),
        };

        let record = self
            .templates
            .entry(id.clone())
            .or_insert_with(|| TemplateRecord::new(id.clone(), agent_id, task_type, body));
        record.body = body.to_string();
        record.version = version.clone();
        tracing::info!(template_id = %id, version = %version, "Added template version");
        id
    }

    /// Append a performance record. Returns `false` when `template_id` is unknown.
    ///
    /// Persist with [`TemplateStore::metrics_write`].
    pub fn append_performance(&mut self, template_id: &str, score: f64, metadata: serde_json::Value) -> bool {
        let Some(template) = self.templates.get_mut(template_id) else {
            return false;
        };
        template.performance.push(PerformanceRecord {
            timestamp: chrono::Utc::now(),
            score: score.clamp(0.0, 1.0),
            version: template.version.clone(),
            metadata,
        });
        true
    }

    /// The file for `template_id`, or `None` for an in-memory store or unknown id.
    pub fn template_write(&self, template_id: &str) -> anyhow::Result<Option<PendingWrite>> {
        let (Some(dir), Some(record)) = (&self.dir, self.templates.get(template_id)) else {
            return Ok(None);
        };
        Ok(Some(PendingWrite {
            path: dir.join(format!("{}.yaml", template_id)),
            contents: serde_yaml::to_string(record)?,
        }))
    }

    /// The performance history file, or `None` for an in-memory store.
    pub fn metrics_write(&self) -> anyhow::Result<Option<PendingWrite>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let metrics: BTreeMap<&str, &Vec<PerformanceRecord>> = self
            .templates
            .values()
            .filter(|t| !t.performance.is_empty())
            .map(|t| (t.id.as_str(), &t.performance))
            .collect();
        Ok(Some(PendingWrite {
            path: dir.join(PERFORMANCE_FILE),
            contents: serde_json::to_string_pretty(&metrics)?,
        }))
    }

    pub fn performance_stats(&self, template_id: &str) -> Option<PerformanceStats> {
        let t = self.templates.get(template_id)?;
        let count = t.performance.len();
        let mean_score = if count == 0 {
            0.0
        } else {
            t.performance.iter().map(|r| r.score).sum::<f64>() / count as f64
        };
        Some(PerformanceStats {
            template_id: t.id.clone(),
            count,
            mean_score,
            version: t.version.clone(),
        })
    }
}

/// Stem of a loadable template file, or `None` for anything else in the directory.
fn template_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') || name == PERFORMANCE_FILE {
        return None;
    }
    let ext = path.extension()?.to_str()?;
    if !matches!(ext, "yaml" | "yml" | "json") {
        return None;
    }
    Some(path.file_stem()?.to_str()?.to_string())
}

fn read_template(path: &Path) -> anyhow::Result<TemplateRecord> {
    let contents = std::fs::read_to_string(path)?;
    let record = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        _ => serde_yaml::from_str(&contents)?,
    };
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_version_creates_then_bumps() {
        let mut store = TemplateStore::in_memory();
        let id = store.add_template_version("SAA", "Pattern_Selection", "v1");
        assert_eq!(id, "saa_pattern_selection");
        assert_eq!(store.get(&id).unwrap().version, "1.0.0");

        let again = store.add_template_version("SAA", "Pattern_Selection", "v2");
        assert_eq!(again, id);
        let t = store.get(&id).unwrap();
        assert_eq!(t.version, "1.0.1");
        assert_eq!(t.body, "v2");
    }

    #[test]
    fn test_append_clamps_and_rejects_unknown() {
        let mut store = TemplateStore::in_memory();
        let id = store.add_template_version("RAA", "analyze", "b");
        assert!(store.append_performance(&id, 1.7, json!({})));
        assert!(!store.append_performance("nope", 0.5, json!({})));
        assert!(store.metrics_write().unwrap().is_none());
        let stats = store.performance_stats(&id).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean_score, 1.0);
    }

    #[tokio::test]
    async fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mut store = TemplateStore::load(dir.path()).unwrap();
            let id = store.add_template_version("SAA", "interface_design", "Design {requirements}");
            store.template_write(&id).unwrap().unwrap().persist().await.unwrap();
            store.append_performance(&id, 0.25, json!({"run": 1}));
            store.append_performance(&id, 0.75, serde_json::Value::Null);
            store.metrics_write().unwrap().unwrap().persist().await.unwrap();
            id
        };
        assert!(dir.path().join("saa_interface_design.yaml").exists());
        assert!(dir.path().join(PERFORMANCE_FILE).exists());

        let store = TemplateStore::load(dir.path()).unwrap();
        let t = store.get(&id).unwrap();
        assert_eq!(t.body, "Design {requirements}");
        assert_eq!(t.performance.len(), 2);
        assert_eq!(t.performance[0].metadata, json!({"run": 1}));
        assert!((store.performance_stats(&id).unwrap().mean_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_incomplete_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "agent_id: SAA\n").unwrap();
        std::fs::write(
            dir.path().join("legacy.json"),
            r#"{"agent_id":"KAA","prompt_type":"analyze_rules","template":"Rules"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = TemplateStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        let t = store.get("legacy").unwrap();
        assert_eq!(t.version, "1.0.0");
        assert_eq!(store.candidates("KAA", "analyze_rules").len(), 1);
    }
}
