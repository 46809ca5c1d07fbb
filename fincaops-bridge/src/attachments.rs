//! Attachment migration from the agent store into registry storage
//!
//! Each attachment an agent ticket references is copied under a path derived
//! from the new incident's id, so it stays retrievable after promotion no
//! matter what happens to the agent store. Originals are never deleted: a
//! retried migration or a post-transfer audit may still need them.
//!
//! Migration is per-item: one failing attachment is reported and does not
//! block the others.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// One attachment that could not be migrated
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationFailure {
    /// The agent-side reference that failed
    pub source_ref: String,
    pub error: String,
}

/// Per-item outcome of migrating one ticket's attachments
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// New registry-side refs, in the order the source listed them
    pub migrated: Vec<String>,
    pub failures: Vec<MigrationFailure>,
}

pub struct AttachmentMigrator {
    /// Base directory that relative agent-side refs are resolved against
    agent_root: PathBuf,
    /// Registry attachment storage root; migrated files land under
    /// `<registry_root>/<incident_id>/`
    registry_root: PathBuf,
    http: reqwest::Client,
}

impl AttachmentMigrator {
    pub fn new(agent_root: PathBuf, registry_root: PathBuf) -> Self {
        Self {
            agent_root,
            registry_root,
            http: reqwest::Client::new(),
        }
    }

    /// Migrate all refs for a newly created incident
    pub async fn migrate(&self, incident_id: Uuid, refs: &[String]) -> MigrationReport {
        let mut report = MigrationReport::default();
        if refs.is_empty() {
            return report;
        }

        let dest_dir = self.registry_root.join(incident_id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&dest_dir).await {
            // Nothing can be migrated without the destination; fail each
            // item so every gap is visible to the operator
            for source_ref in refs {
                report.failures.push(MigrationFailure {
                    source_ref: source_ref.clone(),
                    error: format!("create {}: {}", dest_dir.display(), e),
                });
            }
            return report;
        }

        for (index, source_ref) in refs.iter().enumerate() {
            match self.migrate_one(&dest_dir, index, source_ref).await {
                Ok(dest) => {
                    debug!(incident_id = %incident_id, source = %source_ref, "Attachment migrated");
                    report.migrated.push(dest);
                }
                Err(error) => {
                    warn!(
                        incident_id = %incident_id,
                        source = %source_ref,
                        error = %error,
                        "Attachment migration failed"
                    );
                    report.failures.push(MigrationFailure {
                        source_ref: source_ref.clone(),
                        error,
                    });
                }
            }
        }

        report
    }

    async fn migrate_one(
        &self,
        dest_dir: &Path,
        index: usize,
        source_ref: &str,
    ) -> Result<String, String> {
        let bytes = self.fetch(source_ref).await?;

        let file_name = derived_file_name(source_ref, index);
        let dest = dest_dir.join(&file_name);

        tokio::fs::write(&dest, &bytes)
            .await
            .map_err(|e| format!("write {}: {}", dest.display(), e))?;

        Ok(dest.to_string_lossy().into_owned())
    }

    async fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, String> {
        if source_ref.starts_with("http://") || source_ref.starts_with("https://") {
            let response = self
                .http
                .get(source_ref)
                .send()
                .await
                .map_err(|e| format!("fetch {}: {}", source_ref, e))?;
            if !response.status().is_success() {
                return Err(format!("fetch {}: HTTP {}", source_ref, response.status()));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| format!("read body of {}: {}", source_ref, e))?;
            return Ok(bytes.to_vec());
        }

        let path = {
            let p = Path::new(source_ref);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.agent_root.join(p)
            }
        };

        tokio::fs::read(&path)
            .await
            .map_err(|e| format!("read {}: {}", path.display(), e))
    }
}

/// A safe destination file name for a ref: its last path/URL segment with
/// hostile characters replaced, prefixed with the item index so two refs
/// with the same basename cannot clobber each other
fn derived_file_name(source_ref: &str, index: usize) -> String {
    let without_query = source_ref.split(['?', '#']).next().unwrap_or(source_ref);
    let base = without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.' || c == '_') {
        format!("{:02}-adjunto", index)
    } else {
        format!("{:02}-{}", index, sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_derived_file_name() {
        assert_eq!(derived_file_name("fotos/fuga1.jpg", 0), "00-fuga1.jpg");
        assert_eq!(
            derived_file_name("https://cdn.example/a/b/c.png?token=abc", 1),
            "01-c.png"
        );
        assert_eq!(derived_file_name("", 2), "02-adjunto");
        assert_eq!(derived_file_name("..", 3), "03-adjunto");
    }

    #[tokio::test]
    async fn test_migrate_copies_local_files_without_deleting_originals() {
        let agent_dir = TempDir::new().unwrap();
        let registry_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(agent_dir.path().join("fotos")).unwrap();
        std::fs::write(agent_dir.path().join("fotos/fuga1.jpg"), b"jpeg-bytes").unwrap();

        let migrator = AttachmentMigrator::new(
            agent_dir.path().to_path_buf(),
            registry_dir.path().to_path_buf(),
        );
        let incident_id = Uuid::new_v4();

        let report = migrator
            .migrate(incident_id, &["fotos/fuga1.jpg".to_string()])
            .await;

        assert_eq!(report.migrated.len(), 1);
        assert!(report.failures.is_empty());

        let dest = registry_dir
            .path()
            .join(incident_id.to_string())
            .join("00-fuga1.jpg");
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg-bytes");
        // Original must survive for retries and audit
        assert!(agent_dir.path().join("fotos/fuga1.jpg").exists());
    }

    #[tokio::test]
    async fn test_migrate_reports_per_item_failures() {
        let agent_dir = TempDir::new().unwrap();
        let registry_dir = TempDir::new().unwrap();
        std::fs::write(agent_dir.path().join("ok.pdf"), b"pdf").unwrap();

        let migrator = AttachmentMigrator::new(
            agent_dir.path().to_path_buf(),
            registry_dir.path().to_path_buf(),
        );

        let report = migrator
            .migrate(
                Uuid::new_v4(),
                &["ok.pdf".to_string(), "no-such-file.png".to_string()],
            )
            .await;

        assert_eq!(report.migrated.len(), 1, "good item migrates");
        assert_eq!(report.failures.len(), 1, "bad item is reported, not fatal");
        assert_eq!(report.failures[0].source_ref, "no-such-file.png");
    }
}
