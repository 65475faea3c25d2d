use std::path::{Path, PathBuf};

use miette::{IntoDiagnostic, Result, WrapErr, miette};
use tandem_editor_crdt::SyncConfig;

/// A sync config on disk. The format follows the file extension.
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<SyncConfig> {
        let raw = std::fs::read_to_string(&self.path)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading config {}", self.path.display()))?;
        let config: SyncConfig = match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&raw).into_diagnostic()?,
            Some("toml") => toml::from_str(&raw).into_diagnostic()?,
            _ => {
                return Err(miette!(
                    "Unsupported config format: {}",
                    self.path.display()
                ));
            }
        };
        tracing::debug!(path = %self.path.display(), document_id = %config.document_id, "loaded sync config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_editor_crdt::SnapshotEncoding;

    #[test]
    fn test_load_toml_and_json() {
        let dir = std::env::temp_dir().join(format!("tandem-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let toml_path = dir.join("sync.toml");
        std::fs::write(&toml_path, "document_id = \"notes\"\nsnapshot_encoding = \"base64\"\n").unwrap();
        let config = ConfigFile::new(&toml_path).load().unwrap();
        assert_eq!(config.document_id, "notes");
        assert_eq!(config.snapshot_encoding, SnapshotEncoding::Base64);

        let json_path = dir.join("sync.json");
        std::fs::write(&json_path, r#"{ "max_deliveries_per_pump": 5 }"#).unwrap();
        let config = ConfigFile::new(&json_path).load().unwrap();
        assert_eq!(config.max_deliveries_per_pump, 5);
        assert_eq!(config.document_id, "doc");

        assert!(ConfigFile::new(dir.join("sync.ini")).load().is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
