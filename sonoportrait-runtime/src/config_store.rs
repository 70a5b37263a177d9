use anyhow::Context;
use sonoportrait_core::config::AppConfig;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means first run: defaults.
    pub fn load(&self) -> anyhow::Result<AppConfig> {
        if !self.path.exists() {
            log::info!("no config at {}, using defaults", self.path.display());
            return Ok(AppConfig::default());
        }

        let bytes = fs::read(&self.path)
            .with_context(|| format!("read config: {}", self.path.display()))?;
        let cfg: AppConfig = serde_json::from_slice(&bytes).context("decode config JSON")?;
        Ok(cfg)
    }

    pub fn save(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory: {}", parent.display()))?;
        }

        // Atomic-ish write: write temp then replace.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write temp: {}", tmp.display()))?;
        replace_file(&tmp, &self.path)
            .with_context(|| format!("replace file: {}", self.path.display()))?;
        Ok(())
    }
}

/// Moves `tmp` over `dst`, keeping the previous `dst` until the rename succeeds.
pub fn replace_file(tmp: &Path, dst: &Path) -> anyhow::Result<()> {
    let backup = dst.with_extension("bak");

    if dst.exists() {
        let _ = fs::remove_file(&backup);
        fs::rename(dst, &backup)
            .with_context(|| format!("failed rename {} -> {}", dst.display(), backup.display()))?;
    }

    if let Err(e) = fs::rename(tmp, dst) {
        if backup.exists() {
            let _ = fs::rename(&backup, dst);
        }
        let _ = fs::remove_file(tmp);
        return Err(anyhow::Error::new(e).context(format!(
            "failed rename {} -> {}",
            tmp.display(),
            dst.display()
        )));
    }

    let _ = fs::remove_file(&backup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonoportrait_core::config::EnhancementVariant;
    use sonoportrait_core::types::Ethnicity;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at_path(dir.path().join("config.json"));
        assert_eq!(store.load().unwrap(), AppConfig::default());
    }

    #[test]
    fn round_trips_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at_path(dir.path().join("nested").join("config.json"));

        let mut cfg = AppConfig::default();
        cfg.api.base_url = "http://localhost:9999".into();
        cfg.api.structure_timeout_secs = 120;
        cfg.generation.ethnicity = Ethnicity::SouthAsian;
        cfg.generation.advanced.seed = Some(7);
        cfg.enhancement.variant = EnhancementVariant::Normalized;
        cfg.prompts.outline_positive = "{ethnicity_prompt} newborn".into();

        store.save(&cfg).unwrap();
        // Second save goes through the replace path.
        store.save(&cfg).unwrap();

        assert_eq!(store.load().unwrap(), cfg);
        assert!(!store.path().with_extension("json.tmp").exists());
        assert!(!store.path().with_extension("bak").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let err = ConfigStore::at_path(path).load().unwrap_err();
        assert!(format!("{err:#}").contains("decode config JSON"));
    }
}
