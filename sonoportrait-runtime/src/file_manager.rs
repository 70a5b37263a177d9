use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use sonoportrait_core::config::StorageSettings;
use sonoportrait_core::types::{GenerationStage, ImageBytes, OutputFormat, SessionId};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

// Bound on `_n` suffixes tried before giving up.
const MAX_SUFFIX: u32 = 10_000;

/// Writes generated images to disk. Raw bytes only; there is no manifest.
///
/// Intermediate (stage 1) images go to `temp_dir`, finals to `output_dir`.
#[derive(Debug, Clone)]
pub struct FileManager {
    temp_dir: PathBuf,
    output_dir: PathBuf,
}

impl FileManager {
    pub fn new(temp_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.temp_dir.clone(), settings.output_dir.clone())
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn save_intermediate(
        &self,
        session_id: &SessionId,
        stage: GenerationStage,
        format: OutputFormat,
        image: &ImageBytes,
    ) -> anyhow::Result<PathBuf> {
        save_unique(&self.temp_dir, session_id, stage, format, image)
    }

    pub fn save_output(
        &self,
        session_id: &SessionId,
        stage: GenerationStage,
        format: OutputFormat,
        image: &ImageBytes,
    ) -> anyhow::Result<PathBuf> {
        save_unique(&self.output_dir, session_id, stage, format, image)
    }

    pub fn read(&self, path: &Path) -> anyhow::Result<ImageBytes> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read image: {}", path.display()))?;
        Ok(ImageBytes::new(bytes))
    }

    /// Saved finals, newest first. A missing directory is treated as empty.
    pub fn list_outputs(&self) -> anyhow::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.output_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!(
                    "failed to list outputs: {}",
                    self.output_dir.display()
                )));
            }
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.context("failed to read output entry")?;
            let path = entry.path();
            if !path.is_file() || !has_image_extension(&path) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }

        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(files.into_iter().map(|(_, p)| p).collect())
    }

    /// Deletes temp files at least `max_age` old. Returns how many were removed.
    pub fn cleanup_temp(&self, max_age: Duration) -> anyhow::Result<usize> {
        let entries = match fs::read_dir(&self.temp_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!(
                    "failed to scan temp dir: {}",
                    self.temp_dir.display()
                )));
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries {
            let entry = entry.context("failed to read temp entry")?;
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("failed to remove temp file {}: {e}", path.display()),
            }
        }

        if removed > 0 {
            log::info!("removed {removed} stale temp file(s)");
        }
        Ok(removed)
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn save_unique(
    dir: &Path,
    session_id: &SessionId,
    stage: GenerationStage,
    format: OutputFormat,
    image: &ImageBytes,
) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create dir: {}", dir.display()))?;

    let stem = format!("{}_{}", session_id, stage.label());
    let ext = format.extension();

    for n in 0..MAX_SUFFIX {
        let name = if n == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}_{n}.{ext}")
        };
        let path = dir.join(name);

        // `create_new` makes the existence check and the create a single step.
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to create {}", path.display())));
            }
        };
        write_or_remove(&mut file, &path, image.as_slice())?;

        log::info!("saved {} ({} bytes)", path.display(), image.len());
        return Ok(path);
    }

    Err(anyhow::anyhow!(
        "no free filename for {stem}.{ext} in {}",
        dir.display()
    ))
}

// A failed write must not leave a truncated image under the final name.
fn write_or_remove(out: &mut impl Write, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Err(e) = out.write_all(bytes).and_then(|()| out.flush()) {
        if let Err(rm) = fs::remove_file(path) {
            log::warn!("could not remove partial file {}: {}", path.display(), rm);
        }
        return Err(anyhow::Error::new(e).context(format!("failed to write {}", path.display())));
    }
    Ok(())
}
