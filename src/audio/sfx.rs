//! Sound effects loaded from `{sfx_dir}/{name}.mp3`.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{AudioError, SfxLibrary};

#[derive(Debug, Clone)]
pub struct DirSfxLibrary {
    dir: PathBuf,
}

impl DirSfxLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path for `name`, or `None` if the name could escape the directory.
    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let name = name.trim();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| self.dir.join(format!("{name}.mp3")))
    }
}

#[async_trait]
impl SfxLibrary for DirSfxLibrary {
    fn contains(&self, name: &str) -> bool {
        self.path_for(name).is_some_and(|p| p.is_file())
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>, AudioError> {
        let path = self
            .path_for(name)
            .ok_or_else(|| AudioError::SfxNotFound(name.to_string()))?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AudioError::SfxNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
