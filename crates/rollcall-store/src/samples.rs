//! Reference samples stored as PNG files in one directory.

use rollcall_core::store::{SampleStore, StoreError};
use rollcall_core::types::{FaceSample, SampleRef};
use std::path::{Path, PathBuf};

pub struct FsSampleStore {
    dir: PathBuf,
}

impl FsSampleStore {
    /// Use `dir` for samples, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Backend(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Keep ids usable as file name components.
fn file_stem(employee_id: &str) -> String {
    employee_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl SampleStore for FsSampleStore {
    fn save(&self, employee_id: &str, sample: &FaceSample) -> Result<SampleRef, StoreError> {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!("{}-{unique}.png", file_stem(employee_id)));
        let tmp = self.dir.join(format!(".{unique}.png.tmp"));

        sample
            .save_with_format(&tmp, image::ImageFormat::Png)
            .map_err(|e| StoreError::Codec(format!("encode {}: {e}", tmp.display())))?;

        // Flush before the rename makes the artifact visible.
        std::fs::File::open(&tmp)
            .and_then(|f| f.sync_all())
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                StoreError::Backend(format!("persist {}: {e}", path.display()))
            })?;

        tracing::debug!(path = %path.display(), "reference sample stored");
        Ok(SampleRef(path.to_string_lossy().into_owned()))
    }

    fn load(&self, sample: &SampleRef) -> Result<FaceSample, StoreError> {
        let path = Path::new(sample.as_str());
        if !path.exists() {
            return Err(StoreError::NotFound(sample.to_string()));
        }
        image::open(path).map_err(|e| StoreError::Codec(format!("decode {sample}: {e}")))
    }

    fn discard(&self, sample: &SampleRef) -> Result<(), StoreError> {
        match std::fs::remove_file(sample.as_str()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Backend(format!("remove {sample}: {e}"))),
        }
    }
}
