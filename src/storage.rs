use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub data_dir: PathBuf,
    pub source_dir: PathBuf,
    pub db_path: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir: PathBuf = data_dir.into();
        let source_dir = data_dir.join("sources");
        let db_path = data_dir.join("findmycure.db");

        Self {
            data_dir,
            source_dir,
            db_path,
        }
    }

    pub fn source_csv(&self, file_name: &str) -> PathBuf {
        self.source_dir.join(file_name)
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.source_dir)?;
        Ok(())
    }
}

pub fn file_present_nonempty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.len() > 0,
        Err(_) => false,
    }
}
