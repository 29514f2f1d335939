//! Fixture files shared by the workspace tests.
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile, TempDir};

#[derive(Debug)]
pub struct TestFile {
    filebinary: &'static [u8],
    suffix: &'static str,
}

impl TestFile {
    pub fn ptm_train() -> Self {
        Self {
            filebinary: include_bytes!("../data/ptm/PTM_train.json"),
            suffix: "json",
        }
    }

    pub fn ptm_val() -> Self {
        Self {
            filebinary: include_bytes!("../data/ptm/PTM_val.json"),
            suffix: "json",
        }
    }

    pub fn ptm_test() -> Self {
        Self {
            filebinary: include_bytes!("../data/ptm/PTM_test.json"),
            suffix: "json",
        }
    }

    pub fn ptm_config() -> Self {
        Self {
            filebinary: include_bytes!("../data/ptm/config.yaml"),
            suffix: "yaml",
        }
    }

    pub fn bytes(&self) -> &'static [u8] {
        self.filebinary
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();

        Ok((path, temp))
    }

    fn write_to(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.filebinary)
    }
}

/// A temporary PTM data directory: the three split files plus a `config.yaml`
/// whose `path_data` points at the directory.
pub struct PtmDataDir {
    dir: TempDir,
}

impl PtmDataDir {
    pub fn create() -> std::io::Result<Self> {
        let dir = Builder::new().prefix("ptm-data").tempdir()?;
        TestFile::ptm_train().write_to(&dir.path().join("PTM_train.json"))?;
        TestFile::ptm_val().write_to(&dir.path().join("PTM_val.json"))?;
        TestFile::ptm_test().write_to(&dir.path().join("PTM_test.json"))?;
        let config = format!(
            "path_data: '{}'\npath_pred: '{}'\n",
            dir.path().display(),
            dir.path().join("predictions").display()
        );
        fs::write(dir.path().join("config.yaml"), config)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> PathBuf {
        self.dir.path().join("config.yaml")
    }

    /// Writes the shipped config, whose paths are relative to the data directory, and
    /// returns its file name. Runs using it must start inside [`PtmDataDir::path`].
    pub fn relative_config(&self) -> std::io::Result<&'static str> {
        let name = "config.relative.yaml";
        TestFile::ptm_config().write_to(&self.dir.path().join(name))?;
        Ok(name)
    }
}
