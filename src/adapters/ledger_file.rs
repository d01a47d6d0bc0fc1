use crate::domain::model::LedgerEntry;
use crate::domain::ports::LedgerStore;
use crate::utils::error::{Result, TransferError};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// 以 CSV 檔保存轉移紀錄，起始年份存在旁邊的 `.marker` 檔
#[derive(Debug, Clone)]
pub struct CsvLedgerStore {
    path: PathBuf,
    marker_path: PathBuf,
}

impl CsvLedgerStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut marker = path.clone().into_os_string();
        marker.push(".marker");
        Self {
            path,
            marker_path: PathBuf::from(marker),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }
}

impl LedgerStore for CsvLedgerStore {
    async fn load(&self) -> Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            tracing::info!("📒 No ledger at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut entries = Vec::new();
        for record in reader.deserialize() {
            let entry: LedgerEntry = record?;
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(entry)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    async fn load_marker(&self) -> Result<Option<i32>> {
        if !self.marker_path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.marker_path)?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        text.parse().map(Some).map_err(|_| TransferError::LedgerError {
            message: format!(
                "marker file {} holds '{}', expected a year",
                self.marker_path.display(),
                text
            ),
        })
    }

    /// 寫到暫存檔後改名，中途失敗不會留下半份紀錄
    async fn rewrite(&self, entries: &[LedgerEntry]) -> Result<()> {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut writer = csv::Writer::from_path(&temp)?;
        for entry in entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;
        drop(writer);
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    async fn store_marker(&self, year: i32) -> Result<()> {
        let mut temp = self.marker_path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, format!("{}\n", year))?;
        fs::rename(&temp, &self.marker_path)?;
        Ok(())
    }
}
