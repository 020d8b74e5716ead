//! Sheet stored as a JSON file: `{ "header": [...], "rows": [[...], ...] }`.
//!
//! The file is loaded once on open. Every mutation is written back atomically
//! (temp file, then rename) before the call returns.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use linkintel_shared::{LinkIntelError, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{RowUpdate, SheetData, SheetTransport};

/// On-disk shape. Cells may be any JSON scalar; they are read as text.
#[derive(Deserialize)]
struct RawSheet {
    header: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

pub struct JsonSheet {
    path: PathBuf,
    data: Mutex<SheetData>,
}

impl JsonSheet {
    /// Load the sheet at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LinkIntelError::io(path, e))?;
        let raw: RawSheet = serde_json::from_str(&content).map_err(|e| {
            LinkIntelError::Sheet(format!("invalid sheet file {}: {e}", path.display()))
        })?;

        let data = SheetData {
            header: raw.header,
            rows: raw
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(cell_text).collect())
                .collect(),
        };
        debug!(path = %path.display(), rows = data.rows.len(), "loaded sheet");

        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    /// Create a new sheet file with `data`, replacing any existing file.
    pub async fn create(path: &Path, data: SheetData) -> Result<Self> {
        persist(path, &data).await?;
        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy and persist it; memory is only updated once the file is.
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut SheetData) -> Result<()> + Send,
    {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        change(&mut next)?;
        persist(&self.path, &next).await?;
        *data = next;
        Ok(())
    }
}

async fn persist(path: &Path, data: &SheetData) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| LinkIntelError::Sheet(format!("failed to serialize sheet: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sheet.json".to_string());
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&temp, json)
        .await
        .map_err(|e| LinkIntelError::io(&temp, e))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| LinkIntelError::io(path, e))?;
    Ok(())
}

#[async_trait]
impl SheetTransport for JsonSheet {
    async fn read_header(&self) -> Result<Vec<String>> {
        Ok(self.data.lock().await.header.clone())
    }

    async fn read_rows(&self) -> Result<SheetData> {
        Ok(self.data.lock().await.clone())
    }

    async fn insert_columns(&self, at: usize, names: &[String]) -> Result<()> {
        self.mutate(|data| {
            data.insert_columns(at, names);
            Ok(())
        })
        .await
    }

    async fn write_row(&self, update: &RowUpdate) -> Result<()> {
        self.mutate(|data| data.apply(update)).await
    }

    async fn write_rows(&self, updates: &[RowUpdate]) -> Result<()> {
        self.mutate(|data| updates.iter().try_for_each(|u| data.apply(u)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("li_sheet_{}.json", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn reads_scalar_cells_as_text() {
        let path = temp_path();
        tokio::fs::write(
            &path,
            r#"{"header":["name","employees","site"],"rows":[["Acme",42,null]]}"#,
        )
        .await
        .unwrap();

        let sheet = JsonSheet::open(&path).await.unwrap();
        let data = sheet.read_rows().await.unwrap();
        assert_eq!(data.rows[0], vec!["Acme", "42", ""]);
    }

    #[tokio::test]
    async fn writes_persist_across_reopen() {
        let path = temp_path();
        let sheet = JsonSheet::create(
            &path,
            SheetData::new(vec!["name".into()], vec![vec!["Acme".into()]]),
        )
        .await
        .unwrap();

        sheet
            .insert_columns(1, &["ENRICH_STATUS".to_string()])
            .await
            .unwrap();
        sheet
            .write_rows(&[RowUpdate {
                row: 0,
                expected_key: "name:acme|".into(),
                cells: vec![(1, "OK".into())],
            }])
            .await
            .unwrap();

        let reopened = JsonSheet::open(&path).await.unwrap();
        let data = reopened.read_rows().await.unwrap();
        assert_eq!(data.header, vec!["name", "ENRICH_STATUS"]);
        assert_eq!(data.cell(0, 1), "OK");
    }

    #[tokio::test]
    async fn failed_batch_leaves_file_untouched() {
        let path = temp_path();
        let sheet = JsonSheet::create(
            &path,
            SheetData::new(vec!["name".into()], vec![vec!["Acme".into()]]),
        )
        .await
        .unwrap();

        let good = RowUpdate {
            row: 0,
            expected_key: "row:2".into(),
            cells: vec![(0, "changed".into())],
        };
        let bad = RowUpdate { row: 9, ..good.clone() };
        assert!(sheet.write_rows(&[good, bad]).await.is_err());

        let data = JsonSheet::open(&path).await.unwrap().read_rows().await.unwrap();
        assert_eq!(data.cell(0, 0), "Acme");
        assert_eq!(sheet.read_rows().await.unwrap().cell(0, 0), "Acme");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = JsonSheet::open(&temp_path()).await.err().unwrap();
        assert!(matches!(err, LinkIntelError::Io { .. }));
    }
}
