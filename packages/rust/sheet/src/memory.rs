use std::sync::Arc;

use async_trait::async_trait;
use linkintel_shared::Result;
use tokio::sync::Mutex;

use crate::{RowUpdate, SheetData, SheetTransport};

/// In-memory sheet. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    data: Arc<Mutex<SheetData>>,
}

impl MemorySheet {
    pub fn new(data: SheetData) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Build from string slices, for tests and demos.
    pub fn from_rows(header: &[&str], rows: Vec<Vec<&str>>) -> Self {
        let header = header.iter().map(|s| s.to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(str::to_string).collect())
            .collect();
        Self::new(SheetData::new(header, rows))
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> SheetData {
        self.data.lock().await.clone()
    }
}

#[async_trait]
impl SheetTransport for MemorySheet {
    async fn read_header(&self) -> Result<Vec<String>> {
        Ok(self.data.lock().await.header.clone())
    }

    async fn read_rows(&self) -> Result<SheetData> {
        Ok(self.snapshot().await)
    }

    async fn insert_columns(&self, at: usize, names: &[String]) -> Result<()> {
        self.data.lock().await.insert_columns(at, names);
        Ok(())
    }

    async fn write_row(&self, update: &RowUpdate) -> Result<()> {
        self.data.lock().await.apply(update)
    }

    async fn write_rows(&self, updates: &[RowUpdate]) -> Result<()> {
        let mut data = self.data.lock().await;
        for update in updates {
            data.apply(update)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let sheet = MemorySheet::from_rows(&["name"], vec![vec!["Jane"]]);
        let other = sheet.clone();

        other.insert_columns(1, &["ENRICH_STATUS".to_string()]).await.unwrap();
        other
            .write_row(&RowUpdate {
                row: 0,
                expected_key: "row:2".into(),
                cells: vec![(1, "OK".into())],
            })
            .await
            .unwrap();

        let data = sheet.read_rows().await.unwrap();
        assert_eq!(data.header, vec!["name", "ENRICH_STATUS"]);
        assert_eq!(data.cell(0, 1), "OK");
    }
}
