use crate::catalog::data_type::ColType;
use crate::error::{MicaError, MicaResult};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// One column of a table: name, type, width and byte offset inside the
/// fixed-size record.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub col_type: ColType,
    pub len: u32,
    pub offset: u32,
    pub indexed: bool,
}

/// An index over an ordered list of table columns. Keys are the
/// concatenation of the column bytes in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub table: String,
    pub cols: Vec<ColumnMeta>,
    pub col_tot_len: u32,
}

impl IndexMeta {
    pub fn new(table: String, cols: Vec<ColumnMeta>) -> Self {
        let col_tot_len = cols.iter().map(|c| c.len).sum();
        Self {
            table,
            cols,
            col_tot_len,
        }
    }

    /// `{table}_{col1}_{col2}_...` naming; doubles as the index file stem.
    pub fn index_name(&self) -> String {
        let mut name = self.table.clone();
        for col in &self.cols {
            name.push('_');
            name.push_str(&col.name);
        }
        name
    }

    pub fn file_name(&self) -> String {
        format!("{}.idx", self.index_name())
    }

    pub fn col_names(&self) -> Vec<String> {
        self.cols.iter().map(|c| c.name.clone()).collect()
    }

    /// Extract the key bytes for this index from a full table record.
    pub fn build_key(&self, record: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.col_tot_len as usize);
        for col in &self.cols {
            let start = col.offset as usize;
            key.extend_from_slice(&record[start..start + col.len as usize]);
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub name: String,
    pub cols: Vec<ColumnMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl TableMeta {
    pub fn record_size(&self) -> u32 {
        self.cols.iter().map(|c| c.len).sum()
    }

    pub fn get_col(&self, name: &str) -> MicaResult<&ColumnMeta> {
        self.cols
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| MicaError::ColumnNotFound(name.to_string()))
    }

    pub fn has_col(&self, name: &str) -> bool {
        self.cols.iter().any(|c| c.name == name)
    }

    pub fn get_index(&self, col_names: &[String]) -> Option<&IndexMeta> {
        self.indexes
            .iter()
            .find(|ix| ix.col_names() == col_names)
    }
}

/// The whole catalog: every table with its columns and index definitions.
/// Persisted as a textual dump (`db.meta`) inside the database directory.
#[derive(Debug, Clone, Default)]
pub struct DbMeta {
    pub name: String,
    pub tables: BTreeMap<String, TableMeta>,
}

impl DbMeta {
    pub fn new(name: String) -> Self {
        Self {
            name,
            tables: BTreeMap::new(),
        }
    }

    pub fn get_table(&self, name: &str) -> MicaResult<&TableMeta> {
        self.tables
            .get(name)
            .ok_or_else(|| MicaError::TableNotFound(name.to_string()))
    }

    pub fn get_table_mut(&mut self, name: &str) -> MicaResult<&mut TableMeta> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| MicaError::TableNotFound(name.to_string()))
    }

    pub fn save(&self, path: &Path) -> MicaResult<()> {
        let mut out = Vec::new();
        writeln!(out, "{}", self.name)?;
        writeln!(out, "{}", self.tables.len())?;
        for table in self.tables.values() {
            writeln!(
                out,
                "TABLE {} {} {}",
                table.name,
                table.cols.len(),
                table.indexes.len()
            )?;
            for col in &table.cols {
                writeln!(
                    out,
                    "COL {} {} {} {} {}",
                    col.name,
                    col.col_type.name(),
                    col.len,
                    col.offset,
                    col.indexed as u8
                )?;
            }
            for index in &table.indexes {
                writeln!(out, "INDEX {}", index.col_names().join(" "))?;
            }
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    pub fn load(path: &Path) -> MicaResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut lines = text.lines();
        let name = lines
            .next()
            .ok_or_else(|| MicaError::Internal("Empty catalog file".to_string()))?
            .to_string();
        let num_tables: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| MicaError::Internal("Malformed catalog header".to_string()))?;

        let mut meta = DbMeta::new(name);
        for _ in 0..num_tables {
            let header = lines
                .next()
                .ok_or_else(|| MicaError::Internal("Truncated catalog file".to_string()))?;
            let parts: Vec<&str> = header.split_whitespace().collect();
            if parts.len() != 4 || parts[0] != "TABLE" {
                return Err(MicaError::Internal(format!(
                    "Malformed catalog table line: {header}"
                )));
            }
            let table_name = parts[1].to_string();
            let num_cols: usize = parts[2]
                .parse()
                .map_err(|_| MicaError::Internal("Malformed column count".to_string()))?;
            let num_indexes: usize = parts[3]
                .parse()
                .map_err(|_| MicaError::Internal("Malformed index count".to_string()))?;

            let mut cols = Vec::with_capacity(num_cols);
            for _ in 0..num_cols {
                let line = lines
                    .next()
                    .ok_or_else(|| MicaError::Internal("Truncated column list".to_string()))?;
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() != 6 || parts[0] != "COL" {
                    return Err(MicaError::Internal(format!(
                        "Malformed catalog column line: {line}"
                    )));
                }
                cols.push(ColumnMeta {
                    name: parts[1].to_string(),
                    col_type: ColType::from_name(parts[2])?,
                    len: parts[3]
                        .parse()
                        .map_err(|_| MicaError::Internal("Malformed column len".to_string()))?,
                    offset: parts[4]
                        .parse()
                        .map_err(|_| MicaError::Internal("Malformed column offset".to_string()))?,
                    indexed: parts[5] == "1",
                });
            }

            let mut indexes = Vec::with_capacity(num_indexes);
            for _ in 0..num_indexes {
                let line = lines
                    .next()
                    .ok_or_else(|| MicaError::Internal("Truncated index list".to_string()))?;
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.is_empty() || parts[0] != "INDEX" {
                    return Err(MicaError::Internal(format!(
                        "Malformed catalog index line: {line}"
                    )));
                }
                let mut index_cols = Vec::new();
                for col_name in &parts[1..] {
                    let col = cols
                        .iter()
                        .find(|c| &c.name == col_name)
                        .ok_or_else(|| MicaError::ColumnNotFound(col_name.to_string()))?;
                    index_cols.push(col.clone());
                }
                indexes.push(IndexMeta::new(table_name.clone(), index_cols));
            }

            meta.tables.insert(
                table_name.clone(),
                TableMeta {
                    name: table_name,
                    cols,
                    indexes,
                },
            );
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::data_type::DATETIME_LEN;
    use tempfile::TempDir;

    fn sample_meta() -> DbMeta {
        let cols = vec![
            ColumnMeta {
                name: "id".to_string(),
                col_type: ColType::Int,
                len: 4,
                offset: 0,
                indexed: true,
            },
            ColumnMeta {
                name: "name".to_string(),
                col_type: ColType::Char,
                len: 16,
                offset: 4,
                indexed: false,
            },
            ColumnMeta {
                name: "created".to_string(),
                col_type: ColType::Datetime,
                len: DATETIME_LEN,
                offset: 20,
                indexed: false,
            },
        ];
        let index = IndexMeta::new("users".to_string(), vec![cols[0].clone()]);
        let mut meta = DbMeta::new("testdb".to_string());
        meta.tables.insert(
            "users".to_string(),
            TableMeta {
                name: "users".to_string(),
                cols,
                indexes: vec![index],
            },
        );
        meta
    }

    #[test]
    fn meta_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.meta");
        let meta = sample_meta();
        meta.save(&path).unwrap();

        let loaded = DbMeta::load(&path).unwrap();
        assert_eq!(loaded.name, "testdb");
        let table = loaded.get_table("users").unwrap();
        assert_eq!(table.cols.len(), 3);
        assert_eq!(table.record_size(), 4 + 16 + DATETIME_LEN);
        assert_eq!(table.indexes.len(), 1);
        assert_eq!(table.indexes[0].index_name(), "users_id");
        assert_eq!(table.indexes[0].col_tot_len, 4);
    }

    #[test]
    fn build_key_concatenates_columns() {
        let meta = sample_meta();
        let table = meta.get_table("users").unwrap();
        let mut record = vec![0u8; table.record_size() as usize];
        record[..4].copy_from_slice(&7i32.to_le_bytes());
        let key = table.indexes[0].build_key(&record);
        assert_eq!(key, 7i32.to_le_bytes().to_vec());
    }
}
