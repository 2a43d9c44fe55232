//! Tile list tables
//!
//! Lists passed between pipeline steps are headerless two-column CSV
//! files (`index,path`). The train/validation split table carries a header
//! with `img_filepath`, `train` and an optional `img_cluster` column.

use crate::types::{CanopyError, CanopyResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Read the path column of a headerless `index,path` list
pub fn read_tile_list<P: AsRef<Path>>(path: P) -> CanopyResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path.as_ref())?;

    let mut entries = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let entry = record.get(1).ok_or_else(|| {
            CanopyError::Processing(format!(
                "Line {} of {} has no path column",
                line + 1,
                path.as_ref().display()
            ))
        })?;
        entries.push(entry.to_string());
    }

    log::debug!("Read {} entries from {}", entries.len(), path.as_ref().display());
    Ok(entries)
}

/// Write a headerless `index,path` list
pub fn write_tile_list<P, Q>(path: P, entries: &[Q]) -> CanopyResult<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path.as_ref())?;

    for (index, entry) in entries.iter().enumerate() {
        writer.write_record([index.to_string(), entry.as_ref().to_string_lossy().into_owned()])?;
    }
    writer.flush()?;

    log::info!("Dumped list of {} tiles to {}", entries.len(), path.as_ref().display());
    Ok(())
}

/// One row of the train/validation split table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SplitRecord {
    pub img_filepath: PathBuf,
    #[serde(deserialize_with = "deserialize_flag")]
    pub train: bool,
    #[serde(default)]
    pub img_cluster: Option<u32>,
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid train flag `{}`", other))),
    }
}

/// Read a headed split table
pub fn read_split_table<P: AsRef<Path>>(path: P) -> CanopyResult<Vec<SplitRecord>> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<SplitRecord>, csv::Error>>()?;
    log::debug!("Read {} split records from {}", records.len(), path.as_ref().display());
    Ok(records)
}
