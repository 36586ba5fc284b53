//! Dataset file writing: inline JSON for the engine's asset loader, plus a
//! header + little-endian blob pair for bulk consumers, and the manifest
//! tying the cases together.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk dataset: one value per grid point, x-fastest layout. Field names
/// mirror what the engine's loader expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub case_name: String,
    pub dimensions: [usize; 3],
    pub origin: [f32; 3],
    pub spacing: [f32; 3],
    pub arrays: BTreeMap<String, Vec<f32>>,
    pub labels: BTreeMap<String, Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_arrays: Vec<RawArrayRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArrayRef {
    pub name: String,
    pub offset: usize,
}

impl DatasetFile {
    pub fn point_count(&self) -> usize {
        self.dimensions.iter().product()
    }
}

/// Files emitted for one case.
#[derive(Debug, Serialize)]
pub struct WrittenCase {
    pub slug: String,
    pub name: String,
    pub dataset: PathBuf,
    pub header: PathBuf,
    pub raw: PathBuf,
}

/// Write one case in both layouts and return the manifest entry.
pub fn write_case(
    output_dir: &Path,
    file: &DatasetFile,
) -> Result<WrittenCase, Box<dyn std::error::Error>> {
    let slug = slug_for(&file.case_name);

    let dataset_path = output_dir.join(format!("{slug}.dataset.json"));
    let writer = BufWriter::new(File::create(&dataset_path)?);
    serde_json::to_writer(writer, file)?;

    let (header_path, raw_path) = write_raw_pair(output_dir, &slug, file)?;

    Ok(WrittenCase {
        slug,
        name: file.case_name.clone(),
        dataset: dataset_path,
        header: header_path,
        raw: raw_path,
    })
}

/// Header JSON referencing the scalar arrays by byte offset into a sidecar
/// blob of little-endian f32 values. Label arrays stay inline.
fn write_raw_pair(
    output_dir: &Path,
    slug: &str,
    file: &DatasetFile,
) -> Result<(PathBuf, PathBuf), Box<dyn std::error::Error>> {
    let raw_path = output_dir.join(format!("{slug}.raw"));
    let mut blob = BufWriter::new(File::create(&raw_path)?);

    let mut header = file.clone();
    let mut offset = 0usize;
    for (name, values) in std::mem::take(&mut header.arrays) {
        blob.write_all(bytemuck::cast_slice(&values))?;
        header.raw_arrays.push(RawArrayRef {
            name,
            offset,
        });
        offset += values.len() * size_of::<f32>();
    }
    blob.flush()?;

    let header_path = output_dir.join(format!("{slug}.header.json"));
    let writer = BufWriter::new(File::create(&header_path)?);
    serde_json::to_writer_pretty(writer, &header)?;

    Ok((header_path, raw_path))
}

pub fn write_manifest(
    output_dir: &Path,
    entries: &[WrittenCase],
) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = serde_json::json!({ "cases": entries });
    let writer = BufWriter::new(File::create(output_dir.join("manifest.json"))?);
    serde_json::to_writer_pretty(writer, &manifest)?;
    Ok(())
}

pub fn slug_for(case_name: &str) -> String {
    case_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_match_the_case_catalogue() {
        for case in constants::cases::CASE_MAP {
            assert_eq!(slug_for(case.name), case.slug);
        }
    }
}
