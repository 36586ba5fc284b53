//! Dataset interchange format and the source abstraction that keeps the
//! concrete file format swappable for a real solver-result reader.

use std::collections::HashMap;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::error::{FieldError, Result};

/// On-disk dataset header. Arrays are one value per grid point, x-fastest.
/// Small datasets inline their arrays; large ones reference offsets into a
/// sidecar blob of little-endian f32 values (see [`RawFieldSource`]).
#[derive(Asset, TypePath, Debug, Clone, Serialize, Deserialize)]
pub struct FieldDataset {
    pub case_name: String,
    pub dimensions: [usize; 3],
    pub origin: [f32; 3],
    pub spacing: [f32; 3],
    #[serde(default)]
    pub arrays: HashMap<String, Vec<f32>>,
    #[serde(default)]
    pub labels: HashMap<String, Vec<u8>>,
    #[serde(default)]
    pub raw_arrays: Vec<RawArrayRef>,
}

/// Reference to an array stored out-of-line in the sidecar blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArrayRef {
    pub name: String,
    /// Byte offset into the blob
    pub offset: usize,
}

impl FieldDataset {
    pub fn point_count(&self) -> usize {
        self.dimensions.iter().product()
    }
}

/// Upstream data source contract. The store only ever sees this trait, so a
/// solver-result reader slots in without touching the pipeline.
pub trait FieldSource {
    /// Human-readable origin for log lines.
    fn describe(&self) -> String;
    /// Produce a fully-inlined dataset.
    fn read(&self) -> Result<FieldDataset>;
}

/// Dataset parsed from a JSON header with inline arrays.
pub struct JsonFieldSource {
    pub text: String,
    pub origin: String,
}

impl FieldSource for JsonFieldSource {
    fn describe(&self) -> String {
        self.origin.clone()
    }

    fn read(&self) -> Result<FieldDataset> {
        let dataset: FieldDataset = serde_json::from_str(&self.text)
            .map_err(|e| FieldError::data_format(format!("invalid dataset JSON: {e}")))?;
        if !dataset.raw_arrays.is_empty() {
            return Err(FieldError::data_format(
                "dataset references a sidecar blob; load it through RawFieldSource",
            ));
        }
        Ok(dataset)
    }
}

/// Dataset header plus its sidecar blob of little-endian f32 arrays.
pub struct RawFieldSource {
    pub header: FieldDataset,
    pub blob: Vec<u8>,
    pub origin: String,
}

impl FieldSource for RawFieldSource {
    fn describe(&self) -> String {
        self.origin.clone()
    }

    fn read(&self) -> Result<FieldDataset> {
        let mut dataset = self.header.clone();
        let point_count = dataset.point_count();
        let byte_len = point_count * size_of::<f32>();

        for array_ref in std::mem::take(&mut dataset.raw_arrays) {
            let end = array_ref.offset.checked_add(byte_len).ok_or_else(|| {
                FieldError::data_format(format!(
                    "array '{}': blob offset overflows",
                    array_ref.name
                ))
            })?;
            if end > self.blob.len() {
                return Err(FieldError::data_format(format!(
                    "array '{}': blob ends at {} but {} bytes are required",
                    array_ref.name,
                    self.blob.len(),
                    end
                )));
            }
            // Blobs are little-endian f32, one value per grid point
            let values: Vec<f32> = self.blob[array_ref.offset..end]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            dataset.arrays.insert(array_ref.name, values);
        }

        Ok(dataset)
    }
}

/// Already-materialised dataset, used by the asset loading path and tests.
pub struct InMemorySource {
    dataset: FieldDataset,
    origin: String,
}

impl InMemorySource {
    pub fn new(dataset: FieldDataset) -> Self {
        Self {
            dataset,
            origin: "memory".to_string(),
        }
    }

    pub fn with_origin(dataset: FieldDataset, origin: impl Into<String>) -> Self {
        Self {
            dataset,
            origin: origin.into(),
        }
    }
}

impl FieldSource for InMemorySource {
    fn describe(&self) -> String {
        self.origin.clone()
    }

    fn read(&self) -> Result<FieldDataset> {
        Ok(self.dataset.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::TEMPERATURE_ARRAY;

    fn header(n: usize) -> FieldDataset {
        FieldDataset {
            case_name: "raw".to_string(),
            dimensions: [n, n, n],
            origin: [0.0, 0.0, 0.0],
            spacing: [1.0, 1.0, 1.0],
            arrays: HashMap::new(),
            labels: HashMap::new(),
            raw_arrays: vec![RawArrayRef {
                name: TEMPERATURE_ARRAY.to_string(),
                offset: 0,
            }],
        }
    }

    #[test]
    fn raw_source_decodes_blob_values() {
        let values: Vec<f32> = (0..8).map(|i| i as f32 * 0.5).collect();
        let blob: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let source = RawFieldSource {
            header: header(2),
            blob,
            origin: "test".to_string(),
        };
        let dataset = source.read().unwrap();
        assert_eq!(dataset.arrays[TEMPERATURE_ARRAY], values);
        assert!(dataset.raw_arrays.is_empty());
    }

    #[test]
    fn raw_source_rejects_short_blob() {
        let source = RawFieldSource {
            header: header(2),
            blob: vec![0u8; 8 * 4 - 1],
            origin: "test".to_string(),
        };
        assert!(matches!(
            source.read(),
            Err(FieldError::DataFormat { .. })
        ));
    }

    #[test]
    fn json_source_round_trips() {
        let mut dataset = header(2);
        dataset.raw_arrays.clear();
        dataset
            .arrays
            .insert(TEMPERATURE_ARRAY.to_string(), vec![1.0; 8]);
        let text = serde_json::to_string(&dataset).unwrap();

        let source = JsonFieldSource {
            text,
            origin: "test".to_string(),
        };
        let parsed = source.read().unwrap();
        assert_eq!(parsed.dimensions, [2, 2, 2]);
        assert_eq!(parsed.arrays[TEMPERATURE_ARRAY].len(), 8);
    }
}
