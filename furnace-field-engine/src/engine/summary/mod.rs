//! Per-block temperature aggregation for the zone table in the UI.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use constants::{block, material};

use crate::engine::field::{BLOCK_ARRAY, MATERIAL_ARRAY, ScalarField, TEMPERATURE_ARRAY};

/// Aggregate temperature statistics for one furnace block zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    pub id: u8,
    pub name: String,
    pub band: String,
    pub layer: String,
    pub material: String,
    pub point_count: usize,
    pub t_min: f32,
    pub t_max: f32,
    pub t_avg: f32,
}

/// Aggregate the temperature array per block id. Fields without block
/// labels produce an empty table.
pub fn block_table(field: &ScalarField) -> Vec<BlockSummary> {
    let Some(blocks) = field.labels(BLOCK_ARRAY) else {
        return Vec::new();
    };
    let Ok(temperatures) = field.array(TEMPERATURE_ARRAY) else {
        return Vec::new();
    };
    let materials = field.labels(MATERIAL_ARRAY);

    struct Accum {
        count: usize,
        sum: f64,
        min: f32,
        max: f32,
        material_id: u8,
    }

    let mut accum: BTreeMap<u8, Accum> = BTreeMap::new();
    for (idx, (&bid, &temp)) in blocks.iter().zip(temperatures.iter()).enumerate() {
        let entry = accum.entry(bid).or_insert(Accum {
            count: 0,
            sum: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            material_id: materials.map_or(0, |m| m[idx]),
        });
        entry.count += 1;
        entry.sum += temp as f64;
        entry.min = entry.min.min(temp);
        entry.max = entry.max.max(temp);
    }

    accum
        .into_iter()
        .map(|(id, acc)| {
            let (name, band, layer) = block::get_block(id)
                .map(|b| (b.name.to_string(), b.band.to_string(), b.layer.to_string()))
                .unwrap_or_else(|| (format!("Block {id}"), "N/A".to_string(), "N/A".to_string()));
            BlockSummary {
                id,
                name,
                band,
                layer,
                material: material::get_material_name(acc.material_id),
                point_count: acc.count,
                t_min: acc.min,
                t_max: acc.max,
                t_avg: (acc.sum / acc.count as f64) as f32,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::dataset::FieldDataset;
    use std::collections::HashMap;

    fn labelled_field() -> ScalarField {
        let n = 2usize;
        let temps = vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0];
        // Lower z-plane is block 1 (material 1), upper is block 4 (material 2)
        let blocks = vec![1, 1, 1, 1, 4, 4, 4, 4];
        let mats = vec![1, 1, 1, 1, 2, 2, 2, 2];
        let dataset = FieldDataset {
            case_name: "unit".to_string(),
            dimensions: [n, n, n],
            origin: [0.0; 3],
            spacing: [1.0; 3],
            arrays: HashMap::from([(TEMPERATURE_ARRAY.to_string(), temps)]),
            labels: HashMap::from([
                (BLOCK_ARRAY.to_string(), blocks),
                (MATERIAL_ARRAY.to_string(), mats),
            ]),
            raw_arrays: Vec::new(),
        };
        ScalarField::from_dataset(dataset, 1).unwrap()
    }

    #[test]
    fn table_aggregates_per_block() {
        let table = block_table(&labelled_field());
        assert_eq!(table.len(), 2);

        let bottom = &table[0];
        assert_eq!(bottom.id, 1);
        assert_eq!(bottom.name, "Bottom - Hot Face");
        assert_eq!(bottom.material, "Carbon Refractory");
        assert_eq!(bottom.point_count, 4);
        assert_eq!(bottom.t_min, 10.0);
        assert_eq!(bottom.t_max, 40.0);
        assert!((bottom.t_avg - 25.0).abs() < 1e-5);

        let mid = &table[1];
        assert_eq!(mid.id, 4);
        assert_eq!(mid.material, "High-Alumina Brick");
        assert_eq!(mid.t_avg, 65.0);
    }

    #[test]
    fn unlabelled_field_yields_empty_table() {
        let field = crate::engine::field::test_fields::distance_field(3);
        assert!(block_table(&field).is_empty());
    }
}
