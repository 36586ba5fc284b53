//! Pipeline error taxonomy.

use bevy::math::Vec3;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FieldError>;

/// Errors the pipeline surfaces to callers. Load failures keep the previous
/// field active; parameter errors reject the single request; extraction
/// failures degrade one derived entity without touching the rest.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FieldError {
    #[error("malformed field dataset: {reason}")]
    DataFormat { reason: String },

    #[error("threshold {value} outside observed range [{min}, {max}]")]
    InvalidThreshold { value: f32, min: f32, max: f32 },

    #[error("point ({}, {}, {}) outside grid bounds", point.x, point.y, point.z)]
    OutOfBounds { point: Vec3 },

    #[error("unknown scalar array: {name}")]
    UnknownArray { name: String },

    #[error("extraction failed: {reason}")]
    Extraction { reason: String },
}

impl FieldError {
    pub fn data_format(reason: impl Into<String>) -> Self {
        Self::DataFormat {
            reason: reason.into(),
        }
    }

    pub fn extraction(reason: impl Into<String>) -> Self {
        Self::Extraction {
            reason: reason.into(),
        }
    }
}
