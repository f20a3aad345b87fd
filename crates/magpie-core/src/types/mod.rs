//! Core types for magpie.

mod batch;
mod cluster;
mod embedding;
mod entity;
mod mention;
mod relation;

pub use batch::*;
pub use cluster::*;
pub use embedding::Embedding;
pub use entity::*;
pub use mention::Mention;
pub use relation::*;

use crate::error::{ErrorCode, MagpieError, MagpieResult};

/// Check that a confidence-like value is a finite number in [0, 1].
pub(crate) fn check_unit_interval(item_id: &str, what: &str, value: f32) -> MagpieResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MagpieError::invalid_item(
            item_id,
            ErrorCode::ValOutOfRange,
            format!("{} must be within [0, 1], got {}", what, value),
        ))
    }
}
