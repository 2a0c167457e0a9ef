//! Baked volumetric thermal field and its on-disk layout

pub mod field_grid;
pub mod persistence;

pub use field_grid::{CellLookup, Channel, FieldGrid, GridDims, NearestCell};
pub use persistence::FieldGridRecord;
