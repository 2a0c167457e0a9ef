//! Thermal Field Core Library
//!
//! Bakes a volumetric thermal field over a 3D world and composes it at
//! runtime into temperatures for gameplay and AI queries.
//!
//! ## Pipeline
//!
//! - [`BakeEngine`] casts rays from every cell of each queued [`Volume`]
//!   and stores sky view, wall permeability and indoorness in a [`FieldGrid`]
//! - [`ThermalComposer`] combines the baked channels with the
//!   [`ClimateModel`] (seasonal and diurnal ambient, altitude lapse, solar
//!   gain) and with live [`HeatSource`]s attenuated by occlusion
//! - Gameplay helpers build on the composer: probe clouds, perception,
//!   point scoring and heat-FX tracking
//!
//! World geometry is injected through the [`RayProvider`] trait.

// Core types and utilities
pub mod core_types;
pub mod error;
pub mod config;

// Field model and baking
pub mod climate;
pub mod field;
pub mod occlusion;
pub mod volume;
pub mod source;
pub mod bake;

// Runtime queries
pub mod compose;
pub mod probes;
pub mod perception;
pub mod scoring;
pub mod heat_fx;

// Re-export core types
pub use core_types::{Aabb, Frame, Handle, Registry, Vec3};
pub use error::{ThermalError, ThermalResult};
pub use config::ThermalSettings;

// Re-export field and bake types
pub use bake::{BakeEngine, BakePhase, StepOutcome};
pub use climate::ClimateModel;
pub use field::{Channel, FieldGrid, FieldGridRecord, GridDims};
pub use occlusion::{ObstacleScene, OcclusionProbe, OpenSky, RayHit, RayProvider};
pub use source::{Falloff, HeatSource, HeatSourceRegistry, SourceHandle, SourceShape};
pub use volume::{GridOrientationMode, GridOriginMode, Volume, VolumeHandle, VolumeSet};

// Re-export query types
pub use compose::{BakedCell, GridHit, HeatPreviewCell, ThermalComposer};
pub use heat_fx::{BakedFxSample, HeatFxEvent, HeatFxSettings, HeatFxTracker, HeatOriginMode};
pub use perception::{ThermalEvent, ThermalSense, ThermalSenseConfig, ThermalStimulus};
pub use probes::{ProbeCloud, ProbeCloudSettings};
pub use scoring::{ScoreMode, ThermalScoreConfig};
