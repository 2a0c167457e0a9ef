//! Heat-FX tracker: follows the temperature around a moving owner, resolves
//! where the heat comes from, and reports meaningful changes as events.

use crate::compose::ThermalComposer;
use crate::core_types::Vec3;
use crate::field::Channel;
use crate::volume::Volume;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use tracing::debug;

// Change-detection tolerances
const EPS_TEMP_C: f32 = 1e-2;
const EPS_DIR: f32 = 1e-3;
const EPS_POS_CM: f32 = 0.5;
const EPS_DIST_CM: f32 = 0.5;
const EPS_STRENGTH: f32 = 1e-3;

const MIN_PROBE_RADIUS_CM: f32 = 10.0;

/// Fixed sampling knobs: summer at noon, light cloud.
const FX_IS_WINTER: bool = false;
const FX_HOUR: f32 = 12.0;
const FX_WEATHER_ALPHA: f32 = 0.3;

/// How the heat origin is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeatOriginMode {
    #[default]
    NearestSource,
    HottestPoint,
    ColdestPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatFxSettings {
    pub origin_mode: HeatOriginMode,
    /// A temperature change at least this large is a jump (°C)
    pub change_threshold_c: f32,
    /// Search radius for the hottest/coldest modes (cm)
    pub probe_radius_cm: f32,
    /// Ring samples when no baked field is available, 4..=64
    pub probe_samples: usize,
    /// Forwarded to material parameters (cm)
    pub reference_radius_cm: f32,
}

impl Default for HeatFxSettings {
    fn default() -> Self {
        Self {
            origin_mode: HeatOriginMode::NearestSource,
            change_threshold_c: 10.0,
            probe_radius_cm: 300.0,
            probe_samples: 12,
            reference_radius_cm: 200.0,
        }
    }
}

/// Floats in the material parameter block: 9 live values, then 7 baked.
pub const MATERIAL_PARAMETER_COUNT: usize = 16;

/// Baked-only readings at the owner and its nearest baked cell.
///
/// All zero when no baked volume is available.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BakedFxSample {
    /// Ambient + solar at the owner, sky view sampled trilinearly (°C)
    pub owner_temp_c: f32,
    pub cell_center_ws: Vec3,
    /// Ambient + solar at the cell centre (°C)
    pub cell_temp_c: f32,
    pub cell_sky01: f32,
    pub cell_size_cm: f32,
}

impl BakedFxSample {
    /// Sample the field under `owner` with the fixed FX knobs.
    pub fn at(composer: &ThermalComposer<'_>, owner: &Vec3) -> Self {
        let Some(cell) = composer.nearest_baked_cell(owner) else {
            return Self::default();
        };
        let Some(grid) = composer.volumes().get(cell.volume).and_then(Volume::grid) else {
            return Self::default();
        };

        let weather = composer.settings().climate.default_weather_alpha01;
        let climate = composer.climate();
        let owner_sky = grid.sample_trilinear(Channel::SkyView, owner).clamp(0.0, 1.0);
        let center = cell.cell_center_ws;

        Self {
            owner_temp_c: climate.ambient_celsius_at(FX_IS_WINTER, FX_HOUR, owner.z)
                + composer.solar_gain(owner_sky, weather),
            cell_center_ws: center,
            cell_temp_c: climate.ambient_celsius_at(FX_IS_WINTER, FX_HOUR, center.z)
                + composer.solar_gain(cell.sky_view, weather),
            cell_sky01: cell.sky_view,
            cell_size_cm: cell.cell_size_cm,
        }
    }
}

/// Last published heat payload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeatFxState {
    pub temp_c: f32,
    /// Unit direction from the owner to the origin; zero when unknown
    pub heat_dir_ws: Vec3,
    pub source_pos_ws: Vec3,
    pub distance_cm: f32,
    /// Inverse distance for the nearest-source mode, |ΔT| for probe modes
    pub heat_strength: f32,
    pub origin_mode: HeatOriginMode,
    pub has_origin: bool,
    /// Refreshed with every published update
    pub baked: BakedFxSample,
}

impl HeatFxState {
    /// Material parameter block:
    ///
    /// ```text
    /// [0..3)   heat direction
    /// [3]      composed temperature
    /// [4..7)   origin position
    /// [7]      heat strength
    /// [8]      reference radius
    /// [9]      baked temperature at the owner
    /// [10..13) nearest baked cell centre
    /// [13]     baked temperature of that cell
    /// [14]     its sky view
    /// [15]     its cell size
    /// ```
    pub fn material_parameters(&self, reference_radius_cm: f32) -> [f32; MATERIAL_PARAMETER_COUNT] {
        let baked = &self.baked;
        [
            self.heat_dir_ws.x,
            self.heat_dir_ws.y,
            self.heat_dir_ws.z,
            self.temp_c,
            self.source_pos_ws.x,
            self.source_pos_ws.y,
            self.source_pos_ws.z,
            self.heat_strength,
            reference_radius_cm,
            baked.owner_temp_c,
            baked.cell_center_ws.x,
            baked.cell_center_ws.y,
            baked.cell_center_ws.z,
            baked.cell_temp_c,
            baked.cell_sky01,
            baked.cell_size_cm,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeatFxEvent {
    /// Something meaningful changed
    Updated(HeatFxState),
    /// Temperature moved by at least the change threshold
    Jump {
        new_temp_c: f32,
        prev_temp_c: f32,
        delta_c: f32,
        state: HeatFxState,
    },
}

/// Nearest-source result for one registry revision and owner position.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SourceLookup {
    revision: u64,
    owner: Vec3,
    origin: Option<(Vec3, f32)>,
}

#[derive(Debug, Clone, Default)]
pub struct HeatFxTracker {
    settings: HeatFxSettings,
    state: HeatFxState,
    initialized: bool,
    last_lookup: Option<SourceLookup>,
}

impl HeatFxTracker {
    pub fn new(settings: HeatFxSettings) -> Self {
        Self {
            settings,
            state: HeatFxState {
                origin_mode: settings.origin_mode,
                ..HeatFxState::default()
            },
            initialized: false,
            last_lookup: None,
        }
    }

    pub fn settings(&self) -> &HeatFxSettings {
        &self.settings
    }

    pub fn set_origin_mode(&mut self, mode: HeatOriginMode) {
        self.settings.origin_mode = mode;
    }

    pub fn state(&self) -> &HeatFxState {
        &self.state
    }

    pub fn has_origin(&self) -> bool {
        self.state.has_origin
    }

    pub fn material_parameters(&self) -> [f32; MATERIAL_PARAMETER_COUNT] {
        self.state.material_parameters(self.settings.reference_radius_cm)
    }

    /// Resample around `owner` and return the events this update raised.
    ///
    /// The first update always publishes. Later updates publish only when a
    /// field moved past its tolerance. A jump is never raised on the first
    /// update.
    pub fn update(&mut self, composer: &ThermalComposer<'_>, owner: &Vec3, time: DateTime<Utc>) -> Vec<HeatFxEvent> {
        let temp_c = sample_temperature(composer, owner);
        let mode = self.settings.origin_mode;
        let origin = match mode {
            HeatOriginMode::NearestSource => self.nearest_source(composer, owner),
            HeatOriginMode::HottestPoint => Some(self.probe_origin(composer, owner, true, time)),
            HeatOriginMode::ColdestPoint => Some(self.probe_origin(composer, owner, false, time)),
        };

        let (source_pos_ws, heat_strength) = origin.unwrap_or((Vec3::zeros(), 0.0));
        let (heat_dir_ws, distance_cm) = match origin {
            Some((pos, _)) => {
                let offset = pos - owner;
                (offset.try_normalize(1e-8).unwrap_or_else(Vec3::zeros), offset.norm())
            }
            None => (Vec3::zeros(), 0.0),
        };

        let mut next = HeatFxState {
            temp_c,
            heat_dir_ws,
            source_pos_ws,
            distance_cm,
            heat_strength,
            origin_mode: mode,
            has_origin: origin.is_some(),
            baked: self.state.baked,
        };
        let prev = self.state;
        let changed = !self.initialized
            || (next.temp_c - prev.temp_c).abs() > EPS_TEMP_C
            || (next.heat_dir_ws - prev.heat_dir_ws).amax() > EPS_DIR
            || (next.source_pos_ws - prev.source_pos_ws).amax() > EPS_POS_CM
            || (next.distance_cm - prev.distance_cm).abs() > EPS_DIST_CM
            || (next.heat_strength - prev.heat_strength).abs() > EPS_STRENGTH;
        if !changed {
            return Vec::new();
        }

        next.baked = BakedFxSample::at(composer, owner);

        let mut events = Vec::with_capacity(2);
        let delta_c = next.temp_c - prev.temp_c;
        if self.initialized && delta_c.abs() >= self.settings.change_threshold_c {
            debug!("Heat jump {:.1} -> {:.1} °C", prev.temp_c, next.temp_c);
            events.push(HeatFxEvent::Jump {
                new_temp_c: next.temp_c,
                prev_temp_c: prev.temp_c,
                delta_c,
                state: next,
            });
        }
        events.push(HeatFxEvent::Updated(next));

        self.state = next;
        self.initialized = true;
        events
    }

    /// Nearest source, searched again only when the registry revision or the
    /// owner position changed since the last search.
    fn nearest_source(&mut self, composer: &ThermalComposer<'_>, owner: &Vec3) -> Option<(Vec3, f32)> {
        let revision = composer.sources().revision();
        if let Some(lookup) = self.last_lookup {
            if lookup.revision == revision && lookup.owner == *owner {
                return lookup.origin;
            }
        }
        let origin = find_nearest_source(composer, owner);
        self.last_lookup = Some(SourceLookup {
            revision,
            owner: *owner,
            origin,
        });
        origin
    }

    /// Hottest or coldest point near `owner`, with strength |ΔT| against the
    /// owner's temperature. Uses the baked field when there is one, else a
    /// ring of runtime samples.
    fn probe_origin(
        &self,
        composer: &ThermalComposer<'_>,
        owner: &Vec3,
        hottest: bool,
        time: DateTime<Utc>,
    ) -> (Vec3, f32) {
        if let Some(hit) = composer.find_extreme_near(owner, self.settings.probe_radius_cm, hottest, time) {
            let center = composer.compose_baked_only_temperature_at(owner, FX_IS_WINTER, FX_HOUR, FX_WEATHER_ALPHA);
            return (hit.cell_center_ws, (hit.current_temp_c - center).abs());
        }

        let radius = self.settings.probe_radius_cm.max(MIN_PROBE_RADIUS_CM);
        let count = self.settings.probe_samples.clamp(4, 64);
        let center = sample_temperature(composer, owner);

        let mut best = (*owner, if hottest { f32::MIN } else { f32::MAX });
        for i in 0..count {
            let angle = 2.0 * PI * (i as f32 / count as f32);
            let at = owner + Vec3::new(angle.cos(), angle.sin(), 0.0) * radius;
            let temp = sample_temperature(composer, &at);
            if (hottest && temp > best.1) || (!hottest && temp < best.1) {
                best = (at, temp);
            }
        }
        (best.0, (best.1 - center).abs())
    }
}

fn sample_temperature(composer: &ThermalComposer<'_>, at: &Vec3) -> f32 {
    composer.compose_temperature_at(at, FX_IS_WINTER, FX_HOUR, FX_WEATHER_ALPHA)
}

/// Closest enabled live source, with strength 1/distance (1 when on top).
fn find_nearest_source(composer: &ThermalComposer<'_>, owner: &Vec3) -> Option<(Vec3, f32)> {
    let position = composer
        .sources()
        .active()
        .map(|(_, source)| source.position())
        .min_by(|a, b| (a - owner).norm_squared().total_cmp(&(b - owner).norm_squared()))?;
    let distance = (position - owner).norm();
    let strength = if distance > EPS_DIST_CM { 1.0 / distance } else { 1.0 };
    Some((position, strength))
}
