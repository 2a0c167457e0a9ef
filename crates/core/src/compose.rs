//! Runtime temperature queries over baked volumes and live heat sources.

use crate::climate::{hour_of_day, lerp, season_alpha_at, ClimateModel};
use crate::config::ThermalSettings;
use crate::core_types::Vec3;
use crate::field::{Channel, FieldGrid};
use crate::occlusion::{OcclusionProbe, RayProvider};
use crate::source::HeatSourceRegistry;
use crate::volume::{VolumeHandle, VolumeSet};
use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use rayon::prelude::*;

/// Largest search radius, in cells, for [`ThermalComposer::find_extreme_near`].
pub const MAX_SEARCH_RADIUS_CELLS: i64 = 1024;

/// Fixed knobs for the extreme-cell search: summer at noon, light cloud.
const SEARCH_IS_WINTER: bool = false;
const SEARCH_HOUR: f32 = 12.0;
const SEARCH_WEATHER_ALPHA: f32 = 0.3;

/// Range mapped onto [0,1] by the heat preview (°C).
const PREVIEW_MIN_C: f32 = -100.0;
const PREVIEW_MAX_C: f32 = 100.0;

/// Nearest baked cell across all volumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BakedCell {
    pub volume: VolumeHandle,
    pub grid_index: Vector3<usize>,
    pub linear_index: usize,
    pub cell_center_ws: Vec3,
    pub distance_sq: f32,
    pub cell_size_cm: f32,
    /// Clamped to [0,1]
    pub sky_view: f32,
    /// Clamped to [0,1]
    pub wall_permeability: f32,
}

/// Result of a timestamped grid query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridHit {
    pub volume: VolumeHandle,
    pub grid_index: Vector3<usize>,
    pub linear_index: usize,
    pub cell_center_ws: Vec3,
    /// Squared distance from the query point to the cell centre (cm²)
    pub distance_sq: f32,
    pub cell_size_cm: f32,
    pub query_time: DateTime<Utc>,
    pub current_temp_c: f32,
}

impl GridHit {
    fn from_cell(cell: &BakedCell, query_time: DateTime<Utc>, current_temp_c: f32) -> Self {
        Self {
            volume: cell.volume,
            grid_index: cell.grid_index,
            linear_index: cell.linear_index,
            cell_center_ws: cell.cell_center_ws,
            distance_sq: cell.distance_sq,
            cell_size_cm: cell.cell_size_cm,
            query_time,
            current_temp_c,
        }
    }
}

/// One cell of a heat preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatPreviewCell {
    pub linear_index: usize,
    pub center_ws: Vec3,
    pub temp_c: f32,
    /// `temp_c` mapped from [-100, 100] °C onto [0,1]
    pub heat01: f32,
}

/// Read-only query engine. Borrowing the volumes and sources for its
/// lifetime keeps grid commits and registry changes out of query bursts.
#[derive(Debug, Clone, Copy)]
pub struct ThermalComposer<'a> {
    settings: &'a ThermalSettings,
    climate: ClimateModel,
    volumes: &'a VolumeSet,
    sources: &'a HeatSourceRegistry,
    probe: OcclusionProbe<'a>,
}

impl<'a> ThermalComposer<'a> {
    pub fn new(
        settings: &'a ThermalSettings,
        volumes: &'a VolumeSet,
        sources: &'a HeatSourceRegistry,
        world: &'a dyn RayProvider,
    ) -> Self {
        let climate = ClimateModel::new(settings);
        Self {
            settings,
            climate,
            volumes,
            sources,
            probe: OcclusionProbe::new(climate, world),
        }
    }

    pub fn climate(&self) -> &ClimateModel {
        &self.climate
    }

    pub fn probe(&self) -> &OcclusionProbe<'a> {
        &self.probe
    }

    pub fn settings(&self) -> &ThermalSettings {
        self.settings
    }

    pub fn sources(&self) -> &HeatSourceRegistry {
        self.sources
    }

    pub fn volumes(&self) -> &VolumeSet {
        self.volumes
    }

    /// Nearest baked cell, preferring volumes that contain `world`.
    pub fn nearest_baked_cell(&self, world: &Vec3) -> Option<BakedCell> {
        let mut containing: Option<BakedCell> = None;
        let mut any: Option<BakedCell> = None;

        for (handle, volume, grid) in self.volumes.baked() {
            let Some(nearest) = grid.nearest_cell(world) else {
                continue;
            };
            let cell = BakedCell {
                volume: handle,
                grid_index: nearest.index,
                linear_index: nearest.linear_index,
                cell_center_ws: nearest.center_ws,
                distance_sq: nearest.distance_sq,
                cell_size_cm: grid.cell_size_cm(),
                sky_view: grid
                    .sample_by_linear_index(Channel::SkyView, nearest.linear_index)
                    .clamp(0.0, 1.0),
                wall_permeability: grid
                    .sample_by_linear_index(Channel::WallPermeability, nearest.linear_index)
                    .clamp(0.0, 1.0),
            };

            if volume.contains(world) && is_closer(&cell, containing.as_ref()) {
                containing = Some(cell);
            }
            if is_closer(&cell, any.as_ref()) {
                any = Some(cell);
            }
        }

        containing.or(any)
    }

    /// Solar warming (°C) for a sky view fraction under `weather_alpha` cloud.
    pub fn solar_gain(&self, sky_view: f32, weather_alpha: f32) -> f32 {
        self.settings.climate.solar_gain_scale_c * sky_view * (1.0 - weather_alpha.clamp(0.0, 1.0))
    }

    fn sky_and_wall(&self, world: &Vec3) -> (f32, f32) {
        self.nearest_baked_cell(world).map_or(
            (Channel::SkyView.default_value(), Channel::WallPermeability.default_value()),
            |c| (c.sky_view, c.wall_permeability),
        )
    }

    /// Sum of live source deltas at `world`, each attenuated by occlusion to
    /// the source and by the local wall permeability. Sources whose bounds
    /// miss `world` are skipped before sampling.
    pub fn source_contribution(&self, world: &Vec3, wall_permeability: f32) -> f32 {
        let cell = self.settings.grid.default_cell_size_cm;
        self.sources
            .active()
            .filter(|(_, source)| source.bounds_world().contains(world))
            .map(|(_, source)| (source, source.sample_at(world)))
            .filter(|(_, delta)| *delta != 0.0)
            .map(|(source, delta)| {
                let occlusion = self
                    .probe
                    .segment_permeability01(world, &source.position(), cell);
                delta * occlusion * wall_permeability
            })
            .sum()
    }

    /// Ambient + solar + attenuated sources (°C).
    pub fn compose_temperature_at(&self, world: &Vec3, is_winter: bool, hour: f32, weather_alpha: f32) -> f32 {
        let (sky, wall) = self.sky_and_wall(world);
        let ambient = self.climate.ambient_celsius_at(is_winter, hour, world.z);
        ambient + self.solar_gain(sky, weather_alpha) + self.source_contribution(world, wall)
    }

    /// Ambient + solar only, ignoring dynamic sources (°C).
    pub fn compose_baked_only_temperature_at(
        &self,
        world: &Vec3,
        is_winter: bool,
        hour: f32,
        weather_alpha: f32,
    ) -> f32 {
        let (sky, _) = self.sky_and_wall(world);
        self.climate.ambient_celsius_at(is_winter, hour, world.z) + self.solar_gain(sky, weather_alpha)
    }

    /// Nearest baked cell with a temperature for `query_time`.
    ///
    /// The composed temperature is blended between winter and summer on the
    /// 15:00-peak curve, then shifted by the difference between the
    /// 12:00-peak ambient and the blended baseline ambient. Both curves are
    /// kept on purpose; the shift avoids jumps across the seasonal blend.
    pub fn query_nearest_baked_grid_point(&self, world: &Vec3, query_time: DateTime<Utc>) -> Option<GridHit> {
        let cell = self.nearest_baked_cell(world)?;
        let weather = self.settings.preview.weather_alpha;
        let hours = hour_of_day(&query_time);
        let alpha = season_alpha_at(&query_time);
        let at = cell.cell_center_ws;

        let base_winter = self.compose_temperature_at(&at, true, hours, weather);
        let base_summer = self.compose_temperature_at(&at, false, hours, weather);
        let baseline_total = lerp(base_winter, base_summer, alpha);

        let baseline_ambient = self.climate.blended_ambient_celsius_at(alpha, hours, at.z);
        let desired_ambient = self.climate.corrected_ambient_celsius_at(alpha, hours, at.z);

        let current = baseline_total + (desired_ambient - baseline_ambient);
        Some(GridHit::from_cell(&cell, query_time, current))
    }

    pub fn query_nearest_baked_grid_point_now(&self, world: &Vec3) -> Option<GridHit> {
        self.query_nearest_baked_grid_point(world, Utc::now())
    }

    /// Baked-only temperature of one cell with the search knobs.
    fn search_temperature(&self, grid: &FieldGrid, linear_index: usize, center_ws: &Vec3) -> f32 {
        let sky = grid
            .sample_by_linear_index(Channel::SkyView, linear_index)
            .clamp(0.0, 1.0);
        let ambient = self
            .climate
            .ambient_celsius_at(SEARCH_IS_WINTER, SEARCH_HOUR, center_ws.z);
        ambient + self.solar_gain(sky, SEARCH_WEATHER_ALPHA)
    }

    /// Hottest (or coldest) baked cell within `radius_cm` of `center`.
    ///
    /// Searches the volume chosen as in [`Self::nearest_baked_cell`] over a
    /// sphere of whole cells, scoring each with the baked-only composition
    /// for summer at 12:00 and weather 0.3.
    pub fn find_extreme_near(
        &self,
        center: &Vec3,
        radius_cm: f32,
        prefer_hottest: bool,
        query_time: DateTime<Utc>,
    ) -> Option<GridHit> {
        let seed = self.nearest_baked_cell(center)?;
        let grid = self.volumes.get(seed.volume)?.grid()?;
        let dims = grid.dims().map(|d| d as i64);
        let cell = grid.cell_size_cm().max(1.0);

        let origin = seed.grid_index.map(|i| i as i64);
        let radius = (radius_cm / cell)
            .ceil()
            .clamp(0.0, MAX_SEARCH_RADIUS_CELLS as f32) as i64;

        let mut best: Option<(f32, Vector3<usize>, usize, Vec3)> = None;
        for z in (origin.z - radius).max(0)..=(origin.z + radius).min(dims.z - 1) {
            for y in (origin.y - radius).max(0)..=(origin.y + radius).min(dims.y - 1) {
                for x in (origin.x - radius).max(0)..=(origin.x + radius).min(dims.x - 1) {
                    let delta = Vector3::new(x, y, z) - origin;
                    if delta.dot(&delta) > radius * radius {
                        continue;
                    }

                    let index = Vector3::new(x as usize, y as usize, z as usize);
                    let linear = grid.linear_index(index.x, index.y, index.z);
                    let center_ws = grid.cell_center_world(index);
                    let temp = self.search_temperature(grid, linear, &center_ws);

                    let better = match best {
                        None => true,
                        Some((best_temp, ..)) if prefer_hottest => temp > best_temp,
                        Some((best_temp, ..)) => temp < best_temp,
                    };
                    if better {
                        best = Some((temp, index, linear, center_ws));
                    }
                }
            }
        }

        let (temp, index, linear, center_ws) = best?;
        Some(GridHit {
            volume: seed.volume,
            grid_index: index,
            linear_index: linear,
            cell_center_ws: center_ws,
            distance_sq: (center_ws - center).norm_squared(),
            cell_size_cm: grid.cell_size_cm(),
            query_time,
            current_temp_c: temp,
        })
    }

    /// Permeability of the straight path between two points.
    pub fn occlusion_between(&self, a: &Vec3, b: &Vec3, cell_size_cm: f32) -> f32 {
        self.probe.segment_permeability01(a, b, cell_size_cm)
    }

    /// Composed temperature of every cell of a baked volume with the preview
    /// knobs, normalized over [-100, 100] °C.
    pub fn heat_preview(&self, volume: VolumeHandle) -> Option<Vec<HeatPreviewCell>> {
        let grid = self.volumes.get(volume)?.grid()?;
        let preview = self.settings.preview;
        let range = (PREVIEW_MAX_C - PREVIEW_MIN_C).max(1e-6);

        let cells = (0..grid.cell_count())
            .into_par_iter()
            .map(|linear_index| {
                let center_ws = grid.cell_center_world(grid.cell_of_index(linear_index));
                let temp_c = self.compose_temperature_at(
                    &center_ws,
                    preview.season_is_winter,
                    preview.time_of_day_hours,
                    preview.weather_alpha,
                );
                HeatPreviewCell {
                    linear_index,
                    center_ws,
                    temp_c,
                    heat01: ((temp_c - PREVIEW_MIN_C) / range).clamp(0.0, 1.0),
                }
            })
            .collect();
        Some(cells)
    }
}

fn is_closer(cell: &BakedCell, current: Option<&BakedCell>) -> bool {
    match current {
        None => true,
        Some(best) => cell.distance_sq < best.distance_sq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{frame_from_degrees, Aabb, Frame};
    use crate::field::GridDims;
    use crate::occlusion::{ObstacleScene, OpenSky};
    use crate::source::{Falloff, HeatSource};
    use crate::volume::Volume;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn volume_with_grid(location: Vec3, extent: Vec3, grid: FieldGrid) -> Volume {
        let mut v = Volume::bounded(location, extent);
        v.attach_grid(grid);
        v
    }

    fn open_grid(dims: GridDims, cell: f32, origin: Vec3) -> FieldGrid {
        FieldGrid::filled(dims, cell, Frame::translation(origin.x, origin.y, origin.z), 1.0, 1.0).unwrap()
    }

    #[test]
    fn test_ambient_plus_full_sun() {
        let settings = ThermalSettings::default();
        let mut volumes = VolumeSet::new();
        volumes.insert(volume_with_grid(
            Vec3::repeat(200.0),
            Vec3::repeat(200.0),
            open_grid(GridDims::new(4, 4, 4), 100.0, Vec3::zeros()),
        ));
        let sources = HeatSourceRegistry::new();
        let composer = ThermalComposer::new(&settings, &volumes, &sources, &OpenSky);

        let p = Vec3::new(120.0, 210.0, 0.0);
        let ambient = composer.climate().ambient_celsius_at(false, 15.0, p.z);
        let t = composer.compose_temperature_at(&p, false, 15.0, 0.0);
        assert_relative_eq!(t, ambient + 6.0, epsilon = 1e-5);

        // Full cloud removes solar gain
        let t = composer.compose_temperature_at(&p, false, 15.0, 1.0);
        assert_relative_eq!(t, ambient, epsilon = 1e-5);
    }

    #[test]
    fn test_no_baked_volume_uses_defaults() {
        let settings = ThermalSettings::default();
        let volumes = VolumeSet::new();
        let mut sources = HeatSourceRegistry::new();
        sources.spawn(HeatSource::point(Vec3::zeros(), 10.0, 300.0, Falloff::Linear));
        let composer = ThermalComposer::new(&settings, &volumes, &sources, &OpenSky);

        let p = Vec3::new(150.0, 0.0, 0.0);
        assert!(composer.nearest_baked_cell(&p).is_none());
        // Sky 0, wall 1: ambient plus the unattenuated source
        let ambient = composer.climate().ambient_celsius_at(true, 3.0, 0.0);
        assert_relative_eq!(
            composer.compose_temperature_at(&p, true, 3.0, 0.0),
            ambient + 5.0,
            epsilon = 1e-5
        );
        assert!(composer.query_nearest_baked_grid_point(&p, Utc::now()).is_none());
        assert!(composer.find_extreme_near(&p, 500.0, true, Utc::now()).is_none());
    }

    #[test]
    fn test_sources_scaled_by_occlusion_and_wall() {
        let settings = ThermalSettings::default();
        let mut volumes = VolumeSet::new();
        let grid = FieldGrid::filled(GridDims::new(4, 4, 4), 100.0, Frame::identity(), 0.0, 0.5).unwrap();
        volumes.insert(volume_with_grid(Vec3::repeat(200.0), Vec3::repeat(200.0), grid));

        let mut sources = HeatSourceRegistry::new();
        sources.spawn(HeatSource::point(Vec3::new(200.0, 200.0, 200.0), 20.0, 400.0, Falloff::None));
        let off = sources.spawn(HeatSource::point(Vec3::new(200.0, 200.0, 200.0), 50.0, 400.0, Falloff::None));
        sources.get_mut(off).unwrap().enabled = false;

        let p = Vec3::new(100.0, 200.0, 200.0);
        let composer = ThermalComposer::new(&settings, &volumes, &sources, &OpenSky);
        let baked = composer.compose_baked_only_temperature_at(&p, false, 9.0, 0.3);
        let full = composer.compose_temperature_at(&p, false, 9.0, 0.3);
        assert_relative_eq!(full - baked, 20.0 * 0.5, epsilon = 1e-4);

        // A dense wall between point and source attenuates further
        let mut scene = ObstacleScene::new();
        scene.add_box(
            Aabb::new(Vec3::new(140.0, 0.0, 0.0), Vec3::new(160.0, 400.0, 400.0)),
            Some(3000.0),
        );
        let blocked = ThermalComposer::new(&settings, &volumes, &sources, &scene);
        let occ = blocked.occlusion_between(&p, &Vec3::new(200.0, 200.0, 200.0), 250.0);
        assert!(occ < 1.0);
        let full_blocked = blocked.compose_temperature_at(&p, false, 9.0, 0.3);
        assert_relative_eq!(full_blocked - baked, 20.0 * occ * 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_source_contribution_matches_samples() {
        let settings = ThermalSettings::default();
        let volumes = VolumeSet::new();
        let mut sources = HeatSourceRegistry::new();
        sources.spawn(HeatSource::point(Vec3::zeros(), 10.0, 300.0, Falloff::None));
        sources.spawn(HeatSource::boxed(
            frame_from_degrees(Vec3::new(1000.0, 0.0, 0.0), [0.0, 0.0, 90.0]),
            8.0,
            Vec3::new(300.0, 50.0, 50.0),
        ));
        let composer = ThermalComposer::new(&settings, &volumes, &sources, &OpenSky);

        let points = [
            (Vec3::new(150.0, 0.0, 0.0), 10.0),
            (Vec3::new(1000.0, 250.0, 0.0), 8.0),
            (Vec3::new(1250.0, 0.0, 0.0), 0.0),
            (Vec3::new(0.0, 0.0, 2000.0), 0.0),
        ];
        for (p, expected) in &points {
            let sampled: f32 = sources.active().map(|(_, s)| s.sample_at(p)).sum();
            assert_eq!(sampled, *expected);
            assert_relative_eq!(composer.source_contribution(p, 1.0), *expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_nearest_prefers_containing_volume() {
        let settings = ThermalSettings::default();
        let mut volumes = VolumeSet::new();
        // Large volume whose lattice reaches close to the query point
        let big = volumes.insert(volume_with_grid(
            Vec3::new(500.0, 0.0, 0.0),
            Vec3::new(500.0, 100.0, 100.0),
            open_grid(GridDims::new(10, 2, 2), 100.0, Vec3::new(0.0, -100.0, -100.0)),
        ));
        // Small volume containing the point, but with a coarse lattice far away
        let small = volumes.insert(volume_with_grid(
            Vec3::new(1100.0, 0.0, 0.0),
            Vec3::new(200.0, 200.0, 200.0),
            open_grid(GridDims::new(1, 1, 1), 400.0, Vec3::new(1000.0, -200.0, -200.0)),
        ));
        let sources = HeatSourceRegistry::new();
        let composer = ThermalComposer::new(&settings, &volumes, &sources, &OpenSky);

        let p = Vec3::new(1010.0, 0.0, 0.0);
        let hit = composer.nearest_baked_cell(&p).unwrap();
        assert_eq!(hit.volume, small);

        // Outside every volume: global minimum wins
        let q = Vec3::new(500.0, 0.0, 500.0);
        assert_eq!(composer.nearest_baked_cell(&q).unwrap().volume, big);
    }

    #[test]
    fn test_query_applies_phase_correction() {
        let settings = ThermalSettings::default();
        let mut volumes = VolumeSet::new();
        volumes.insert(volume_with_grid(
            Vec3::repeat(100.0),
            Vec3::repeat(100.0),
            open_grid(GridDims::new(2, 2, 2), 100.0, Vec3::zeros()),
        ));
        let sources = HeatSourceRegistry::new();
        let composer = ThermalComposer::new(&settings, &volumes, &sources, &OpenSky);

        // Peak summer, noon
        let t = Utc.with_ymd_and_hms(2025, 6, 21, 12, 0, 0).unwrap();
        let hit = composer.query_nearest_baked_grid_point(&Vec3::new(40.0, 40.0, 40.0), t).unwrap();
        assert_eq!(hit.query_time, t);

        let alpha = season_alpha_at(&t);
        let z = hit.cell_center_ws.z;
        let climate = composer.climate();
        let solar = 6.0 * 1.0 * (1.0 - 0.3);
        let expected = climate.corrected_ambient_celsius_at(alpha, 12.0, z) + solar;
        assert_relative_eq!(hit.current_temp_c, expected, epsilon = 1e-3);
    }

    #[test]
    fn test_heat_preview_normalizes_range() {
        let settings = ThermalSettings::default();
        let mut volumes = VolumeSet::new();
        let h = volumes.insert(volume_with_grid(
            Vec3::repeat(100.0),
            Vec3::repeat(100.0),
            open_grid(GridDims::new(2, 2, 2), 100.0, Vec3::zeros()),
        ));
        let sources = HeatSourceRegistry::new();
        let composer = ThermalComposer::new(&settings, &volumes, &sources, &OpenSky);

        let cells = composer.heat_preview(h).unwrap();
        assert_eq!(cells.len(), 8);
        for c in &cells {
            assert_relative_eq!(c.heat01, (c.temp_c + 100.0) / 200.0, epsilon = 1e-6);
            assert!(c.heat01 > 0.5, "summer afternoon should be above 0 °C");
        }
    }
}
