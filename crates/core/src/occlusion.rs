//! Ray-based occlusion: turns traces against world geometry into
//! permeability values through the climate model's density mapping.

use crate::climate::ClimateModel;
use crate::core_types::{Aabb, Vec3};

/// Result of a line trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    /// Material density of the hit surface, when the provider knows it
    pub density_kg_m3: Option<f32>,
}

/// World geometry queried by the bake and by source attenuation.
///
/// Implementations must be safe to query from several threads at once.
pub trait RayProvider: Send + Sync {
    /// First blocking hit on the segment `from -> to`, if any.
    fn line_trace(&self, from: &Vec3, to: &Vec3) -> Option<RayHit>;
}

/// Provider with no geometry: every trace misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSky;

impl RayProvider for OpenSky {
    fn line_trace(&self, _from: &Vec3, _to: &Vec3) -> Option<RayHit> {
        None
    }
}

/// Solid box in an [`ObstacleScene`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub bounds: Aabb,
    pub density_kg_m3: Option<f32>,
}

/// Simple provider made of axis-aligned boxes, for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct ObstacleScene {
    obstacles: Vec<Obstacle>,
}

impl ObstacleScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a box with an optional material density.
    pub fn add_box(&mut self, bounds: Aabb, density_kg_m3: Option<f32>) -> &mut Self {
        self.obstacles.push(Obstacle {
            bounds,
            density_kg_m3,
        });
        self
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }
}

impl RayProvider for ObstacleScene {
    fn line_trace(&self, from: &Vec3, to: &Vec3) -> Option<RayHit> {
        self.obstacles
            .iter()
            .filter_map(|o| o.bounds.segment_entry(from, to).map(|t| (t, o)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(t, o)| RayHit {
                point: from + (to - from) * t,
                density_kg_m3: o.density_kg_m3,
            })
    }
}

/// Converts traces into permeability in [0,1] (1 = fully open).
#[derive(Clone, Copy)]
pub struct OcclusionProbe<'w> {
    climate: ClimateModel,
    world: &'w dyn RayProvider,
}

impl<'w> OcclusionProbe<'w> {
    pub fn new(climate: ClimateModel, world: &'w dyn RayProvider) -> Self {
        Self { climate, world }
    }

    pub fn climate(&self) -> &ClimateModel {
        &self.climate
    }

    pub fn world(&self) -> &'w dyn RayProvider {
        self.world
    }

    /// Density used for a hit, following the permeability settings.
    pub fn resolve_density(&self, hit: &RayHit) -> f32 {
        let p = &self.climate.permeability;
        match hit.density_kg_m3 {
            Some(density) if p.use_material_density => density.max(0.0),
            _ if p.treat_missing_material_as_air => p.air_density_kg_m3,
            _ => p.unknown_hit_density_kg_m3,
        }
    }

    /// Ambient (sky) ray: fixed thickness of one face.
    pub fn ray_permeability01(&self, origin: &Vec3, direction: &Vec3, max_length_cm: f32) -> f32 {
        let end = origin + direction * max_length_cm;
        match self.world.line_trace(origin, &end) {
            None => 1.0,
            Some(hit) => self.climate.density_to_permeability(
                self.resolve_density(&hit),
                self.climate.permeability.face_thickness_factor,
            ),
        }
    }

    /// Segment between two points: thickness grows with length in cells.
    pub fn segment_permeability01(&self, a: &Vec3, b: &Vec3, cell_size_cm: f32) -> f32 {
        match self.world.line_trace(a, b) {
            None => 1.0,
            Some(hit) => {
                let cell = cell_size_cm.max(1.0);
                let thickness =
                    ((a - b).norm() / cell) * self.climate.permeability.face_thickness_factor;
                self.climate
                    .density_to_permeability(self.resolve_density(&hit), thickness)
            }
        }
    }
}

/// True when no sub-segment of `from -> to` is blocked.
///
/// The path is split into `steps` (at least one) equal pieces; the last
/// piece ends exactly at `to`.
pub fn has_line_of_sight(world: &dyn RayProvider, from: &Vec3, to: &Vec3, steps: u32) -> bool {
    let steps = steps.max(1);
    let delta = (to - from) / steps as f32;
    let mut start = *from;
    for i in 0..steps {
        let end = if i + 1 == steps { *to } else { start + delta };
        if world.line_trace(&start, &end).is_some() {
            return false;
        }
        start = end;
    }
    true
}

impl std::fmt::Debug for OcclusionProbe<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcclusionProbe")
            .field("climate", &self.climate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThermalSettings;
    use approx::assert_relative_eq;

    fn concrete_wall() -> ObstacleScene {
        let mut scene = ObstacleScene::new();
        scene.add_box(
            Aabb::new(Vec3::new(90.0, -500.0, -500.0), Vec3::new(110.0, 500.0, 500.0)),
            Some(2400.0),
        );
        scene
    }

    #[test]
    fn test_open_sky_is_fully_permeable() {
        let climate = ClimateModel::new(&ThermalSettings::default());
        let probe = OcclusionProbe::new(climate, &OpenSky);
        assert_eq!(probe.ray_permeability01(&Vec3::zeros(), &Vec3::z(), 1000.0), 1.0);
        assert_eq!(
            probe.segment_permeability01(&Vec3::zeros(), &Vec3::new(500.0, 0.0, 0.0), 100.0),
            1.0
        );
    }

    #[test]
    fn test_segment_thickness_scales_with_distance() {
        let climate = ClimateModel::new(&ThermalSettings::default());
        let scene = concrete_wall();
        let probe = OcclusionProbe::new(climate, &scene);

        let near = probe.segment_permeability01(&Vec3::zeros(), &Vec3::new(200.0, 0.0, 0.0), 100.0);
        let far = probe.segment_permeability01(&Vec3::zeros(), &Vec3::new(400.0, 0.0, 0.0), 100.0);
        assert!(far < near);

        let rho_norm = (2400.0 - 1.2) / (3000.0 - 1.2);
        let expected = (-8.0_f32 * rho_norm * 2.0 * 0.6).exp();
        assert_relative_eq!(near, expected, epsilon = 1e-5);

        // Segment that stops before the wall
        assert_eq!(
            probe.segment_permeability01(&Vec3::zeros(), &Vec3::new(50.0, 0.0, 0.0), 100.0),
            1.0
        );
    }

    #[test]
    fn test_ray_uses_face_thickness() {
        let climate = ClimateModel::new(&ThermalSettings::default());
        let scene = concrete_wall();
        let probe = OcclusionProbe::new(climate, &scene);

        let p = probe.ray_permeability01(&Vec3::zeros(), &Vec3::x(), 10_000.0);
        assert_relative_eq!(p, climate.density_to_permeability(2400.0, 0.6), epsilon = 1e-6);
        assert_eq!(probe.ray_permeability01(&Vec3::zeros(), &-Vec3::x(), 10_000.0), 1.0);
    }

    #[test]
    fn test_missing_density_policy() {
        let mut scene = ObstacleScene::new();
        scene.add_box(Aabb::from_center_extent(Vec3::new(100.0, 0.0, 0.0), Vec3::repeat(10.0)), None);

        let mut settings = ThermalSettings::default();
        let as_air = ClimateModel::new(&settings);
        let probe = OcclusionProbe::new(as_air, &scene);
        assert_eq!(probe.ray_permeability01(&Vec3::zeros(), &Vec3::x(), 1000.0), 1.0);

        settings.permeability.treat_missing_material_as_air = false;
        let unknown = ClimateModel::new(&settings);
        let probe = OcclusionProbe::new(unknown, &scene);
        let hit = RayHit {
            point: Vec3::zeros(),
            density_kg_m3: None,
        };
        assert_eq!(probe.resolve_density(&hit), 700.0);
        assert!(probe.ray_permeability01(&Vec3::zeros(), &Vec3::x(), 1000.0) < 1.0);
    }

    #[test]
    fn test_material_lookup_disabled_ignores_density() {
        let mut settings = ThermalSettings::default();
        settings.permeability.use_material_density = false;
        let climate = ClimateModel::new(&settings);
        let scene = concrete_wall();
        let probe = OcclusionProbe::new(climate, &scene);
        let hit = RayHit {
            point: Vec3::zeros(),
            density_kg_m3: Some(2400.0),
        };
        assert_eq!(probe.resolve_density(&hit), 1.2);

        let negative = RayHit {
            point: Vec3::zeros(),
            density_kg_m3: Some(-5.0),
        };
        let default_probe = OcclusionProbe::new(ClimateModel::new(&ThermalSettings::default()), &scene);
        assert_eq!(default_probe.resolve_density(&negative), 0.0);
    }

    #[test]
    fn test_scene_reports_nearest_hit() {
        let mut scene = ObstacleScene::new();
        scene
            .add_box(Aabb::from_center_extent(Vec3::new(300.0, 0.0, 0.0), Vec3::repeat(10.0)), Some(100.0))
            .add_box(Aabb::from_center_extent(Vec3::new(100.0, 0.0, 0.0), Vec3::repeat(10.0)), Some(2000.0));

        let hit = scene
            .line_trace(&Vec3::zeros(), &Vec3::new(1000.0, 0.0, 0.0))
            .expect("hits both boxes");
        assert_relative_eq!(hit.point.x, 90.0, epsilon = 1e-3);
        assert_eq!(hit.density_kg_m3, Some(2000.0));
    }

    #[test]
    fn test_line_of_sight_steps() {
        let scene = concrete_wall();
        let from = Vec3::zeros();
        assert!(has_line_of_sight(&scene, &from, &Vec3::new(80.0, 0.0, 0.0), 4));
        assert!(!has_line_of_sight(&scene, &from, &Vec3::new(300.0, 0.0, 0.0), 4));
        // Zero steps behaves like a single trace
        assert!(!has_line_of_sight(&scene, &from, &Vec3::new(300.0, 0.0, 0.0), 0));
        assert!(has_line_of_sight(&OpenSky, &from, &Vec3::new(300.0, 0.0, 0.0), 8));
    }
}
