//! Seeded probe clouds around a point, evaluated into temperature splats.

use crate::compose::ThermalComposer;
use crate::core_types::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use tracing::debug;

const GOLDEN_RATIO: f32 = 1.618_034;

/// Probes are pushed at least this fraction of the radius from the centre.
const MIN_RADIUS_FRACTION: f32 = 0.3;

/// Fixed evaluation knobs: summer at noon, light cloud.
const PROBE_IS_WINTER: bool = false;
const PROBE_HOUR: f32 = 12.0;
const PROBE_WEATHER_ALPHA: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeCloudSettings {
    pub max_probes: usize,
    pub radius_cm: f32,
    pub seed: u64,
}

impl Default for ProbeCloudSettings {
    fn default() -> Self {
        Self {
            max_probes: 1024,
            radius_cm: 400.0,
            seed: 98761,
        }
    }
}

/// One evaluated probe: offset from the centre and temperature (°C).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    pub offset: Vec3,
    pub temp_c: f32,
}

impl ProbeSample {
    /// Packed as `[rel_x, rel_y, rel_z, temp_c]`.
    pub fn to_pixel(&self) -> [f32; 4] {
        [self.offset.x, self.offset.y, self.offset.z, self.temp_c]
    }
}

/// Offsets of a probe cloud relative to its centre.
///
/// Three quarters of the probes cover the upper dome on a golden-angle
/// spiral; the rest form a vertical stack along Z. Radii are drawn so the
/// cloud is denser towards its shell.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCloud {
    offsets: Vec<Vec3>,
    radius_cm: f32,
}

impl ProbeCloud {
    pub fn generate(count: usize, radius_cm: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let dome_count = count * 3 / 4;
        let stack_count = count - dome_count;
        let mut offsets = Vec::with_capacity(count);

        for i in 0..dome_count {
            let k = (i as f32 + 0.5) / dome_count as f32;
            let phi = 2.0 * PI * k * GOLDEN_RATIO;
            let z: f32 = rng.random_range(0.0..=1.0);
            let ring = (1.0 - z * z).max(0.0).sqrt();
            let dir = Vec3::new(ring * phi.cos(), ring * phi.sin(), z)
                .try_normalize(1e-8)
                .unwrap_or_else(Vec3::zeros);
            offsets.push(dir * shell_radius(&mut rng, radius_cm));
        }

        for j in 0..stack_count {
            let z = -1.0 + 2.0 * (j as f32 + 0.5) / stack_count as f32;
            // Only the sign survives normalization
            let dir = if z.abs() > 1e-8 { Vec3::new(0.0, 0.0, z.signum()) } else { Vec3::zeros() };
            offsets.push(dir * shell_radius(&mut rng, radius_cm));
        }

        debug!("Generated probe cloud: {} probes, radius {:.0} cm", offsets.len(), radius_cm);
        Self { offsets, radius_cm }
    }

    pub fn from_settings(settings: &ProbeCloudSettings) -> Self {
        Self::generate(settings.max_probes, settings.radius_cm, settings.seed)
    }

    pub fn offsets(&self) -> &[Vec3] {
        &self.offsets
    }

    pub fn radius_cm(&self) -> f32 {
        self.radius_cm
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Composed temperature at every probe around `center`.
    pub fn evaluate(&self, composer: &ThermalComposer<'_>, center: &Vec3) -> Vec<ProbeSample> {
        self.offsets
            .par_iter()
            .map(|offset| {
                let at = center + offset;
                ProbeSample {
                    offset: *offset,
                    temp_c: composer.compose_temperature_at(&at, PROBE_IS_WINTER, PROBE_HOUR, PROBE_WEATHER_ALPHA),
                }
            })
            .collect()
    }

    pub fn evaluate_pixels(&self, composer: &ThermalComposer<'_>, center: &Vec3) -> Vec<[f32; 4]> {
        self.evaluate(composer, center)
            .iter()
            .map(ProbeSample::to_pixel)
            .collect()
    }
}

fn shell_radius(rng: &mut StdRng, radius_cm: f32) -> f32 {
    let u: f32 = rng.random();
    let inner = MIN_RADIUS_FRACTION * radius_cm;
    inner + (radius_cm - inner) * u.sqrt()
}
