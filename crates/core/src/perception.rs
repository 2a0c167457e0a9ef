//! Thermal perception helpers: hot-spot probing around a listener and
//! evaluation of reported heat events.

use crate::compose::ThermalComposer;
use crate::core_types::Vec3;
use crate::occlusion::has_line_of_sight;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use tracing::trace;

/// Samples on the near and mid rings.
const NEAR_RING_SAMPLES: usize = 16;
const MID_RING_SAMPLES: usize = 24;

/// Rings at or below this radius are skipped (cm).
const MIN_RING_RADIUS_CM: f32 = 1.0;

/// Strength reaches 1 this far above the threshold (°C).
const HOT_REFERENCE_SPAN_C: f32 = 20.0;

/// Fixed sensing knobs: summer at noon, light cloud.
const SENSE_IS_WINTER: bool = false;
const SENSE_HOUR: f32 = 12.0;
const SENSE_WEATHER_ALPHA: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalSenseConfig {
    /// Radius of the inner probe ring (cm)
    pub near_range_cm: f32,
    /// Radius of the outer probe ring (cm); non-positive reuses the near ring
    pub mid_range_cm: f32,
    /// Temperatures at or below this produce no stimulus (°C)
    pub heat_threshold_c: f32,
    pub use_line_of_sight: bool,
    /// Sub-segments per visibility check, 1..=16
    pub los_steps: u32,
}

impl Default for ThermalSenseConfig {
    fn default() -> Self {
        Self {
            near_range_cm: 2000.0,
            mid_range_cm: 3000.0,
            heat_threshold_c: 4.0,
            use_line_of_sight: true,
            los_steps: 8,
        }
    }
}

/// Heat reported by gameplay at a point.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalEvent {
    pub location: Vec3,
    pub temperature_c: f32,
    pub tag: Option<String>,
}

/// What a listener perceives.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalStimulus {
    /// Normalized in [0,1]; always > 0 for a reported stimulus
    pub strength: f32,
    pub stimulus_location: Vec3,
    pub listener_location: Vec3,
    pub temp_c: f32,
    pub tag: String,
}

/// Map a temperature onto [0,1] above `threshold_c`.
pub fn stimulus_strength(temp_c: f32, threshold_c: f32) -> f32 {
    let hot_reference = (threshold_c + HOT_REFERENCE_SPAN_C).max(threshold_c + 1.0);
    ((temp_c - threshold_c) / (hot_reference - threshold_c)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThermalSense {
    config: ThermalSenseConfig,
}

impl ThermalSense {
    pub fn new(config: ThermalSenseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ThermalSenseConfig {
        &self.config
    }

    fn visible(&self, composer: &ThermalComposer<'_>, from: &Vec3, to: &Vec3) -> bool {
        if !self.config.use_line_of_sight {
            return true;
        }
        let steps = self.config.los_steps.clamp(1, 16);
        has_line_of_sight(composer.probe().world(), from, to, steps)
    }

    fn sense_temperature(composer: &ThermalComposer<'_>, at: &Vec3) -> f32 {
        composer.compose_temperature_at(at, SENSE_IS_WINTER, SENSE_HOUR, SENSE_WEATHER_ALPHA)
    }

    /// Hottest visible point on two horizontal rings around `listener`.
    ///
    /// Returns `(temp_c, location)`, or `None` when every sample is hidden.
    pub fn probe_ring(&self, composer: &ThermalComposer<'_>, listener: &Vec3) -> Option<(f32, Vec3)> {
        let near = self.config.near_range_cm.max(0.0);
        let mid = if self.config.mid_range_cm > 0.0 {
            self.config.mid_range_cm
        } else {
            near
        };
        let rings = [(near, NEAR_RING_SAMPLES), (near.max(mid), MID_RING_SAMPLES)];

        let mut best: Option<(f32, Vec3)> = None;
        for (radius, count) in rings {
            if radius <= MIN_RING_RADIUS_CM {
                continue;
            }
            for i in 0..count {
                let angle = 2.0 * PI * (i as f32 / count as f32);
                let sample = listener + Vec3::new(angle.cos() * radius, angle.sin() * radius, 0.0);
                if !self.visible(composer, listener, &sample) {
                    continue;
                }
                let temp = Self::sense_temperature(composer, &sample);
                let hotter = match best {
                    None => true,
                    Some((best_temp, _)) => temp > best_temp,
                };
                if hotter {
                    best = Some((temp, sample));
                }
            }
        }
        best
    }

    /// Ambient stimulus from the hottest visible ring sample.
    pub fn sense_ambient(&self, composer: &ThermalComposer<'_>, listener: &Vec3) -> Option<ThermalStimulus> {
        let (temp_c, location) = self.probe_ring(composer, listener)?;
        let strength = stimulus_strength(temp_c, self.config.heat_threshold_c);
        if strength <= 0.0 {
            return None;
        }
        trace!("Ambient hot spot {:.1} °C, strength {:.2}", temp_c, strength);
        Some(ThermalStimulus {
            strength,
            stimulus_location: location,
            listener_location: *listener,
            temp_c,
            tag: "ThermalAmbient".to_string(),
        })
    }

    /// Stimulus for a reported event, if the listener can see it.
    ///
    /// The event temperature is raised to the field temperature at the event
    /// location when the field is hotter.
    pub fn evaluate_event(
        &self,
        composer: &ThermalComposer<'_>,
        listener: &Vec3,
        event: &ThermalEvent,
    ) -> Option<ThermalStimulus> {
        if !self.visible(composer, listener, &event.location) {
            return None;
        }
        let field = Self::sense_temperature(composer, &event.location);
        let temp_c = event.temperature_c.max(field);
        let strength = stimulus_strength(temp_c, self.config.heat_threshold_c);
        if strength <= 0.0 {
            return None;
        }
        Some(ThermalStimulus {
            strength,
            stimulus_location: event.location,
            listener_location: *listener,
            temp_c,
            tag: event.tag.clone().unwrap_or_else(|| "Thermal".to_string()),
        })
    }
}
