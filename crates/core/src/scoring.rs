//! Scoring of candidate points by field temperature, for point-query
//! systems that rank locations.

use crate::compose::ThermalComposer;
use crate::core_types::Vec3;
use crate::occlusion::has_line_of_sight;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MIN_HALF_WIDTH_C: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScoreMode {
    /// Peak at the centre of the temperature band
    #[default]
    BandPass,
    HotterBetter,
    ColderBetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalScoreConfig {
    pub mode: ScoreMode,
    /// Band half-width used when a bound is missing, and as the sharpening reference (°C)
    pub band_half_width_c: f32,
    pub min_temp_c: Option<f32>,
    pub max_temp_c: Option<f32>,
    pub require_line_of_sight: bool,
    pub los_steps: u32,
}

impl Default for ThermalScoreConfig {
    fn default() -> Self {
        Self {
            mode: ScoreMode::BandPass,
            band_half_width_c: 2.0,
            min_temp_c: None,
            max_temp_c: None,
            require_line_of_sight: false,
            los_steps: 1,
        }
    }
}

/// Score a temperature under `config`.
///
/// `HotterBetter` and `ColderBetter` return the (negated) temperature.
/// `BandPass` returns 0..=100, peaking at the band centre and sharpened
/// when the band is wide relative to the configured half-width.
pub fn score_temperature(temp_c: f32, config: &ThermalScoreConfig) -> f32 {
    match config.mode {
        ScoreMode::HotterBetter => temp_c,
        ScoreMode::ColderBetter => -temp_c,
        ScoreMode::BandPass => {
            let min_c = config.min_temp_c.unwrap_or(temp_c - config.band_half_width_c);
            let max_c = config.max_temp_c.unwrap_or(temp_c + config.band_half_width_c);
            let center = 0.5 * (min_c + max_c);
            let half = (0.5 * (max_c - min_c)).max(MIN_HALF_WIDTH_C);
            let t = (1.0 - (temp_c - center).abs() / half).clamp(0.0, 1.0);
            let sharpen = (half / config.band_half_width_c.max(MIN_HALF_WIDTH_C)).clamp(0.25, 4.0);
            t.powf(sharpen) * 100.0
        }
    }
}

/// Score one candidate point, or `None` when the item fails: hidden from the
/// querier, or no baked field to read a temperature from.
pub fn score_point(
    composer: &ThermalComposer<'_>,
    item: &Vec3,
    querier: Option<&Vec3>,
    config: &ThermalScoreConfig,
    time: DateTime<Utc>,
) -> Option<f32> {
    if config.require_line_of_sight {
        let from = querier.unwrap_or(item);
        if !has_line_of_sight(composer.probe().world(), from, item, config.los_steps.max(1)) {
            return None;
        }
    }
    let hit = composer.query_nearest_baked_grid_point(item, time)?;
    Some(score_temperature(hit.current_temp_c, config))
}

/// Score every item; failed items are `None`.
pub fn score_points(
    composer: &ThermalComposer<'_>,
    items: &[Vec3],
    querier: Option<&Vec3>,
    config: &ThermalScoreConfig,
    time: DateTime<Utc>,
) -> Vec<Option<f32>> {
    items
        .iter()
        .map(|item| score_point(composer, item, querier, config, time))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThermalSettings;
    use crate::core_types::{Aabb, Frame};
    use crate::field::{FieldGrid, GridDims};
    use crate::occlusion::{ObstacleScene, OpenSky};
    use crate::source::HeatSourceRegistry;
    use crate::volume::{Volume, VolumeSet};
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn band(min: f32, max: f32) -> ThermalScoreConfig {
        ThermalScoreConfig {
            min_temp_c: Some(min),
            max_temp_c: Some(max),
            ..ThermalScoreConfig::default()
        }
    }

    #[test]
    fn test_directional_modes() {
        let hot = ThermalScoreConfig {
            mode: ScoreMode::HotterBetter,
            ..ThermalScoreConfig::default()
        };
        let cold = ThermalScoreConfig {
            mode: ScoreMode::ColderBetter,
            ..ThermalScoreConfig::default()
        };
        assert_eq!(score_temperature(31.5, &hot), 31.5);
        assert_eq!(score_temperature(31.5, &cold), -31.5);
    }

    #[test]
    fn test_band_pass_peaks_at_center() {
        // Half-width 2 matches the reference, so no sharpening
        let config = band(18.0, 22.0);
        assert_relative_eq!(score_temperature(20.0, &config), 100.0);
        assert_relative_eq!(score_temperature(21.0, &config), 50.0, epsilon = 1e-4);
        assert_eq!(score_temperature(22.0, &config), 0.0);
        assert_eq!(score_temperature(30.0, &config), 0.0);
    }

    #[test]
    fn test_band_pass_sharpening() {
        // Half-width 4 against reference 2 squares the falloff
        let config = band(16.0, 24.0);
        assert_relative_eq!(score_temperature(22.0, &config), 25.0, epsilon = 1e-3);

        // Very wide band caps the exponent at 4
        let wide = band(0.0, 40.0);
        let t: f32 = 1.0 - 10.0 / 20.0;
        assert_relative_eq!(score_temperature(30.0, &wide), t.powf(4.0) * 100.0, epsilon = 1e-3);
    }

    #[test]
    fn test_band_pass_without_bounds_centers_on_sample() {
        let config = ThermalScoreConfig::default();
        assert_relative_eq!(score_temperature(-12.0, &config), 100.0);
        // One bound: the other follows the sample
        let min_only = ThermalScoreConfig {
            min_temp_c: Some(10.0),
            ..ThermalScoreConfig::default()
        };
        // Band [10, 16]: centre 13, half 3
        let expected = (1.0_f32 - 1.0 / 3.0).powf(1.5) * 100.0;
        assert_relative_eq!(score_temperature(14.0, &min_only), expected, epsilon = 1e-3);
    }

    #[test]
    fn test_score_point_failures() {
        let settings = ThermalSettings::default();
        let sources = HeatSourceRegistry::new();
        let time = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        let config = ThermalScoreConfig {
            mode: ScoreMode::HotterBetter,
            require_line_of_sight: true,
            los_steps: 4,
            ..ThermalScoreConfig::default()
        };

        // No baked field
        let empty = VolumeSet::new();
        let composer = ThermalComposer::new(&settings, &empty, &sources, &OpenSky);
        assert!(score_point(&composer, &Vec3::zeros(), None, &config, time).is_none());

        let mut volumes = VolumeSet::new();
        let mut volume = Volume::bounded(Vec3::repeat(100.0), Vec3::repeat(100.0));
        volume.attach_grid(FieldGrid::filled(GridDims::new(2, 2, 2), 100.0, Frame::identity(), 1.0, 1.0).unwrap());
        volumes.insert(volume);

        let mut scene = ObstacleScene::new();
        scene.add_box(Aabb::new(Vec3::new(400.0, -50.0, -50.0), Vec3::new(450.0, 50.0, 50.0)), None);
        let composer = ThermalComposer::new(&settings, &volumes, &sources, &scene);

        let item = Vec3::new(50.0, 0.0, 0.0);
        let querier = Vec3::new(1000.0, 0.0, 0.0);
        assert!(score_point(&composer, &item, Some(&querier), &config, time).is_none());

        // Without a querier the item checks against itself
        let score = score_point(&composer, &item, None, &config, time).unwrap();
        let hit = composer.query_nearest_baked_grid_point(&item, time).unwrap();
        assert_eq!(score, hit.current_temp_c);

        let scores = score_points(&composer, &[item, item], Some(&querier), &config, time);
        assert_eq!(scores, vec![None, None]);
    }
}
