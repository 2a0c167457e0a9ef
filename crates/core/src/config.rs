//! Thermal settings: climate curves, altitude lapse, permeability model,
//! grid defaults and preview knobs.
//!
//! Every section carries `#[serde(default)]`, so a settings file only needs
//! the keys it overrides.

use crate::error::{ThermalError, ThermalResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Seasonal diurnal curves and solar gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateSettings {
    /// Winter daily mean (°C)
    pub winter_average_c: f32,
    /// Winter peak-to-trough swing (°C)
    pub winter_day_night_delta_c: f32,
    /// Summer daily mean (°C)
    pub summer_average_c: f32,
    /// Summer peak-to-trough swing (°C)
    pub summer_day_night_delta_c: f32,
    /// Cloud cover used when callers do not supply one (0 = clear)
    pub default_weather_alpha01: f32,
    /// Degrees added by full sun at sky view 1 and clear weather
    pub solar_gain_scale_c: f32,
}

impl Default for ClimateSettings {
    fn default() -> Self {
        Self {
            winter_average_c: 5.0,
            winter_day_night_delta_c: 8.0,
            summer_average_c: 28.0,
            summer_day_night_delta_c: 10.0,
            default_weather_alpha01: 0.3,
            solar_gain_scale_c: 6.0,
        }
    }
}

/// Altitude lapse rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AltitudeSettings {
    pub enable_altitude_lapse: bool,
    /// World Z treated as sea level (cm)
    pub sea_level_z_cm: f32,
    /// Cooling per kilometre above sea level (°C/km)
    pub lapse_rate_c_per_km: f32,
}

impl Default for AltitudeSettings {
    fn default() -> Self {
        Self {
            enable_altitude_lapse: true,
            sea_level_z_cm: 0.0,
            lapse_rate_c_per_km: 10.0,
        }
    }
}

/// Density to permeability mapping (Beer-Lambert style attenuation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermeabilitySettings {
    /// Use the density reported by the ray provider when present
    pub use_material_density: bool,
    /// Hits without a density count as air instead of `unknown_hit_density_kg_m3`
    pub treat_missing_material_as_air: bool,
    pub air_density_kg_m3: f32,
    /// Density that maps to full opacity
    pub max_solid_density_kg_m3: f32,
    /// Density assumed for hits without material data
    pub unknown_hit_density_kg_m3: f32,
    /// Absorption coefficient
    pub absorption_beta: f32,
    /// Thickness fraction for ambient rays, also scales segment thickness
    pub face_thickness_factor: f32,
    pub min_permeability_clamp: f32,
    pub max_permeability_clamp: f32,
}

impl Default for PermeabilitySettings {
    fn default() -> Self {
        Self {
            use_material_density: true,
            treat_missing_material_as_air: true,
            air_density_kg_m3: 1.2,
            max_solid_density_kg_m3: 3000.0,
            unknown_hit_density_kg_m3: 700.0,
            absorption_beta: 8.0,
            face_thickness_factor: 0.6,
            min_permeability_clamp: 0.0,
            max_permeability_clamp: 1.0,
        }
    }
}

/// Grid sizing and bake pacing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// Cell edge used by volumes without an override (cm)
    pub default_cell_size_cm: f32,
    /// Cells processed per bake step
    pub bake_batch_cells: usize,
    /// Length of hemisphere sky rays (cm)
    pub sky_ray_length_cm: f32,
    /// Volumes sizing above this cell count are skipped
    pub max_bake_cells: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            default_cell_size_cm: 250.0,
            bake_batch_cells: 500,
            sky_ray_length_cm: 100_000.0,
            max_bake_cells: 8_000_000,
        }
    }
}

/// Knobs used by previews and the heat preview pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    pub time_of_day_hours: f32,
    pub season_is_winter: bool,
    pub weather_alpha: f32,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            time_of_day_hours: 15.0,
            season_is_winter: false,
            weather_alpha: 0.3,
        }
    }
}

/// Complete settings for baking and composing the thermal field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalSettings {
    pub climate: ClimateSettings,
    pub altitude: AltitudeSettings,
    pub permeability: PermeabilitySettings,
    pub grid: GridSettings,
    pub preview: PreviewSettings,
}

fn check_range(name: &str, value: f32, min: f32, max: f32) -> ThermalResult<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ThermalError::InvalidConfig(format!(
            "{name} = {value} outside [{min}, {max}]"
        )))
    }
}

impl ThermalSettings {
    /// Parse settings from JSON text and validate them.
    pub fn from_json_str(json: &str) -> ThermalResult<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| ThermalError::ParseFailed(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> ThermalResult<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|e| ThermalError::LoadFailed(e.to_string()))?;
        let settings = Self::from_json_str(&contents).inspect_err(|e| {
            warn!("Rejected thermal settings from {}: {}", path.display(), e);
        })?;
        info!("Loaded thermal settings from {}", path.display());
        Ok(settings)
    }

    pub fn to_json_string(&self) -> ThermalResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ThermalError::SerializeFailed(e.to_string()))
    }

    /// Save settings as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ThermalResult<()> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(|e| ThermalError::SaveFailed(e.to_string()))
    }

    /// Check every value against its accepted range.
    pub fn validate(&self) -> ThermalResult<()> {
        let c = &self.climate;
        check_range("climate.winter_average_c", c.winter_average_c, -100.0, 100.0)?;
        check_range("climate.winter_day_night_delta_c", c.winter_day_night_delta_c, 0.0, 60.0)?;
        check_range("climate.summer_average_c", c.summer_average_c, -100.0, 100.0)?;
        check_range("climate.summer_day_night_delta_c", c.summer_day_night_delta_c, 0.0, 60.0)?;
        check_range("climate.default_weather_alpha01", c.default_weather_alpha01, 0.0, 1.0)?;
        check_range("climate.solar_gain_scale_c", c.solar_gain_scale_c, 0.0, 50.0)?;

        let a = &self.altitude;
        check_range("altitude.sea_level_z_cm", a.sea_level_z_cm, f32::MIN, f32::MAX)?;
        check_range("altitude.lapse_rate_c_per_km", a.lapse_rate_c_per_km, 0.0, 40.0)?;

        let p = &self.permeability;
        check_range("permeability.air_density_kg_m3", p.air_density_kg_m3, 0.5, 5.0)?;
        check_range("permeability.max_solid_density_kg_m3", p.max_solid_density_kg_m3, 1000.0, 20000.0)?;
        check_range("permeability.unknown_hit_density_kg_m3", p.unknown_hit_density_kg_m3, 100.0, 5000.0)?;
        check_range("permeability.absorption_beta", p.absorption_beta, 0.1, 20.0)?;
        check_range("permeability.face_thickness_factor", p.face_thickness_factor, 0.1, 10.0)?;
        check_range("permeability.min_permeability_clamp", p.min_permeability_clamp, 0.0, 1.0)?;
        check_range("permeability.max_permeability_clamp", p.max_permeability_clamp, 0.0, 1.0)?;
        if p.min_permeability_clamp > p.max_permeability_clamp {
            return Err(ThermalError::InvalidConfig(format!(
                "permeability clamp range is inverted: [{}, {}]",
                p.min_permeability_clamp, p.max_permeability_clamp
            )));
        }

        let g = &self.grid;
        check_range("grid.default_cell_size_cm", g.default_cell_size_cm, 10.0, 1000.0)?;
        check_range("grid.sky_ray_length_cm", g.sky_ray_length_cm, 1.0, f32::MAX)?;
        if g.bake_batch_cells == 0 {
            return Err(ThermalError::InvalidConfig(
                "grid.bake_batch_cells must be at least 1".to_string(),
            ));
        }

        let v = &self.preview;
        check_range("preview.time_of_day_hours", v.time_of_day_hours, 0.0, 24.0)?;
        check_range("preview.weather_alpha", v.weather_alpha, 0.0, 1.0)?;

        Ok(())
    }
}
