//! Closed-form climate model: diurnal/seasonal ambient curves, altitude lapse
//! and density-to-permeability attenuation.

use crate::config::{AltitudeSettings, ClimateSettings, PermeabilitySettings, ThermalSettings};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f32::consts::TAU;

/// Centimetres per kilometre.
const CM_PER_KM: f32 = 100_000.0;

/// Hour of the daily peak for the seasonal curves.
const BASELINE_PEAK_HOUR: f32 = 15.0;

/// Hour of the daily peak for the corrected curve.
const CORRECTED_PEAK_HOUR: f32 = 12.0;

/// Day of year treated as deep winter by the seasonal blend.
const WINTER_ANCHOR_DAY: f32 = 355.0;

const DAYS_PER_YEAR: f32 = 365.0;

/// Pure climate functions over a snapshot of the settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateModel {
    pub climate: ClimateSettings,
    pub altitude: AltitudeSettings,
    pub permeability: PermeabilitySettings,
}

impl ClimateModel {
    pub fn new(settings: &ThermalSettings) -> Self {
        Self {
            climate: settings.climate,
            altitude: settings.altitude,
            permeability: settings.permeability,
        }
    }

    fn season(&self, is_winter: bool) -> (f32, f32) {
        if is_winter {
            (self.climate.winter_average_c, self.climate.winter_day_night_delta_c)
        } else {
            (self.climate.summer_average_c, self.climate.summer_day_night_delta_c)
        }
    }

    /// Ambient temperature (°C) at sea level, peaking at 15:00.
    pub fn ambient_celsius(&self, is_winter: bool, time_of_day_hours: f32) -> f32 {
        let (avg, delta) = self.season(is_winter);
        let hour = time_of_day_hours.clamp(0.0, 24.0);
        avg + 0.5 * delta * diurnal_phase(hour, BASELINE_PEAK_HOUR)
    }

    /// Apply the altitude lapse rate to a base temperature at `world_z_cm`.
    pub fn adjust_for_altitude(&self, base_celsius: f32, world_z_cm: f32) -> f32 {
        let alt = &self.altitude;
        if !alt.enable_altitude_lapse || alt.lapse_rate_c_per_km <= 0.0 {
            return base_celsius;
        }
        let km_above_sea = (world_z_cm - alt.sea_level_z_cm) / CM_PER_KM;
        base_celsius - alt.lapse_rate_c_per_km * km_above_sea
    }

    pub fn ambient_celsius_at(&self, is_winter: bool, time_of_day_hours: f32, world_z_cm: f32) -> f32 {
        self.adjust_for_altitude(self.ambient_celsius(is_winter, time_of_day_hours), world_z_cm)
    }

    /// Map a material density and path thickness to a permeability in the
    /// configured clamp range.
    ///
    /// Density is normalized between air and the densest solid, then
    /// attenuated as `exp(-beta * rho_norm * thickness)`.
    pub fn density_to_permeability(&self, density_kg_m3: f32, thickness_fraction: f32) -> f32 {
        let p = &self.permeability;
        let den_min = p.air_density_kg_m3.min(p.max_solid_density_kg_m3);
        let den_max = p.air_density_kg_m3.max(p.max_solid_density_kg_m3);
        let rho_norm = ((density_kg_m3 - den_min) / (den_max - den_min).max(1e-6)).clamp(0.0, 1.0);
        let thickness = thickness_fraction.max(0.0);

        let permeability = (-p.absorption_beta * rho_norm * thickness).exp();
        permeability.clamp(p.min_permeability_clamp, p.max_permeability_clamp)
    }

    /// Ambient blended between the winter and summer curves (15:00 peak).
    pub fn blended_ambient_celsius_at(&self, season_alpha: f32, time_of_day_hours: f32, world_z_cm: f32) -> f32 {
        let winter = self.ambient_celsius_at(true, time_of_day_hours, world_z_cm);
        let summer = self.ambient_celsius_at(false, time_of_day_hours, world_z_cm);
        lerp(winter, summer, season_alpha)
    }

    /// Seasonally blended ambient on the corrected curve: trough at 00:00,
    /// peak at 12:00. Used on top of the 15:00-peak baseline by the
    /// timestamped grid query.
    pub fn corrected_ambient_celsius_at(&self, season_alpha: f32, time_of_day_hours: f32, world_z_cm: f32) -> f32 {
        let c = &self.climate;
        let avg = lerp(c.winter_average_c, c.summer_average_c, season_alpha);
        let delta = lerp(c.winter_day_night_delta_c, c.summer_day_night_delta_c, season_alpha);
        let base = avg + 0.5 * delta * diurnal_phase(time_of_day_hours, CORRECTED_PEAK_HOUR);
        self.adjust_for_altitude(base, world_z_cm)
    }
}

fn diurnal_phase(hour: f32, peak_hour: f32) -> f32 {
    (TAU * (hour - peak_hour) / 24.0).cos()
}

pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Smooth annual cycle: 0 at day 355 (deep winter), 1 half a year later.
pub fn season_alpha(day_of_year: f32) -> f32 {
    let phase = ((day_of_year - WINTER_ANCHOR_DAY) / DAYS_PER_YEAR).rem_euclid(1.0);
    0.5 * (1.0 - (TAU * phase).cos())
}

/// Continuous hour of day in [0,24).
pub fn hour_of_day(time: &DateTime<Utc>) -> f32 {
    let seconds = time.num_seconds_from_midnight() as f32 + time.nanosecond() as f32 * 1e-9;
    (seconds / 3600.0).rem_euclid(24.0)
}

/// Seasonal alpha for a timestamp, from its (1-based) ordinal day.
pub fn season_alpha_at(time: &DateTime<Utc>) -> f32 {
    season_alpha(time.ordinal() as f32)
}
