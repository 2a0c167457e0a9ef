//! Field persistence: JSON records of the logical layout and CSV dumps.

use super::field_grid::{Channel, FieldGrid, GridDims};
use crate::core_types::{frame_from_degrees, rotation_to_degrees, Vec3};
use crate::error::{ThermalError, ThermalResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Logical on-disk layout of a baked field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldGridRecord {
    /// Cells along X, Y, Z
    pub dims: [usize; 3],
    pub cell_size_cm: f32,
    /// World position of the cell (0,0,0) corner
    pub origin: [f32; 3],
    /// Roll, pitch, yaw in degrees
    pub rotation_deg: [f32; 3],
    pub sky_view: Vec<f32>,
    pub wall_permeability: Vec<f32>,
    pub indoorness: Vec<f32>,
}

impl From<&FieldGrid> for FieldGridRecord {
    fn from(grid: &FieldGrid) -> Self {
        let dims = grid.dims();
        let origin = grid.origin();
        Self {
            dims: [dims.x, dims.y, dims.z],
            cell_size_cm: grid.cell_size_cm(),
            origin: [origin.x, origin.y, origin.z],
            rotation_deg: rotation_to_degrees(&grid.rotation()),
            sky_view: grid.channel(Channel::SkyView).to_vec(),
            wall_permeability: grid.channel(Channel::WallPermeability).to_vec(),
            indoorness: grid.channel(Channel::Indoorness).to_vec(),
        }
    }
}

impl TryFrom<FieldGridRecord> for FieldGrid {
    type Error = ThermalError;

    fn try_from(record: FieldGridRecord) -> ThermalResult<Self> {
        let dims = GridDims::new(record.dims[0], record.dims[1], record.dims[2]);
        let frame = frame_from_degrees(Vec3::from(record.origin), record.rotation_deg);
        let grid = FieldGrid::from_baked(
            dims,
            record.cell_size_cm,
            frame,
            record.sky_view,
            record.wall_permeability,
            record.indoorness,
        );
        grid.validate()?;
        Ok(grid)
    }
}

impl FieldGrid {
    /// Load a field from a JSON record, validating its layout.
    pub fn load_json<P: AsRef<Path>>(path: P) -> ThermalResult<Self> {
        let contents =
            fs::read_to_string(path.as_ref()).map_err(|e| ThermalError::LoadFailed(e.to_string()))?;
        let record: FieldGridRecord =
            serde_json::from_str(&contents).map_err(|e| ThermalError::ParseFailed(e.to_string()))?;
        Self::try_from(record)
    }

    /// Save the field as a JSON record.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ThermalResult<()> {
        let contents = serde_json::to_string(&FieldGridRecord::from(self))
            .map_err(|e| ThermalError::SerializeFailed(e.to_string()))?;
        fs::write(path.as_ref(), contents).map_err(|e| ThermalError::SaveFailed(e.to_string()))?;
        info!(
            "Saved {} field cells to {}",
            self.cell_count(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Write a CSV dump: a header block with dimensions, cell size and
    /// origin, then one `index,skyview,wallperm,indoor` row per cell.
    pub fn write_csv<W: Write>(&self, mut out: W) -> ThermalResult<()> {
        let io_err = |e: std::io::Error| ThermalError::SaveFailed(e.to_string());
        let dims = self.dims();
        let origin = self.origin();

        writeln!(out, "# DimX,DimY,DimZ,CellSizeCm,OriginX,OriginY,OriginZ").map_err(io_err)?;
        writeln!(
            out,
            "{},{},{},{:.3},{:.3},{:.3},{:.3}",
            dims.x,
            dims.y,
            dims.z,
            self.cell_size_cm(),
            origin.x,
            origin.y,
            origin.z
        )
        .map_err(io_err)?;
        writeln!(out, "index,skyview,wallperm,indoor").map_err(io_err)?;

        for i in 0..self.cell_count() {
            writeln!(
                out,
                "{},{:.6},{:.6},{:.6}",
                i,
                self.sample_by_linear_index(Channel::SkyView, i),
                self.sample_by_linear_index(Channel::WallPermeability, i),
                self.sample_by_linear_index(Channel::Indoorness, i)
            )
            .map_err(io_err)?;
        }
        Ok(())
    }

    /// Write the CSV dump to a file.
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> ThermalResult<()> {
        let file = fs::File::create(path.as_ref()).map_err(|e| ThermalError::SaveFailed(e.to_string()))?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Frame;
    use approx::assert_relative_eq;

    fn sample_grid() -> FieldGrid {
        let frame = frame_from_degrees(Vec3::new(100.0, -50.0, 25.0), [0.0, 0.0, 45.0]);
        let sky = vec![0.0, 0.25, 0.5, 0.75, 1.0, 0.5, 0.5, 0.1];
        let wall = vec![1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3];
        FieldGrid::from_channels(GridDims::new(2, 2, 2), 100.0, frame, sky, wall).unwrap()
    }

    #[test]
    fn test_record_preserves_layout() {
        let grid = sample_grid();
        let record = FieldGridRecord::from(&grid);
        assert_eq!(record.dims, [2, 2, 2]);
        assert_relative_eq!(record.rotation_deg[2], 45.0, epsilon = 1e-3);

        let restored = FieldGrid::try_from(record).unwrap();
        assert_eq!(restored.channel(Channel::SkyView), grid.channel(Channel::SkyView));
        assert_relative_eq!(restored.origin(), grid.origin(), epsilon = 1e-4);
        let p = Vec3::new(150.0, 20.0, 90.0);
        assert_relative_eq!(
            restored.sample_trilinear(Channel::SkyView, &p),
            grid.sample_trilinear(Channel::SkyView, &p),
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_record_with_inconsistent_indoorness_is_rejected() {
        let mut record = FieldGridRecord::from(&sample_grid());
        record.indoorness[3] = 0.99;
        assert!(matches!(
            FieldGrid::try_from(record),
            Err(ThermalError::InvalidField(_))
        ));
    }

    #[test]
    fn test_save_and_load_json() {
        let grid = sample_grid();
        let path = std::env::temp_dir().join("thermal_field_grid_roundtrip.json");
        grid.save_json(&path).unwrap();

        let loaded = FieldGrid::load_json(&path).unwrap();
        assert_eq!(loaded.dims(), grid.dims());
        assert_eq!(
            loaded.channel(Channel::WallPermeability),
            grid.channel(Channel::WallPermeability)
        );

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_load_missing_file() {
        let err = FieldGrid::load_json("/nonexistent/thermal/field.json").unwrap_err();
        assert!(matches!(err, ThermalError::LoadFailed(_)));
    }

    #[test]
    fn test_csv_layout() {
        let grid = FieldGrid::filled(GridDims::new(2, 1, 1), 50.0, Frame::identity(), 1.0, 0.5).unwrap();
        let mut buf = Vec::new();
        grid.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "# DimX,DimY,DimZ,CellSizeCm,OriginX,OriginY,OriginZ");
        assert_eq!(lines[1], "2,1,1,50.000,0.000,0.000,0.000");
        assert_eq!(lines[2], "index,skyview,wallperm,indoor");
        assert_eq!(lines[3], "0,1.000000,0.500000,0.000000");
        assert_eq!(lines.len(), 5);
    }
}
