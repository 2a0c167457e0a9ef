//! Immutable baked field: three scalar channels over a rigid cell lattice.
//!
//! Cell `(x, y, z)` spans local `[x, x+1) * cell_size` on each axis with
//! cell (0,0,0) at the local origin; channels are stored row-major as
//! `(z * ny + y) * nx + x`.

use crate::core_types::{Frame, Vec3};
use crate::error::{ThermalError, ThermalResult};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Cell counts along X, Y and Z.
pub type GridDims = Vector3<usize>;

/// Tolerance when checking the derived indoorness channel.
const INDOOR_TOLERANCE: f32 = 1e-4;

/// Field channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Fraction of hemisphere rays reaching open sky
    SkyView,
    /// Average transmissivity toward axis neighbours
    WallPermeability,
    /// `(1 - sky) * (1 - wall)`
    Indoorness,
}

impl Channel {
    /// Value reported outside baked coverage: open air, no obstruction.
    pub fn default_value(self) -> f32 {
        match self {
            Channel::SkyView | Channel::Indoorness => 0.0,
            Channel::WallPermeability => 1.0,
        }
    }
}

/// Base cell and fractional offset for trilinear sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellLookup {
    pub base: Vector3<usize>,
    /// Offset within the base cell, each axis in [0,1)
    pub alpha: Vec3,
}

/// Closest cell centre to a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestCell {
    pub index: Vector3<usize>,
    pub linear_index: usize,
    pub center_ws: Vec3,
    pub distance_sq: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldGrid {
    dims: GridDims,
    cell_size_cm: f32,
    frame: Frame,
    sky_view: Vec<f32>,
    wall_permeability: Vec<f32>,
    indoorness: Vec<f32>,
}

impl Default for FieldGrid {
    fn default() -> Self {
        Self::empty()
    }
}

impl FieldGrid {
    /// Ungenerated grid: no cells, every sample returns the channel default.
    pub fn empty() -> Self {
        Self {
            dims: GridDims::zeros(),
            cell_size_cm: 0.0,
            frame: Frame::identity(),
            sky_view: Vec::new(),
            wall_permeability: Vec::new(),
            indoorness: Vec::new(),
        }
    }

    /// Build a grid from sky view and wall permeability; indoorness is derived.
    pub fn from_channels(
        dims: GridDims,
        cell_size_cm: f32,
        frame: Frame,
        sky_view: Vec<f32>,
        wall_permeability: Vec<f32>,
    ) -> ThermalResult<Self> {
        let indoorness = sky_view
            .iter()
            .zip(&wall_permeability)
            .map(|(s, w)| indoor_from(*s, *w))
            .collect();
        let grid = Self {
            dims,
            cell_size_cm,
            frame,
            sky_view,
            wall_permeability,
            indoorness,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Grid with constant channel values, mostly for tooling and tests.
    pub fn filled(
        dims: GridDims,
        cell_size_cm: f32,
        frame: Frame,
        sky_view: f32,
        wall_permeability: f32,
    ) -> ThermalResult<Self> {
        let count = dims.x * dims.y * dims.z;
        Self::from_channels(
            dims,
            cell_size_cm,
            frame,
            vec![sky_view; count],
            vec![wall_permeability; count],
        )
    }

    /// Raw constructor for the bake commit and loaders. Callers validate.
    pub(crate) fn from_baked(
        dims: GridDims,
        cell_size_cm: f32,
        frame: Frame,
        sky_view: Vec<f32>,
        wall_permeability: Vec<f32>,
        indoorness: Vec<f32>,
    ) -> Self {
        Self {
            dims,
            cell_size_cm,
            frame,
            sky_view,
            wall_permeability,
            indoorness,
        }
    }

    /// Check layout invariants: matching channel lengths and derived indoorness.
    pub fn validate(&self) -> ThermalResult<()> {
        let len = self.sky_view.len();
        if self.wall_permeability.len() != len || self.indoorness.len() != len {
            return Err(ThermalError::InvalidField(format!(
                "channel lengths differ: sky {}, wall {}, indoor {}",
                len,
                self.wall_permeability.len(),
                self.indoorness.len()
            )));
        }
        if len == 0 {
            return Ok(());
        }
        if len != self.cell_count() {
            return Err(ThermalError::InvalidField(format!(
                "{} values for {}x{}x{} cells",
                len, self.dims.x, self.dims.y, self.dims.z
            )));
        }
        if !(self.cell_size_cm.is_finite() && self.cell_size_cm > 0.0) {
            return Err(ThermalError::InvalidField(format!(
                "cell size must be positive, got {}",
                self.cell_size_cm
            )));
        }
        for i in 0..len {
            let sky = self.sky_view[i];
            let wall = self.wall_permeability[i];
            let indoor = self.indoorness[i];
            if !(0.0..=1.0).contains(&sky) || !(0.0..=1.0).contains(&wall) {
                return Err(ThermalError::InvalidField(format!(
                    "cell {i} has sky {sky} / wall {wall} outside [0,1]"
                )));
            }
            if (indoor - indoor_from(sky, wall)).abs() > INDOOR_TOLERANCE {
                return Err(ThermalError::InvalidField(format!(
                    "cell {i} indoorness {indoor} does not match sky/wall"
                )));
            }
        }
        Ok(())
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn cell_size_cm(&self) -> f32 {
        self.cell_size_cm
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// World position of the local origin (corner of cell (0,0,0)).
    pub fn origin(&self) -> Vec3 {
        self.frame.translation.vector
    }

    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.frame.rotation
    }

    pub fn cell_count(&self) -> usize {
        self.dims.x * self.dims.y * self.dims.z
    }

    /// True once channel data is present.
    pub fn is_populated(&self) -> bool {
        !self.sky_view.is_empty()
    }

    pub fn channel(&self, channel: Channel) -> &[f32] {
        match channel {
            Channel::SkyView => &self.sky_view,
            Channel::WallPermeability => &self.wall_permeability,
            Channel::Indoorness => &self.indoorness,
        }
    }

    #[inline]
    pub fn linear_index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dims.y + y) * self.dims.x + x
    }

    /// Inverse of [`Self::linear_index`].
    pub fn cell_of_index(&self, index: usize) -> Vector3<usize> {
        let nx = self.dims.x.max(1);
        let ny = self.dims.y.max(1);
        Vector3::new(index % nx, (index / nx) % ny, index / (nx * ny))
    }

    /// World-space centre of a cell.
    pub fn cell_center_world(&self, cell: Vector3<usize>) -> Vec3 {
        let local = cell.map(|i| (i as f32 + 0.5) * self.cell_size_cm);
        (self.frame * Point3::from(local)).coords
    }

    fn to_local_cells(&self, world: &Vec3) -> Vec3 {
        let local = self.frame.inverse_transform_point(&Point3::from(*world)).coords;
        local / self.cell_size_cm
    }

    /// Base cell and fractional offset for trilinear sampling, or `None`
    /// when the point has no full 2x2x2 neighbourhood inside the grid.
    pub fn world_to_cell(&self, world: &Vec3) -> Option<CellLookup> {
        if self.dims.x <= 1 || self.dims.y <= 1 || self.dims.z <= 1 || self.cell_size_cm <= 0.0 {
            return None;
        }

        let local = self.to_local_cells(world);
        let floor = local.map(f32::floor);
        let mut base = Vector3::zeros();
        for axis in 0..3 {
            let f = floor[axis];
            if !f.is_finite() || f < 0.0 || f + 1.0 > (self.dims[axis] - 1) as f32 {
                return None;
            }
            base[axis] = f as usize;
        }

        Some(CellLookup {
            base,
            alpha: local - floor,
        })
    }

    /// Stored value at a linear index, or the channel default when out of
    /// range or ungenerated.
    pub fn sample_by_linear_index(&self, channel: Channel, index: usize) -> f32 {
        if index >= self.cell_count() {
            return channel.default_value();
        }
        self.channel(channel)
            .get(index)
            .copied()
            .unwrap_or_else(|| channel.default_value())
    }

    /// Trilinear sample, interpolating X then Y then Z.
    pub fn sample_trilinear(&self, channel: Channel, world: &Vec3) -> f32 {
        let Some(CellLookup { base, alpha }) = self.world_to_cell(world) else {
            return channel.default_value();
        };

        let at = |dx: usize, dy: usize, dz: usize| {
            let i = self.linear_index(base.x + dx, base.y + dy, base.z + dz);
            self.sample_by_linear_index(channel, i)
        };

        let c00 = lerp(at(0, 0, 0), at(1, 0, 0), alpha.x);
        let c10 = lerp(at(0, 1, 0), at(1, 1, 0), alpha.x);
        let c01 = lerp(at(0, 0, 1), at(1, 0, 1), alpha.x);
        let c11 = lerp(at(0, 1, 1), at(1, 1, 1), alpha.x);

        let c0 = lerp(c00, c10, alpha.y);
        let c1 = lerp(c01, c11, alpha.y);

        lerp(c0, c1, alpha.z)
    }

    /// Cell found by rounding the local cell coordinate of `world` to the
    /// nearest integer on each axis, clamped into the grid.
    pub fn nearest_cell(&self, world: &Vec3) -> Option<NearestCell> {
        if self.cell_count() == 0 || self.cell_size_cm <= 0.0 {
            return None;
        }

        let local = self.to_local_cells(world);
        let mut index = Vector3::zeros();
        for axis in 0..3 {
            let rounded = (local[axis] + 0.5).floor();
            let max = (self.dims[axis] - 1) as f32;
            // NaN falls through clamp unchanged; treat it as cell 0
            let clamped = if rounded.is_nan() { 0.0 } else { rounded.clamp(0.0, max) };
            index[axis] = clamped as usize;
        }

        let center_ws = self.cell_center_world(index);
        Some(NearestCell {
            index,
            linear_index: self.linear_index(index.x, index.y, index.z),
            center_ws,
            distance_sq: (center_ws - world).norm_squared(),
        })
    }
}

#[inline]
fn indoor_from(sky: f32, wall: f32) -> f32 {
    (1.0 - sky) * (1.0 - wall)
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::frame_from_degrees;
    use approx::assert_relative_eq;

    fn ramp_grid(dims: GridDims, cell: f32, frame: Frame) -> FieldGrid {
        let n = dims.x * dims.y * dims.z;
        let sky: Vec<f32> = (0..n).map(|i| i as f32 / n as f32).collect();
        let wall: Vec<f32> = (0..n).map(|i| 1.0 - i as f32 / (2 * n) as f32).collect();
        FieldGrid::from_channels(dims, cell, frame, sky, wall).unwrap()
    }

    #[test]
    fn test_empty_grid_returns_defaults() {
        let grid = FieldGrid::empty();
        let p = Vec3::new(10.0, 10.0, 10.0);
        assert_eq!(grid.sample_trilinear(Channel::SkyView, &p), 0.0);
        assert_eq!(grid.sample_trilinear(Channel::WallPermeability, &p), 1.0);
        assert_eq!(grid.sample_trilinear(Channel::Indoorness, &p), 0.0);
        assert_eq!(grid.sample_by_linear_index(Channel::WallPermeability, 0), 1.0);
        assert!(grid.nearest_cell(&p).is_none());
        assert!(!grid.is_populated());
    }

    #[test]
    fn test_indoorness_is_derived() {
        let grid = ramp_grid(GridDims::new(3, 2, 2), 100.0, Frame::identity());
        for i in 0..grid.cell_count() {
            let sky = grid.sample_by_linear_index(Channel::SkyView, i);
            let wall = grid.sample_by_linear_index(Channel::WallPermeability, i);
            let indoor = grid.sample_by_linear_index(Channel::Indoorness, i);
            assert_relative_eq!(indoor, (1.0 - sky) * (1.0 - wall), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_trilinear_at_base_corner_is_exact() {
        let frame = frame_from_degrees(Vec3::new(-300.0, 40.0, 12.0), [0.0, 0.0, 30.0]);
        let grid = ramp_grid(GridDims::new(4, 3, 3), 50.0, frame);

        for z in 0..2 {
            for y in 0..2 {
                for x in 0..3 {
                    let corner_local = Point3::new(x as f32 * 50.0, y as f32 * 50.0, z as f32 * 50.0);
                    // Nudge inside the cell so floor lands on the base index
                    let p = (frame * (corner_local + Vector3::repeat(1e-3))).coords;
                    let lookup = grid.world_to_cell(&p).expect("inside grid");
                    assert_eq!(lookup.base, Vector3::new(x, y, z));

                    let expected = grid.channel(Channel::SkyView)[grid.linear_index(x, y, z)];
                    assert_relative_eq!(
                        grid.sample_trilinear(Channel::SkyView, &p),
                        expected,
                        epsilon = 1e-4
                    );
                }
            }
        }
    }

    #[test]
    fn test_trilinear_midpoint_averages_corners() {
        let dims = GridDims::new(2, 2, 2);
        let sky = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let wall = vec![1.0; 8];
        let grid = FieldGrid::from_channels(dims, 100.0, Frame::identity(), sky, wall).unwrap();

        let v = grid.sample_trilinear(Channel::SkyView, &Vec3::new(50.0, 50.0, 50.0));
        assert_relative_eq!(v, 0.5, epsilon = 1e-6);
        let v = grid.sample_trilinear(Channel::SkyView, &Vec3::new(25.0, 80.0, 10.0));
        assert_relative_eq!(v, 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_world_to_cell_misses() {
        let grid = ramp_grid(GridDims::new(3, 3, 3), 100.0, Frame::identity());
        // Negative side
        assert!(grid.world_to_cell(&Vec3::new(-1.0, 50.0, 50.0)).is_none());
        // Last cell has no +1 neighbour
        assert!(grid.world_to_cell(&Vec3::new(250.0, 50.0, 50.0)).is_none());
        assert!(grid.world_to_cell(&Vec3::new(150.0, 150.0, 150.0)).is_some());

        // Degenerate along one axis
        let flat = ramp_grid(GridDims::new(3, 3, 1), 100.0, Frame::identity());
        assert!(flat.world_to_cell(&Vec3::new(50.0, 50.0, 50.0)).is_none());
        assert_eq!(
            flat.sample_trilinear(Channel::WallPermeability, &Vec3::new(50.0, 50.0, 50.0)),
            1.0
        );
    }

    #[test]
    fn test_linear_index_out_of_range_uses_default() {
        let grid = FieldGrid::filled(GridDims::new(2, 2, 2), 100.0, Frame::identity(), 0.4, 0.2).unwrap();
        assert_eq!(grid.sample_by_linear_index(Channel::SkyView, 7), 0.4);
        assert_eq!(grid.sample_by_linear_index(Channel::SkyView, 8), 0.0);
        assert_eq!(grid.sample_by_linear_index(Channel::WallPermeability, 100), 1.0);
    }

    #[test]
    fn test_index_decomposition_roundtrip() {
        let grid = ramp_grid(GridDims::new(4, 3, 5), 10.0, Frame::identity());
        for i in 0..grid.cell_count() {
            let c = grid.cell_of_index(i);
            assert_eq!(grid.linear_index(c.x, c.y, c.z), i);
        }
    }

    #[test]
    fn test_nearest_cell_rounds_and_clamps() {
        let grid = ramp_grid(GridDims::new(3, 3, 3), 100.0, Frame::identity());

        // Local 1.6 cells rounds to index 2
        let hit = grid.nearest_cell(&Vec3::new(160.0, 40.0, 10.0)).unwrap();
        assert_eq!(hit.index, Vector3::new(2, 0, 0));
        assert_eq!(hit.linear_index, 2);
        assert_relative_eq!(hit.center_ws, Vec3::new(250.0, 50.0, 50.0));

        // Far outside clamps to the last cell
        let hit = grid.nearest_cell(&Vec3::new(5000.0, -5000.0, 150.0)).unwrap();
        assert_eq!(hit.index, Vector3::new(2, 0, 2));
        let d = Vec3::new(5000.0, -5000.0, 150.0) - Vec3::new(250.0, 50.0, 250.0);
        assert_relative_eq!(hit.distance_sq, d.norm_squared(), max_relative = 1e-5);
    }

    #[test]
    fn test_from_channels_rejects_bad_layout() {
        let err = FieldGrid::from_channels(
            GridDims::new(2, 2, 2),
            100.0,
            Frame::identity(),
            vec![0.0; 8],
            vec![1.0; 7],
        );
        assert!(matches!(err, Err(ThermalError::InvalidField(_))));

        let err = FieldGrid::from_channels(
            GridDims::new(2, 2, 2),
            0.0,
            Frame::identity(),
            vec![0.0; 8],
            vec![1.0; 8],
        );
        assert!(err.is_err());

        let err = FieldGrid::filled(GridDims::new(1, 1, 1), 100.0, Frame::identity(), 1.5, 0.0);
        assert!(err.is_err());
    }
}
