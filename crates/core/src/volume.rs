//! Bake volumes: the spatial regions that own a baked field.

use crate::core_types::{Aabb, Frame, Handle, Registry, Vec3};
use crate::field::FieldGrid;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion};

/// Half size used for unbounded volumes without level bounds (cm).
const UNBOUNDED_HALF_EXTENT_CM: f32 = 1_000_000.0;

/// Smallest accepted cell edge (cm).
pub const MIN_CELL_SIZE_CM: f32 = 10.0;

/// Where cell (0,0,0) of the lattice is anchored before sizing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GridOriginMode {
    /// World origin, so neighbouring volumes share one lattice
    #[default]
    WorldZero,
    /// The volume's own location
    ActorOrigin,
    /// An explicit world point
    Custom(Vec3),
}

/// Axes of the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridOrientationMode {
    #[default]
    WorldAxes,
    ActorRotation,
}

/// Region to bake, with an optional committed field.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Location and rotation of the volume
    pub transform: Frame,
    /// Half size of the volume box (cm)
    pub box_extent: Vec3,
    /// Cover the whole level instead of the box
    pub unbounded: bool,
    /// Level bounds used by unbounded volumes, when known
    pub level_bounds: Option<Aabb>,
    pub cell_size_override_cm: Option<f32>,
    pub origin_mode: GridOriginMode,
    pub orientation_mode: GridOrientationMode,
    grid: Option<FieldGrid>,
}

impl Volume {
    /// Box volume at `location` with half size `box_extent`.
    pub fn bounded(location: Vec3, box_extent: Vec3) -> Self {
        Self {
            transform: Isometry3::from_parts(Translation3::from(location), UnitQuaternion::identity()),
            box_extent: box_extent.abs(),
            unbounded: false,
            level_bounds: None,
            cell_size_override_cm: None,
            origin_mode: GridOriginMode::default(),
            orientation_mode: GridOrientationMode::default(),
            grid: None,
        }
    }

    /// Volume covering the level (or a very large box when bounds are unknown).
    pub fn unbounded(level_bounds: Option<Aabb>) -> Self {
        Self {
            unbounded: true,
            level_bounds,
            ..Self::bounded(Vec3::zeros(), Vec3::zeros())
        }
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f32>) -> Self {
        self.transform.rotation = rotation;
        self
    }

    pub fn with_cell_size(mut self, cell_size_cm: f32) -> Self {
        self.cell_size_override_cm = Some(cell_size_cm);
        self
    }

    pub fn with_origin_mode(mut self, mode: GridOriginMode) -> Self {
        self.origin_mode = mode;
        self
    }

    pub fn with_orientation_mode(mut self, mode: GridOrientationMode) -> Self {
        self.orientation_mode = mode;
        self
    }

    pub fn location(&self) -> Vec3 {
        self.transform.translation.vector
    }

    /// Axis-aligned world bounds used for sizing.
    ///
    /// Bounded volumes use `location ± box_extent`; rotation does not widen
    /// the box.
    pub fn world_bounds(&self) -> Aabb {
        if self.unbounded {
            return self.level_bounds.unwrap_or_else(|| {
                Aabb::from_center_extent(Vec3::zeros(), Vec3::repeat(UNBOUNDED_HALF_EXTENT_CM))
            });
        }
        Aabb::from_center_extent(self.location(), self.box_extent)
    }

    /// Point test against the oriented volume box.
    pub fn contains(&self, world: &Vec3) -> bool {
        if self.unbounded {
            return true;
        }
        let local = self.transform.inverse_transform_point(&Point3::from(*world)).coords;
        local.x.abs() <= self.box_extent.x
            && local.y.abs() <= self.box_extent.y
            && local.z.abs() <= self.box_extent.z
    }

    /// Cell edge for this volume: override or default, at least 10 cm.
    pub fn effective_cell_size(&self, default_cell_size_cm: f32) -> f32 {
        self.cell_size_override_cm
            .unwrap_or(default_cell_size_cm)
            .max(MIN_CELL_SIZE_CM)
    }

    /// Lattice frame from the origin and orientation policies.
    pub fn grid_frame(&self) -> Frame {
        let origin = match self.origin_mode {
            GridOriginMode::WorldZero => Vec3::zeros(),
            GridOriginMode::ActorOrigin => self.location(),
            GridOriginMode::Custom(point) => point,
        };
        let rotation = match self.orientation_mode {
            GridOrientationMode::WorldAxes => UnitQuaternion::identity(),
            GridOrientationMode::ActorRotation => self.transform.rotation,
        };
        Isometry3::from_parts(Translation3::from(origin), rotation)
    }

    /// Committed field, if it holds data.
    pub fn grid(&self) -> Option<&FieldGrid> {
        self.grid.as_ref().filter(|g| g.is_populated())
    }

    /// Replace the committed field wholesale, returning the previous one.
    pub fn attach_grid(&mut self, grid: FieldGrid) -> Option<FieldGrid> {
        self.grid.replace(grid)
    }

    pub fn clear_grid(&mut self) -> Option<FieldGrid> {
        self.grid.take()
    }
}

pub type VolumeHandle = Handle<Volume>;

/// Owning collection of all known volumes.
pub type VolumeSet = Registry<Volume>;

impl Registry<Volume> {
    /// Volumes carrying a populated field.
    pub fn baked(&self) -> impl Iterator<Item = (VolumeHandle, &Volume, &FieldGrid)> + '_ {
        self.iter()
            .filter_map(|(h, v)| v.grid().map(|g| (h, v, g)))
    }
}
