//! Dynamic heat sources and the live source registry.

use crate::core_types::{Aabb, Frame, Handle, Registry, Vec3};
use nalgebra::Point3;
use rustc_hash::FxHashSet;
use tracing::debug;

/// Radius below which a point source contributes nothing (cm).
const MIN_RADIUS_CM: f32 = 1e-4;

/// Distance falloff for point sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Falloff {
    /// Full intensity inside the radius
    None,
    /// `1 - d/R`
    #[default]
    Linear,
    /// `1 / (1 + (d/R)^2)`
    InverseSquare,
}

impl Falloff {
    /// Weight at `distance` for a source of `radius`; 0 at or beyond the radius.
    pub fn weight(self, distance: f32, radius: f32) -> f32 {
        if radius <= MIN_RADIUS_CM || distance >= radius {
            return 0.0;
        }
        let x = distance / radius;
        match self {
            Falloff::None => 1.0,
            Falloff::Linear => 1.0 - x,
            Falloff::InverseSquare => 1.0 / (1.0 + x * x),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceShape {
    Point { radius_cm: f32, falloff: Falloff },
    /// Oriented box with half size `extent`, hard edge
    Box { extent: Vec3 },
}

impl SourceShape {
    pub fn point(radius_cm: f32, falloff: Falloff) -> Self {
        SourceShape::Point { radius_cm, falloff }
    }
}

impl Default for SourceShape {
    fn default() -> Self {
        SourceShape::Point {
            radius_cm: 300.0,
            falloff: Falloff::Linear,
        }
    }
}

/// Transform of the actor carrying a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnerTransform {
    pub isometry: Frame,
    pub scale: Vec3,
}

impl OwnerTransform {
    pub fn at(position: Vec3) -> Self {
        Self {
            isometry: Frame::translation(position.x, position.y, position.z),
            scale: Vec3::repeat(1.0),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.isometry.translation.vector
    }

    pub fn max_axis_scale(&self) -> f32 {
        self.scale.abs().max()
    }
}

impl Default for OwnerTransform {
    fn default() -> Self {
        Self::at(Vec3::zeros())
    }
}

/// Signed temperature emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatSource {
    pub enabled: bool,
    /// Delta at full weight (°C), negative for cold sources
    pub intensity_c: f32,
    pub shape: SourceShape,
    /// Scale radius/extent by the owner's largest axis scale
    pub affect_by_owner_scale: bool,
    pub owner: OwnerTransform,
}

impl Default for HeatSource {
    fn default() -> Self {
        Self {
            enabled: true,
            intensity_c: 10.0,
            shape: SourceShape::default(),
            affect_by_owner_scale: false,
            owner: OwnerTransform::default(),
        }
    }
}

impl HeatSource {
    pub fn point(position: Vec3, intensity_c: f32, radius_cm: f32, falloff: Falloff) -> Self {
        Self {
            intensity_c,
            shape: SourceShape::point(radius_cm, falloff),
            owner: OwnerTransform::at(position),
            ..Self::default()
        }
    }

    pub fn boxed(owner: Frame, intensity_c: f32, extent: Vec3) -> Self {
        Self {
            intensity_c,
            shape: SourceShape::Box { extent },
            owner: OwnerTransform {
                isometry: owner,
                scale: Vec3::repeat(1.0),
            },
            ..Self::default()
        }
    }

    pub fn position(&self) -> Vec3 {
        self.owner.position()
    }

    fn scale(&self) -> f32 {
        if self.affect_by_owner_scale {
            self.owner.max_axis_scale()
        } else {
            1.0
        }
    }

    /// Temperature delta (°C) this source adds at `world`.
    pub fn sample_at(&self, world: &Vec3) -> f32 {
        if !self.enabled {
            return 0.0;
        }

        match self.shape {
            SourceShape::Point { radius_cm, falloff } => {
                let distance = (world - self.position()).norm();
                self.intensity_c * falloff.weight(distance, radius_cm * self.scale())
            }
            SourceShape::Box { extent } => {
                let ext = extent.abs() * self.scale();
                let local = self
                    .owner
                    .isometry
                    .inverse_transform_point(&Point3::from(*world))
                    .coords;
                let inside =
                    local.x.abs() <= ext.x && local.y.abs() <= ext.y && local.z.abs() <= ext.z;
                if inside {
                    self.intensity_c
                } else {
                    0.0
                }
            }
        }
    }

    /// World-space bounds of the emitter. [`Self::sample_at`] is zero outside.
    pub fn bounds_world(&self) -> Aabb {
        match self.shape {
            SourceShape::Point { radius_cm, .. } => {
                Aabb::from_center_extent(self.position(), Vec3::repeat(radius_cm * self.scale()))
            }
            SourceShape::Box { extent } => {
                let local = Aabb::from_center_extent(Vec3::zeros(), extent * self.scale());
                let corners = local
                    .corners()
                    .map(|c| (self.owner.isometry * Point3::from(c)).coords);
                Aabb::enclosing(corners).unwrap_or(local)
            }
        }
    }
}

pub type SourceHandle = Handle<HeatSource>;

/// Owns heat sources and the live set the composer iterates.
///
/// Membership is at-most-once per handle. Every register/unregister compacts
/// the live set, dropping handles whose source no longer exists.
#[derive(Debug, Default)]
pub struct HeatSourceRegistry {
    sources: Registry<HeatSource>,
    live: Vec<SourceHandle>,
    members: FxHashSet<SourceHandle>,
    revision: u64,
}

impl HeatSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a source and register it as live.
    pub fn spawn(&mut self, source: HeatSource) -> SourceHandle {
        let handle = self.sources.insert(source);
        self.register(handle);
        handle
    }

    /// Destroy a source. Its live entry goes stale and is swept by the next
    /// compaction.
    pub fn despawn(&mut self, handle: SourceHandle) -> Option<HeatSource> {
        let removed = self.sources.remove(handle);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    /// Add a stored source to the live set. Returns false when it is unknown
    /// or already live.
    pub fn register(&mut self, handle: SourceHandle) -> bool {
        self.compact();
        if !self.sources.contains(handle) || !self.members.insert(handle) {
            return false;
        }
        self.live.push(handle);
        self.mark_dirty();
        true
    }

    /// Remove a source from the live set, keeping it stored.
    pub fn unregister(&mut self, handle: SourceHandle) -> bool {
        let was_live = self.members.remove(&handle);
        if was_live {
            self.live.retain(|h| *h != handle);
            self.mark_dirty();
        }
        self.compact();
        was_live
    }

    /// Drop stale live entries. Returns how many were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.live.len();
        let sources = &self.sources;
        let members = &mut self.members;
        self.live.retain(|h| {
            let alive = sources.contains(*h);
            if !alive {
                members.remove(h);
            }
            alive
        });
        let removed = before - self.live.len();
        if removed > 0 {
            debug!("Compacted {} stale heat sources", removed);
        }
        removed
    }

    /// Note that a source changed (moved, toggled, retuned).
    pub fn mark_dirty(&mut self) {
        self.revision = self.revision.wrapping_add(1);
        debug!("Heat sources changed (revision {})", self.revision);
    }

    /// Counter bumped on every change, for consumers caching results.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, handle: SourceHandle) -> Option<&HeatSource> {
        self.sources.get(handle)
    }

    /// Mutable access; marks the registry dirty.
    pub fn get_mut(&mut self, handle: SourceHandle) -> Option<&mut HeatSource> {
        if self.sources.contains(handle) {
            self.mark_dirty();
        }
        self.sources.get_mut(handle)
    }

    pub fn is_live(&self, handle: SourceHandle) -> bool {
        self.members.contains(&handle) && self.sources.contains(handle)
    }

    /// Live sources that still exist.
    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|h| self.sources.contains(**h)).count()
    }

    /// Enabled live sources in registration order.
    pub fn active(&self) -> impl Iterator<Item = (SourceHandle, &HeatSource)> + '_ {
        self.live
            .iter()
            .filter_map(|h| self.sources.get(*h).map(|s| (*h, s)))
            .filter(|(_, s)| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{frame_from_degrees, rotation_from_degrees};
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_point_source_at_half_radius() {
        let s = HeatSource::point(Vec3::zeros(), 10.0, 300.0, Falloff::Linear);
        assert_relative_eq!(s.sample_at(&Vec3::new(150.0, 0.0, 0.0)), 5.0, epsilon = 1e-5);
        assert_eq!(s.sample_at(&Vec3::new(300.0, 0.0, 0.0)), 0.0);
        assert_eq!(s.sample_at(&Vec3::new(0.0, 400.0, 0.0)), 0.0);
    }

    #[test]
    fn test_falloff_shapes() {
        assert_eq!(Falloff::None.weight(299.0, 300.0), 1.0);
        assert_eq!(Falloff::None.weight(300.0, 300.0), 0.0);
        assert_relative_eq!(Falloff::InverseSquare.weight(150.0, 300.0), 0.8);
        assert_eq!(Falloff::Linear.weight(0.0, 0.0), 0.0);
        assert_eq!(Falloff::Linear.weight(0.0, 1e-5), 0.0);
    }

    #[test]
    fn test_disabled_source_is_silent() {
        let mut s = HeatSource::point(Vec3::zeros(), 25.0, 300.0, Falloff::None);
        s.enabled = false;
        assert_eq!(s.sample_at(&Vec3::zeros()), 0.0);
    }

    #[test]
    fn test_owner_scale_widens_radius() {
        let mut s = HeatSource::point(Vec3::zeros(), 10.0, 100.0, Falloff::None);
        s.owner.scale = Vec3::new(1.0, 3.0, 2.0);
        let p = Vec3::new(200.0, 0.0, 0.0);
        assert_eq!(s.sample_at(&p), 0.0);
        s.affect_by_owner_scale = true;
        assert_eq!(s.sample_at(&p), 10.0);
        assert_eq!(s.bounds_world().max, Vec3::repeat(300.0));
    }

    #[test]
    fn test_box_source_is_oriented_with_hard_edge() {
        let owner = frame_from_degrees(Vec3::new(1000.0, 0.0, 0.0), [0.0, 0.0, 90.0]);
        let s = HeatSource::boxed(owner, -15.0, Vec3::new(300.0, 50.0, 50.0));

        // Long axis rotated onto world Y
        assert_eq!(s.sample_at(&Vec3::new(1000.0, 250.0, 0.0)), -15.0);
        assert_eq!(s.sample_at(&Vec3::new(1250.0, 0.0, 0.0)), 0.0);

        let b = s.bounds_world();
        assert_relative_eq!(b.max.y, 300.0, epsilon = 1e-3);
        assert_relative_eq!(b.max.x, 1050.0, epsilon = 1e-3);
    }

    #[test]
    fn test_register_is_at_most_once() {
        let mut reg = HeatSourceRegistry::new();
        let h = reg.spawn(HeatSource::default());
        assert!(!reg.register(h));
        assert_eq!(reg.live_count(), 1);

        assert!(reg.unregister(h));
        assert!(!reg.unregister(h));
        assert_eq!(reg.live_count(), 0);
        assert!(reg.get(h).is_some());

        assert!(reg.register(h));
        assert_eq!(reg.active().count(), 1);
    }

    #[test]
    fn test_despawned_sources_are_compacted() {
        let mut reg = HeatSourceRegistry::new();
        let a = reg.spawn(HeatSource::default());
        let b = reg.spawn(HeatSource::default());
        let c = reg.spawn(HeatSource::default());

        reg.despawn(b);
        assert_eq!(reg.live_count(), 2);
        assert_eq!(reg.active().map(|(h, _)| h).collect::<Vec<_>>(), vec![a, c]);

        // Next registry event sweeps the stale entry
        reg.unregister(c);
        assert_eq!(reg.compact(), 0);
        assert!(reg.is_live(a));
        assert!(!reg.is_live(b));
    }

    #[test]
    fn test_revision_tracks_changes() {
        let mut reg = HeatSourceRegistry::new();
        let start = reg.revision();
        let h = reg.spawn(HeatSource::default());
        assert!(reg.revision() > start);

        let before = reg.revision();
        if let Some(s) = reg.get_mut(h) {
            s.owner.isometry.rotation = rotation_from_degrees([0.0, 0.0, 10.0]);
        }
        assert!(reg.revision() > before);
    }

    #[test]
    fn test_active_skips_disabled() {
        let mut reg = HeatSourceRegistry::new();
        let a = reg.spawn(HeatSource::default());
        let b = reg.spawn(HeatSource::default());
        reg.get_mut(a).unwrap().enabled = false;
        let active: Vec<_> = reg.active().map(|(h, _)| h).collect();
        assert_eq!(active, vec![b]);
    }
}
