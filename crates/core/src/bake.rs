//! Time-sliced bake of sky view and wall permeability into volume fields.
//!
//! The engine is a resumable state machine. [`BakeEngine::kickstart`] queues
//! every known volume; each call to [`BakeEngine::step`] samples a bounded
//! batch of cells for the active job. A finished job is committed to its
//! volume in one swap and the next queued volume starts straight away.
//!
//! ```text
//! Idle -> Sizing -> Sampling -> Committing -> Sizing | Idle
//! ```

use crate::config::{GridSettings, ThermalSettings};
use crate::core_types::{Aabb, Frame, Vec3};
use crate::field::{FieldGrid, GridDims};
use crate::occlusion::OcclusionProbe;
use crate::volume::{Volume, VolumeHandle, VolumeSet};
use nalgebra::{Isometry3, Point3, Translation3, Vector3};
use std::collections::VecDeque;
use std::f32::consts::PI;
use tracing::{debug, info, warn};

/// Sky rays cast per cell.
pub const HEMISPHERE_SAMPLES: usize = 12;

/// Tilt between consecutive near-zenith directions (degrees).
const STACK_TILT_DEG: f32 = 10.0;

const NEIGHBOR_OFFSETS: [[i64; 3]; 6] = [
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
];

/// Fixed upper-hemisphere sample directions.
///
/// Three quarters follow a golden-angle spiral with cosine-weighted
/// elevation; the rest form a near-vertical stack starting at the zenith.
pub fn hemisphere_directions() -> Vec<Vec3> {
    let dome = HEMISPHERE_SAMPLES * 3 / 4;
    let stack = HEMISPHERE_SAMPLES - dome;
    let golden_angle = PI * (3.0 - 5.0_f32.sqrt());

    let mut dirs = Vec::with_capacity(HEMISPHERE_SAMPLES);
    for i in 0..dome {
        let u = (i as f32 + 0.5) / dome as f32;
        let radial = u.sqrt();
        let z = (1.0 - u).sqrt();
        let phi = i as f32 * golden_angle;
        dirs.push(Vec3::new(radial * phi.cos(), radial * phi.sin(), z).normalize());
    }
    for j in 0..stack {
        let theta = (j as f32 * STACK_TILT_DEG).to_radians();
        let phi = j as f32 * golden_angle;
        dirs.push(Vec3::new(
            theta.sin() * phi.cos(),
            theta.sin() * phi.sin(),
            theta.cos(),
        ));
    }
    dirs
}

/// Engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakePhase {
    /// Queue empty, no active job
    Idle,
    /// Computing dimensions for the next queued volume
    Sizing,
    /// Sampling cells of the active job
    Sampling,
    /// Publishing a finished job
    Committing,
}

/// What a call to [`BakeEngine::step`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Nothing to bake
    Idle,
    /// A batch was sampled; the job continues
    Sampled { volume: VolumeHandle, fraction: f32 },
    /// The job finished and its field was attached to the volume
    Committed { volume: VolumeHandle, cells: usize },
    /// The active volume disappeared; its job was dropped
    Abandoned { volume: VolumeHandle },
}

/// Working state for one volume.
#[derive(Debug, Clone)]
struct BakeJob {
    volume: VolumeHandle,
    frame: Frame,
    cell_size_cm: f32,
    /// Lattice index of cell (0,0,0) of this job
    cell_origin: Vector3<i64>,
    dims: GridDims,
    total: usize,
    processed: usize,
    sky: Vec<f32>,
    wall: Vec<f32>,
    indoor: Vec<f32>,
}

impl BakeJob {
    fn cell_of(&self, index: usize) -> Vector3<i64> {
        let (nx, ny) = (self.dims.x, self.dims.y);
        Vector3::new(
            (index % nx) as i64,
            ((index / nx) % ny) as i64,
            (index / (nx * ny)) as i64,
        )
    }

    fn in_bounds(&self, cell: &Vector3<i64>) -> bool {
        (0..3).all(|axis| cell[axis] >= 0 && (cell[axis] as usize) < self.dims[axis])
    }

    fn cell_center_world(&self, cell: &Vector3<i64>) -> Vec3 {
        let local = (self.cell_origin + cell).map(|i| (i as f32 + 0.5) * self.cell_size_cm);
        (self.frame * Point3::from(local)).coords
    }

    /// Frame of the committed field: lattice corner of cell (0,0,0).
    fn field_frame(&self) -> Frame {
        let corner = self.cell_origin.map(|i| i as f32 * self.cell_size_cm);
        let origin = (self.frame * Point3::from(corner)).coords;
        Isometry3::from_parts(Translation3::from(origin), self.frame.rotation)
    }

    fn fraction(&self) -> f32 {
        if self.processed >= self.total {
            1.0
        } else {
            self.processed as f32 / self.total as f32
        }
    }
}

type ProgressListener = Box<dyn FnMut(f32) + Send>;

/// Queue-driven bake state machine.
pub struct BakeEngine {
    grid: GridSettings,
    directions: Vec<Vec3>,
    queue: VecDeque<VolumeHandle>,
    job: Option<BakeJob>,
    phase: BakePhase,
    listeners: Vec<ProgressListener>,
}

impl std::fmt::Debug for BakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BakeEngine")
            .field("phase", &self.phase)
            .field("queued", &self.queue.len())
            .field("active", &self.job.as_ref().map(|j| j.volume))
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl BakeEngine {
    pub fn new(settings: &ThermalSettings) -> Self {
        Self {
            grid: settings.grid,
            directions: hemisphere_directions(),
            queue: VecDeque::new(),
            job: None,
            phase: BakePhase::Idle,
            listeners: Vec::new(),
        }
    }

    /// Register a progress callback, called with the job fraction in [0,1]:
    /// 0 when a job starts, after every batch, and exactly 1 on completion.
    pub fn on_progress<F>(&mut self, listener: F)
    where
        F: FnMut(f32) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn phase(&self) -> BakePhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == BakePhase::Idle
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn active_volume(&self) -> Option<VolumeHandle> {
        self.job.as_ref().map(|j| j.volume)
    }

    /// Progress of the active job.
    pub fn progress(&self) -> Option<f32> {
        self.job.as_ref().map(BakeJob::fraction)
    }

    pub fn directions(&self) -> &[Vec3] {
        &self.directions
    }

    /// Queue every known volume and start the first one. Any active job is
    /// dropped without committing. Returns the number of volumes queued.
    pub fn kickstart(&mut self, volumes: &VolumeSet) -> usize {
        self.directions = hemisphere_directions();
        if let Some(job) = self.job.take() {
            info!(
                "Abandoning bake of {:?} at {}/{} cells",
                job.volume, job.processed, job.total
            );
        }

        self.queue = volumes.handles().into_iter().collect();
        let queued = self.queue.len();
        info!("Queued {} volumes for baking", queued);
        self.start_next(volumes);
        queued
    }

    /// Append one volume to the queue, starting it when nothing is active.
    pub fn enqueue(&mut self, volumes: &VolumeSet, volume: VolumeHandle) {
        self.queue.push_back(volume);
        if self.job.is_none() {
            self.start_next(volumes);
        }
    }

    /// Sample one batch of the configured size.
    pub fn step(&mut self, volumes: &mut VolumeSet, probe: &OcclusionProbe<'_>) -> StepOutcome {
        self.step_cells(volumes, probe, self.grid.bake_batch_cells)
    }

    /// Sample up to `max_cells` cells of the active job.
    pub fn step_cells(
        &mut self,
        volumes: &mut VolumeSet,
        probe: &OcclusionProbe<'_>,
        max_cells: usize,
    ) -> StepOutcome {
        let Some(job) = self.job.as_mut() else {
            self.phase = BakePhase::Idle;
            return StepOutcome::Idle;
        };
        let volume = job.volume;

        if !volumes.contains(volume) {
            debug!("Volume {:?} vanished mid-bake, dropping its job", volume);
            self.job = None;
            self.start_next(volumes);
            return StepOutcome::Abandoned { volume };
        }

        let ray_length = self.grid.sky_ray_length_cm;
        let end = (job.processed + max_cells.max(1)).min(job.total);
        for index in job.processed..end {
            let cell = job.cell_of(index);
            let center = job.cell_center_world(&cell);

            let sky_sum: f32 = self
                .directions
                .iter()
                .map(|dir| probe.ray_permeability01(&center, dir, ray_length))
                .sum();
            let sky = (sky_sum / self.directions.len().max(1) as f32).clamp(0.0, 1.0);

            let mut wall_sum = 0.0;
            let mut neighbors = 0_u32;
            for offset in &NEIGHBOR_OFFSETS {
                let neighbor = cell + Vector3::from(*offset);
                if !job.in_bounds(&neighbor) {
                    continue;
                }
                let neighbor_center = job.cell_center_world(&neighbor);
                wall_sum += probe
                    .segment_permeability01(&center, &neighbor_center, job.cell_size_cm)
                    .clamp(0.0, 1.0);
                neighbors += 1;
            }
            let wall = if neighbors > 0 {
                wall_sum / neighbors as f32
            } else {
                1.0
            };

            job.sky[index] = sky;
            job.wall[index] = wall;
            job.indoor[index] = (1.0 - sky) * (1.0 - wall);
        }
        job.processed = end;
        let total = job.total;

        let fraction = job.fraction();
        debug!(
            "Bake {:?}: {}/{} cells ({:.1}%)",
            volume,
            job.processed,
            job.total,
            fraction * 100.0
        );
        self.emit_progress(fraction);

        if end < total {
            return StepOutcome::Sampled { volume, fraction };
        }

        self.commit(volumes)
            .map_or(StepOutcome::Abandoned { volume }, |cells| {
                StepOutcome::Committed { volume, cells }
            })
    }

    /// Step until the queue drains. Returns the number of committed volumes.
    pub fn run_to_completion(&mut self, volumes: &mut VolumeSet, probe: &OcclusionProbe<'_>) -> usize {
        let mut committed = 0;
        loop {
            match self.step(volumes, probe) {
                StepOutcome::Idle => break,
                StepOutcome::Committed { .. } => committed += 1,
                StepOutcome::Sampled { .. } | StepOutcome::Abandoned { .. } => {}
            }
        }
        committed
    }

    fn emit_progress(&mut self, fraction: f32) {
        for listener in &mut self.listeners {
            listener(fraction);
        }
    }

    /// Publish the finished job and move on. Returns the committed cell count.
    fn commit(&mut self, volumes: &mut VolumeSet) -> Option<usize> {
        self.phase = BakePhase::Committing;
        let job = self.job.take()?;
        let cells = job.total;
        let frame = job.field_frame();

        let committed = match volumes.get_mut(job.volume) {
            Some(volume) => {
                let grid = FieldGrid::from_baked(
                    job.dims,
                    job.cell_size_cm,
                    frame,
                    job.sky,
                    job.wall,
                    job.indoor,
                );
                volume.attach_grid(grid);
                info!(
                    "Committed field for {:?}: {}x{}x{} cells at {} cm",
                    job.volume, job.dims.x, job.dims.y, job.dims.z, job.cell_size_cm
                );
                Some(cells)
            }
            None => None,
        };

        self.start_next(volumes);
        committed
    }

    /// Pop queued volumes until one sizes to a non-empty job.
    fn start_next(&mut self, volumes: &VolumeSet) -> bool {
        self.phase = BakePhase::Sizing;
        while let Some(handle) = self.queue.pop_front() {
            let Some(volume) = volumes.get(handle) else {
                debug!("Skipping stale volume {:?}", handle);
                continue;
            };
            if let Some(job) = self.size_job(handle, volume) {
                info!(
                    "Baking {:?}: {}x{}x{} cells at {} cm ({} queued)",
                    handle,
                    job.dims.x,
                    job.dims.y,
                    job.dims.z,
                    job.cell_size_cm,
                    self.queue.len()
                );
                self.job = Some(job);
                self.phase = BakePhase::Sampling;
                self.emit_progress(0.0);
                return true;
            }
        }
        self.job = None;
        self.phase = BakePhase::Idle;
        false
    }

    /// Integer cell bounds of the volume in its lattice frame.
    fn size_job(&self, handle: VolumeHandle, volume: &Volume) -> Option<BakeJob> {
        let cell = volume.effective_cell_size(self.grid.default_cell_size_cm);
        if !(cell.is_finite() && cell > 0.0) {
            debug!("Skipping {:?}: invalid cell size {}", handle, cell);
            return None;
        }

        let frame = volume.grid_frame();
        let corners = volume
            .world_bounds()
            .corners()
            .map(|c| frame.inverse_transform_point(&Point3::from(c)).coords);
        let local = Aabb::enclosing(corners)?;
        let finite = |v: &Vec3| v.iter().all(|c| c.is_finite());
        if !(finite(&local.min) && finite(&local.max)) {
            debug!("Skipping {:?}: non-finite bounds", handle);
            return None;
        }

        let lo = (local.min / cell).map(|v| v.floor() as i64);
        let hi = (local.max / cell).map(|v| v.ceil() as i64 - 1);
        let Some(dims) = cell_span(&lo, &hi) else {
            warn!("Skipping {:?}: cell range overflows", handle);
            return None;
        };

        let total = dims
            .x
            .checked_mul(dims.y)
            .and_then(|xy| xy.checked_mul(dims.z))
            .unwrap_or(usize::MAX);
        if total == 0 {
            debug!("Skipping {:?}: zero-cell grid", handle);
            return None;
        }
        if total > self.grid.max_bake_cells {
            warn!(
                "Skipping {:?}: {}x{}x{} cells exceeds the bake limit of {}",
                handle, dims.x, dims.y, dims.z, self.grid.max_bake_cells
            );
            return None;
        }

        Some(BakeJob {
            volume: handle,
            frame,
            cell_size_cm: cell,
            cell_origin: lo,
            dims,
            total,
            processed: 0,
            sky: vec![0.0; total],
            wall: vec![0.0; total],
            indoor: vec![0.0; total],
        })
    }
}

/// Cells per axis covering `lo..=hi`, or `None` when the range overflows.
fn cell_span(lo: &Vector3<i64>, hi: &Vector3<i64>) -> Option<GridDims> {
    let mut dims = GridDims::zeros();
    for axis in 0..3 {
        let span = hi[axis].checked_sub(lo[axis])?.checked_add(1)?;
        dims[axis] = usize::try_from(span.max(0)).ok()?;
    }
    Some(dims)
}
