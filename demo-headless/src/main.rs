use chrono::{DateTime, Utc};
use clap::Parser;
use nalgebra::UnitQuaternion;
use std::path::PathBuf;
use thermal_field_core::core_types::Aabb;
use thermal_field_core::{
    BakeEngine, Falloff, GridOrientationMode, HeatSource, HeatSourceRegistry, ObstacleScene, OcclusionProbe,
    StepOutcome, ThermalComposer, ThermalError, ThermalSense, ThermalSettings, Vec3, Volume, VolumeSet,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Thermal field demo: bakes a small yard with a house and queries it
#[derive(Parser, Debug)]
#[command(name = "thermal-field-headless")]
#[command(about = "Bake and query a thermal field without an engine", long_about = None)]
struct Args {
    /// Settings JSON file (defaults are used when omitted)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Cell size for the yard volume in cm
    #[arg(short, long, default_value_t = 100.0)]
    cell_size: f32,

    /// Cells sampled per bake step
    #[arg(short, long)]
    batch: Option<usize>,

    /// Hour of day (0-24) for the composed temperatures
    #[arg(long, default_value_t = 15.0)]
    hour: f32,

    /// Use the winter curve instead of summer
    #[arg(short, long)]
    winter: bool,

    /// Cloud cover (0 = clear, 1 = overcast)
    #[arg(long, default_value_t = 0.3)]
    weather: f32,

    /// Campfire intensity in °C
    #[arg(long, default_value_t = 25.0)]
    fire: f32,

    /// Timestamp for the seasonal query (RFC 3339, defaults to now)
    #[arg(short, long)]
    time: Option<String>,

    /// Write the yard field as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write the yard field as CSV
    #[arg(long)]
    csv: Option<PathBuf>,
}

/// House: concrete room over x, y in [0, 600] cm with a 350 cm roof and a
/// high window gap in the south wall.
/// Tree: a loose canopy east of the house.
fn build_scene() -> ObstacleScene {
    let mut scene = ObstacleScene::new();
    scene
        .add_box(Aabb::new(Vec3::new(-20.0, -20.0, 350.0), Vec3::new(620.0, 620.0, 380.0)), Some(2400.0))
        .add_box(Aabb::new(Vec3::new(600.0, -20.0, 0.0), Vec3::new(620.0, 620.0, 380.0)), Some(2400.0))
        .add_box(Aabb::new(Vec3::new(-20.0, -20.0, 0.0), Vec3::new(0.0, 620.0, 380.0)), Some(2400.0))
        .add_box(Aabb::new(Vec3::new(-20.0, 600.0, 0.0), Vec3::new(620.0, 620.0, 380.0)), Some(2400.0))
        .add_box(Aabb::new(Vec3::new(-20.0, -20.0, 0.0), Vec3::new(620.0, 0.0, 280.0)), Some(2400.0))
        .add_box(Aabb::new(Vec3::new(900.0, 800.0, 250.0), Vec3::new(1200.0, 1100.0, 450.0)), Some(600.0));
    scene
}

fn parse_time(raw: Option<&str>) -> DateTime<Utc> {
    match raw.map(DateTime::parse_from_rfc3339) {
        Some(Ok(time)) => time.with_timezone(&Utc),
        Some(Err(e)) => {
            warn!("Could not parse --time ({}), using now", e);
            Utc::now()
        }
        None => Utc::now(),
    }
}

fn main() -> Result<(), ThermalError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    println!("=== Thermal Field Demo ===\n");

    let mut settings = match &args.settings {
        Some(path) => ThermalSettings::load(path)?,
        None => ThermalSettings::default(),
    };
    if let Some(batch) = args.batch {
        settings.grid.bake_batch_cells = batch.max(1);
    }
    settings.validate()?;

    let scene = build_scene();
    println!("Scene: {} obstacles", scene.obstacles().len());

    // Yard around the house, plus a rotated shed lattice north of it
    let mut volumes = VolumeSet::new();
    let yard = volumes.insert(
        Volume::bounded(Vec3::new(500.0, 500.0, 200.0), Vec3::new(700.0, 700.0, 200.0)).with_cell_size(args.cell_size),
    );
    let shed = volumes.insert(
        Volume::bounded(Vec3::new(300.0, 1500.0, 150.0), Vec3::new(300.0, 200.0, 150.0))
            .with_rotation(UnitQuaternion::from_euler_angles(0.0, 0.0, 30_f32.to_radians()))
            .with_orientation_mode(GridOrientationMode::ActorRotation)
            .with_cell_size(150.0),
    );

    let mut sources = HeatSourceRegistry::new();
    sources.spawn(HeatSource::point(Vec3::new(900.0, 300.0, 50.0), args.fire, 400.0, Falloff::Linear));
    sources.spawn(HeatSource::boxed(
        thermal_field_core::Frame::translation(300.0, 300.0, 50.0),
        8.0,
        Vec3::new(50.0, 50.0, 50.0),
    ));
    println!("Heat sources: {} live\n", sources.live_count());

    // Bake
    let probe = OcclusionProbe::new(thermal_field_core::ClimateModel::new(&settings), &scene);
    let mut engine = BakeEngine::new(&settings);
    engine.on_progress(|fraction| {
        if fraction == 0.0 || fraction >= 1.0 {
            info!("Bake progress {:.0}%", fraction * 100.0);
        }
    });
    let queued = engine.kickstart(&volumes);
    println!("Baking {} volume(s)...", queued);

    let mut steps = 0;
    loop {
        steps += 1;
        match engine.step(&mut volumes, &probe) {
            StepOutcome::Idle => break,
            StepOutcome::Committed { volume, cells } => println!("  committed {:?}: {} cells", volume, cells),
            StepOutcome::Abandoned { volume } => println!("  abandoned {:?}", volume),
            StepOutcome::Sampled { .. } => {}
        }
    }
    println!("Bake finished in {} steps\n", steps);

    let composer = ThermalComposer::new(&settings, &volumes, &sources, &scene);

    println!(
        "Temperatures ({}, {:.1}h, weather {:.2}):",
        if args.winter { "winter" } else { "summer" },
        args.hour,
        args.weather
    );
    println!("Location          | Composed | Baked-only | Sky   | Wall");
    println!("------------------|----------|------------|-------|------");
    let samples = [
        ("Living room", Vec3::new(300.0, 300.0, 100.0)),
        ("Roof space", Vec3::new(300.0, 300.0, 330.0)),
        ("Yard (sun)", Vec3::new(900.0, 100.0, 100.0)),
        ("By the campfire", Vec3::new(950.0, 300.0, 50.0)),
        ("Under the tree", Vec3::new(1050.0, 950.0, 100.0)),
        ("Shed", Vec3::new(300.0, 1500.0, 100.0)),
    ];
    for (label, at) in &samples {
        let composed = composer.compose_temperature_at(at, args.winter, args.hour, args.weather);
        let baked = composer.compose_baked_only_temperature_at(at, args.winter, args.hour, args.weather);
        let (sky, wall) = composer
            .nearest_baked_cell(at)
            .map_or((0.0, 1.0), |c| (c.sky_view, c.wall_permeability));
        println!(
            "{:<17} | {:>6.2}°C | {:>8.2}°C | {:.3} | {:.3}",
            label, composed, baked, sky, wall
        );
    }

    let time = parse_time(args.time.as_deref());
    let house = Vec3::new(300.0, 300.0, 100.0);
    println!("\nSeasonal query at {}:", time.to_rfc3339());
    match composer.query_nearest_baked_grid_point(&house, time) {
        Some(hit) => println!(
            "  cell {:?} in {:?}: {:.2}°C ({:.0} cm away)",
            hit.grid_index,
            hit.volume,
            hit.current_temp_c,
            hit.distance_sq.sqrt()
        ),
        None => println!("  no baked field"),
    }

    for (label, hottest) in [("Hottest", true), ("Coldest", false)] {
        if let Some(hit) = composer.find_extreme_near(&house, 800.0, hottest, time) {
            println!(
                "  {} within 8 m: {:.2}°C at ({:.0}, {:.0}, {:.0})",
                label, hit.current_temp_c, hit.cell_center_ws.x, hit.cell_center_ws.y, hit.cell_center_ws.z
            );
        }
    }

    if let Some(preview) = composer.heat_preview(yard) {
        let (lo, hi) = preview
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), c| (lo.min(c.temp_c), hi.max(c.temp_c)));
        println!("\nYard preview: {} cells, {:.2}°C .. {:.2}°C", preview.len(), lo, hi);
    }
    if let Some(grid) = volumes.get(shed).and_then(Volume::grid) {
        println!("Shed lattice: {:?} cells, rotation {:?}", grid.dims(), grid.rotation().euler_angles());
    }

    let sense = ThermalSense::default();
    let listener = Vec3::new(-800.0, 300.0, 150.0);
    match sense.sense_ambient(&composer, &listener) {
        Some(stimulus) => println!(
            "\nListener at {:?} senses {:.1}°C (strength {:.2}) at ({:.0}, {:.0})",
            listener.as_slice(),
            stimulus.temp_c,
            stimulus.strength,
            stimulus.stimulus_location.x,
            stimulus.stimulus_location.y
        ),
        None => println!("\nListener senses nothing"),
    }

    // Re-bake only the shed at a finer cell size
    if let Some(volume) = volumes.get_mut(shed) {
        volume.cell_size_override_cm = Some(75.0);
        volume.clear_grid();
    }
    engine.enqueue(&volumes, shed);
    let rebaked = engine.run_to_completion(&mut volumes, &probe);
    if let Some(grid) = volumes.get(shed).and_then(Volume::grid) {
        println!("Shed re-baked ({} volume): {:?} cells", rebaked, grid.dims());
    }

    if let Some(grid) = volumes.get(yard).and_then(Volume::grid) {
        if let Some(path) = &args.json {
            grid.save_json(path)?;
            println!("Wrote {}", path.display());
        }
        if let Some(path) = &args.csv {
            grid.save_csv(path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
