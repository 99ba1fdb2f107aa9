//! Headless Clustering Benchmark
//!
//! Run with: `cargo run --release --bin cluster_bench -- [options]`
//!
//! Runs the light clustering pipeline for a number of frames with a moving
//! light set, shades a grid of sample points with the selected strategy, then
//! reads the cluster buffer back, cross-checks it against the CPU reference
//! and logs occupancy statistics.
//!
//! Options:
//! - `--config <file.json>`: clustering configuration (defaults otherwise)
//! - `--strategy <name>`: naive | forward-plus | clustered-deferred | clustered-deferred-packed
//! - `--frames <n>`: frames to run (default 120)
//! - `--lights <n>`: active light count override
//! - `--shaders <dir>`: load WGSL from a directory instead of the embedded copies

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use glam::Vec3;

use cluster_lights_engine::logging::{LoggingConfig, init_logging};
use cluster_lights_engine::render::camera_uniforms::CameraUniforms;
use cluster_lights_engine::render::cluster_config::{ClusteringConfig, validate_depth_range};
use cluster_lights_engine::render::cluster_cpu::run_clustering_cpu;
use cluster_lights_engine::render::cluster_dispatch::LightClustering;
use cluster_lights_engine::render::gpu_context::{GpuContext, GpuContextConfig};
use cluster_lights_engine::render::light_store::GpuLight;
use cluster_lights_engine::render::readback::{read_cluster_grid, read_light_records, read_pod_vec};
use cluster_lights_engine::render::shader_loader::ClusteringShaders;
use cluster_lights_engine::render::shading::{FrameRenderer, LightSamplePass, ShadingStrategy};

/// Sample points per axis of the shading grid.
const SAMPLE_GRID: u32 = 32;

struct BenchArgs {
    config_path: Option<PathBuf>,
    strategy: ShadingStrategy,
    frames: u32,
    lights: Option<u32>,
    shader_dir: Option<PathBuf>,
}

impl BenchArgs {
    fn parse() -> Result<Self> {
        let mut args = BenchArgs {
            config_path: None,
            strategy: ShadingStrategy::default(),
            frames: 120,
            lights: None,
            shader_dir: None,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(flag) = iter.next() {
            let mut value = || iter.next().with_context(|| format!("{flag} needs a value"));
            match flag.as_str() {
                "--config" => args.config_path = Some(PathBuf::from(value()?)),
                "--strategy" => args.strategy = value()?.parse()?,
                "--frames" => args.frames = value()?.parse().context("--frames")?,
                "--lights" => args.lights = Some(value()?.parse().context("--lights")?),
                "--shaders" => args.shader_dir = Some(PathBuf::from(value()?)),
                other => bail!("unknown argument '{other}'"),
            }
        }
        Ok(args)
    }
}

/// Camera in front of the light motion box, looking at its center.
fn bench_camera(config: &ClusteringConfig) -> Result<CameraUniforms> {
    let min = Vec3::from_array(config.motion.bounds_min);
    let max = Vec3::from_array(config.motion.bounds_max);
    let center = (min + max) * 0.5;
    let extent = (max - min).max_element();
    let eye = center + Vec3::new(0.0, 0.0, extent);
    let near = 0.1;
    let far = extent * 4.0;
    validate_depth_range(near, far)?;
    Ok(CameraUniforms::look_at(
        eye,
        center,
        60f32.to_radians(),
        [1920.0, 1080.0],
        near,
        far,
    ))
}

/// View-space sample points on the mid-depth plane of the motion box.
fn sample_points(config: &ClusteringConfig, camera: &CameraUniforms) -> Vec<Vec3> {
    let min = Vec3::from_array(config.motion.bounds_min);
    let max = Vec3::from_array(config.motion.bounds_max);
    let z = (min.z + max.z) * 0.5;
    let mut points = Vec::with_capacity((SAMPLE_GRID * SAMPLE_GRID) as usize);
    for j in 0..SAMPLE_GRID {
        for i in 0..SAMPLE_GRID {
            let u = (i as f32 + 0.5) / SAMPLE_GRID as f32;
            let v = (j as f32 + 0.5) / SAMPLE_GRID as f32;
            let world = Vec3::new(min.x + (max.x - min.x) * u, min.y + (max.y - min.y) * v, z);
            points.push(camera.view_position(world));
        }
    }
    points
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    let args = BenchArgs::parse()?;

    let mut config = match &args.config_path {
        Some(path) => ClusteringConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClusteringConfig::default(),
    };
    if let Some(n) = args.lights {
        config.num_lights = n;
    }
    config.validate()?;

    let ctx = GpuContext::new(GpuContextConfig::default()).context("acquiring GPU")?;
    let shaders = match &args.shader_dir {
        Some(dir) => ClusteringShaders::from_dir(dir)
            .with_context(|| format!("loading shaders from {}", dir.display()))?,
        None => ClusteringShaders::embedded(),
    };

    let camera = bench_camera(&config)?;
    let mut clustering = LightClustering::new(&ctx.device, config.clone(), &shaders)?;
    clustering.update_camera(&ctx.queue, &camera);

    let samples = sample_points(&config, &camera);
    let mut pass = LightSamplePass::for_clustering(
        &ctx.device,
        args.strategy,
        &clustering,
        &shaders.clustered_shading,
        samples.len() as u32,
    );
    pass.upload_samples(&ctx.queue, &samples);
    let mut renderer = FrameRenderer::new(clustering, pass);

    log::info!(
        "running {} frames: {} lights, {}x{}x{} clusters, {} shading",
        args.frames,
        config.num_lights,
        config.clusters_x,
        config.clusters_y,
        config.clusters_z,
        args.strategy
    );

    let mut total = Duration::ZERO;
    let mut worst = Duration::ZERO;
    let mut time = 0.0f32;
    for frame in 0..args.frames {
        time = frame as f32 / 60.0;
        let start = Instant::now();
        renderer.render_frame(&ctx.device, &ctx.queue, time);
        ctx.wait_idle()?;
        let elapsed = start.elapsed();
        total += elapsed;
        worst = worst.max(elapsed);
        log::trace!("frame {frame}: {:.3} ms", elapsed.as_secs_f64() * 1e3);
    }
    if args.frames > 0 {
        log::info!(
            "frame time: {:.3} ms avg, {:.3} ms worst",
            total.as_secs_f64() * 1e3 / f64::from(args.frames),
            worst.as_secs_f64() * 1e3
        );
    }

    let radiance: Vec<[f32; 4]> = read_pod_vec(&ctx.device, &ctx.queue, renderer.pass().radiance_buffer())?;
    let energy: f32 = radiance.iter().map(|r| r[0] + r[1] + r[2]).sum();
    log::info!("sampled radiance: {:.4} total over {} points", energy, samples.len());

    if !args.strategy.uses_clusters() {
        return Ok(());
    }

    let clustering = renderer.clustering();
    let n = clustering.num_lights();
    let outputs = clustering.outputs();
    let grid = read_cluster_grid(&ctx.device, &ctx.queue, clustering.cluster_buffer(), outputs.dims)?;
    let occupied = grid.occupied_clusters();
    log::info!(
        "clusters: {} of {} occupied, {} assignments, max {} per cluster (capacity {}), {} dropped",
        occupied,
        grid.num_clusters(),
        grid.total_assignments(),
        grid.max_count(),
        grid.capacity,
        grid.dropped
    );
    if occupied > 0 {
        log::info!(
            "mean lights per occupied cluster: {:.2}",
            grid.total_assignments() as f64 / f64::from(occupied)
        );
    }

    // CPU reference over the same records the GPU clustered
    let records = read_light_records(
        &ctx.device,
        &ctx.queue,
        clustering.light_buffer(),
        clustering.light_store().capacity(),
    )?;
    let cpu = run_clustering_cpu(&records, n, clustering.config(), clustering.camera());
    let seeds = |lights: &[u32], table: &[GpuLight]| -> BTreeSet<u32> {
        lights.iter().map(|&i| table[i as usize].seed.to_bits()).collect()
    };
    let mismatched = (0..grid.num_clusters())
        .filter(|&c| seeds(grid.lights(c), &records) != seeds(cpu.grid.lights(c), &cpu.lights))
        .count();
    if mismatched == 0 {
        log::info!("cpu cross-check: all {} clusters match (t = {time:.2})", grid.num_clusters());
    } else {
        log::warn!(
            "cpu cross-check: {mismatched} of {} clusters differ (t = {time:.2})",
            grid.num_clusters()
        );
    }
    Ok(())
}
