//! GPU Clustering Tests - Compute Pipeline Against the CPU Reference
//!
//! Each test acquires a headless adapter and returns early when none is
//! available, so the suite passes on machines without a GPU.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_3};

use glam::Vec3;

use cluster_lights_engine::logging::{LoggingConfig, init_logging};
use cluster_lights_engine::render::camera_uniforms::CameraUniforms;
use cluster_lights_engine::render::cluster_config::{ClusteringConfig, ClusteringMode, DepthWarp};
use cluster_lights_engine::render::cluster_cpu::{cluster_aabb, run_clustering_cpu, sphere_aabb_intersect};
use cluster_lights_engine::render::cluster_dispatch::{FrameStage, LightClustering};
use cluster_lights_engine::render::gpu_context::{GpuContext, GpuContextConfig};
use cluster_lights_engine::render::light_sort::PADDING_SORT_KEY;
use cluster_lights_engine::render::light_store::{GpuLight, light_position_at};
use cluster_lights_engine::render::readback::{read_cluster_grid, read_light_records, read_pod_vec};
use cluster_lights_engine::render::shader_loader::ClusteringShaders;
use cluster_lights_engine::render::shading::{FrameRenderer, LightSamplePass, ShadingPass, ShadingStrategy};
use cluster_lights_engine::render::zbin::ZBin;

fn gpu() -> Option<GpuContext> {
    init_logging(LoggingConfig::for_tests());
    match GpuContext::new(GpuContextConfig {
        high_performance: false,
        ..Default::default()
    }) {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            log::warn!("no GPU available, skipping: {err}");
            None
        }
    }
}

fn light_at(p: Vec3) -> GpuLight {
    GpuLight {
        position: p.to_array(),
        color: [1.0, 1.0, 1.0],
        ..Default::default()
    }
}

fn forward_camera() -> CameraUniforms {
    CameraUniforms::look_at(Vec3::ZERO, Vec3::NEG_Z, FRAC_PI_2, [512.0, 512.0], 1.0, 100.0)
}

fn scene_camera() -> CameraUniforms {
    CameraUniforms::look_at(
        Vec3::new(0.0, 6.0, 24.0),
        Vec3::new(0.0, 6.0, 0.0),
        FRAC_PI_3,
        [1280.0, 720.0],
        0.5,
        60.0,
    )
}

fn small_grid_config() -> ClusteringConfig {
    ClusteringConfig {
        max_num_lights: 3,
        num_lights: 3,
        clusters_x: 2,
        clusters_y: 2,
        clusters_z: 2,
        num_zbins: 4,
        light_radius: 0.5,
        depth_warp: DepthWarp::Logarithmic,
        ..Default::default()
    }
}

fn three_lights() -> Vec<GpuLight> {
    vec![
        light_at(Vec3::new(-2.0, -2.0, -5.0)),
        light_at(Vec3::new(3.0, 3.0, -20.0)),
        light_at(Vec3::new(-30.0, 30.0, -50.0)),
    ]
}

/// Record and submit one clustering frame over `n` lights.
fn cluster_frame(ctx: &GpuContext, clustering: &mut LightClustering, n: u32) {
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("test_cluster_frame"),
    });
    clustering.run_clustering_for(&ctx.queue, &mut encoder, n);
    ctx.queue.submit(std::iter::once(encoder.finish()));
}

// ============================================================================
// End to End
// ============================================================================

#[test]
fn test_gpu_three_lights_match_expected_cells() {
    let Some(ctx) = gpu() else { return };
    let config = small_grid_config();
    let mut clustering =
        LightClustering::new(&ctx.device, config.clone(), &ClusteringShaders::embedded()).unwrap();
    assert_eq!(clustering.binding_mismatches(), 0);

    clustering.light_store().write_lights(&ctx.queue, &three_lights()).unwrap();
    clustering.update_camera(&ctx.queue, &forward_camera());
    cluster_frame(&ctx, &mut clustering, 3);
    assert_eq!(clustering.stage(), FrameStage::Clustered);

    let sorted = read_light_records(&ctx.device, &ctx.queue, clustering.light_buffer(), 3).unwrap();
    assert_eq!(sorted, three_lights());

    let keys: Vec<f32> = read_pod_vec(&ctx.device, &ctx.queue, clustering.keys_buffer()).unwrap();
    assert_eq!(&keys[..3], &[5.0, 20.0, 50.0]);
    assert_eq!(keys[3], PADDING_SORT_KEY);

    let zbins: Vec<ZBin> = read_pod_vec(&ctx.device, &ctx.queue, clustering.zbin_buffer()).unwrap();
    assert_eq!(
        zbins,
        vec![ZBin::EMPTY, ZBin::new(0, 0), ZBin::new(1, 1), ZBin::new(2, 2)]
    );

    let grid = read_cluster_grid(&ctx.device, &ctx.queue, clustering.cluster_buffer(), [2, 2, 2]).unwrap();
    let expected: [&[u32]; 8] = [&[0], &[], &[], &[], &[], &[], &[2], &[1]];
    for (cluster, lights) in expected.iter().enumerate() {
        assert_eq!(grid.lights(cluster as u32), *lights, "cluster {cluster}");
    }
    assert_eq!(grid.dropped, 0);
}

#[test]
fn test_gpu_frame_reset_with_zero_lights() {
    let Some(ctx) = gpu() else { return };
    let mut clustering =
        LightClustering::new(&ctx.device, small_grid_config(), &ClusteringShaders::embedded()).unwrap();
    clustering.light_store().write_lights(&ctx.queue, &three_lights()).unwrap();
    clustering.update_camera(&ctx.queue, &forward_camera());

    cluster_frame(&ctx, &mut clustering, 3);
    let first = read_cluster_grid(&ctx.device, &ctx.queue, clustering.cluster_buffer(), [2, 2, 2]).unwrap();
    assert_eq!(first.total_assignments(), 3);

    cluster_frame(&ctx, &mut clustering, 0);
    let second = read_cluster_grid(&ctx.device, &ctx.queue, clustering.cluster_buffer(), [2, 2, 2]).unwrap();
    assert_eq!(second.total_assignments(), 0);
    assert_eq!(second.dropped, 0);

    let zbins: Vec<ZBin> = read_pod_vec(&ctx.device, &ctx.queue, clustering.zbin_buffer()).unwrap();
    assert!(zbins.iter().all(ZBin::is_empty));
}

#[test]
fn test_gpu_overflow_drops_silently() {
    let Some(ctx) = gpu() else { return };
    let config = ClusteringConfig {
        max_num_lights: 100,
        num_lights: 100,
        max_lights_per_cluster: 8,
        light_radius: 0.25,
        ..small_grid_config()
    };
    let mut clustering =
        LightClustering::new(&ctx.device, config, &ClusteringShaders::embedded()).unwrap();
    let crowd = vec![light_at(Vec3::new(-2.0, -2.0, -5.0)); 100];
    clustering.light_store().write_lights(&ctx.queue, &crowd).unwrap();
    clustering.update_camera(&ctx.queue, &forward_camera());

    let mut encoder = ctx.device.create_command_encoder(&Default::default());
    clustering.run_clustering(&ctx.queue, &mut encoder);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let grid = read_cluster_grid(&ctx.device, &ctx.queue, clustering.cluster_buffer(), [2, 2, 2]).unwrap();
    assert_eq!(grid.count(0), 8);
    assert_eq!(grid.max_count(), 8);
    assert_eq!(grid.occupied_clusters(), 1);
    assert_eq!(grid.dropped, 92);
}

#[test]
fn test_gpu_brute_force_mode() {
    let Some(ctx) = gpu() else { return };
    let config = ClusteringConfig {
        mode: ClusteringMode::BruteForce,
        ..small_grid_config()
    };
    let mut clustering =
        LightClustering::new(&ctx.device, config, &ClusteringShaders::embedded()).unwrap();
    clustering.light_store().write_lights(&ctx.queue, &three_lights()).unwrap();
    clustering.update_camera(&ctx.queue, &forward_camera());
    cluster_frame(&ctx, &mut clustering, 3);

    let grid = read_cluster_grid(&ctx.device, &ctx.queue, clustering.cluster_buffer(), [2, 2, 2]).unwrap();
    assert_eq!(grid.lights(0), &[0]);
    assert_eq!(grid.lights(7), &[1]);
    assert_eq!(grid.lights(6), &[2]);
}

// ============================================================================
// Moving Lights
// ============================================================================

#[test]
fn test_gpu_light_motion_matches_cpu_positions() {
    let Some(ctx) = gpu() else { return };
    let config = ClusteringConfig {
        max_num_lights: 300,
        num_lights: 200,
        ..Default::default()
    };
    let n = config.num_lights as usize;
    let mut clustering =
        LightClustering::new(&ctx.device, config, &ClusteringShaders::embedded()).unwrap();

    let time = 123.456;
    clustering.update_lights(&ctx.device, &ctx.queue, time);
    assert_eq!(clustering.stage(), FrameStage::LightsUpdated);

    let store = clustering.light_store();
    let records = read_light_records(&ctx.device, &ctx.queue, store.buffer(), store.capacity()).unwrap();
    assert_eq!(records.len(), 512);

    let motion = store.motion();
    let min = Vec3::from_array(motion.bounds_min);
    let max = Vec3::from_array(motion.bounds_max);
    let tolerance = 1e-3 * (max - min).max_element();
    let initial = store.initial_lights();

    for (i, light) in records[..n].iter().enumerate() {
        let moved = Vec3::from_array(light.position);
        let expected = light_position_at(light.seed, time, motion);
        assert!(
            (moved - expected).abs().max_element() <= tolerance,
            "light {i}: gpu {moved:?} cpu {expected:?}"
        );
        assert!(
            moved.cmpge(min - 1e-4).all() && moved.cmple(max + 1e-4).all(),
            "light {i} left the world bounds: {moved:?}"
        );
        assert_eq!(light.seed, initial[i].seed);
        assert_eq!(light.color, initial[i].color);
    }

    // Inactive and padding records are never written by the motion pass
    let untouched: &[u8] = bytemuck::cast_slice(&records[n..]);
    let original: &[u8] = bytemuck::cast_slice(&initial[n..]);
    assert_eq!(untouched, original);
}

#[test]
fn test_gpu_moving_lights_sorted_and_sound() {
    let Some(ctx) = gpu() else { return };
    let config = ClusteringConfig {
        max_num_lights: 256,
        num_lights: 200,
        clusters_x: 8,
        clusters_y: 6,
        clusters_z: 12,
        num_zbins: 32,
        max_lights_per_cluster: 256,
        ..Default::default()
    };
    let n = config.num_lights;
    let camera = scene_camera();
    let mut clustering =
        LightClustering::new(&ctx.device, config.clone(), &ClusteringShaders::embedded()).unwrap();
    clustering.update_camera(&ctx.queue, &camera);

    for frame in 0..3 {
        clustering.update_lights(&ctx.device, &ctx.queue, frame as f32 * 0.75);
        cluster_frame(&ctx, &mut clustering, n);
        clustering.mark_consumed();
    }
    assert_eq!(clustering.frame(), 3);

    let keys: Vec<f32> = read_pod_vec(&ctx.device, &ctx.queue, clustering.keys_buffer()).unwrap();
    assert!(keys[..n as usize].windows(2).all(|w| w[0] <= w[1]));
    assert!(keys[n as usize..].iter().all(|&k| k == PADDING_SORT_KEY));

    let lights = read_light_records(&ctx.device, &ctx.queue, clustering.light_buffer(), n).unwrap();
    let mut seeds: Vec<u32> = lights.iter().map(|l| l.seed.to_bits()).collect();
    let mut initial: Vec<u32> = clustering.light_store().initial_lights()[..n as usize]
        .iter()
        .map(|l| l.seed.to_bits())
        .collect();
    seeds.sort_unstable();
    initial.sort_unstable();
    assert_eq!(seeds, initial, "sort must permute the active records");

    let grid = read_cluster_grid(
        &ctx.device,
        &ctx.queue,
        clustering.cluster_buffer(),
        [config.clusters_x, config.clusters_y, config.clusters_z],
    )
    .unwrap();
    assert_eq!(grid.dropped, 0);

    let r = config.light_radius;
    let slack = 1e-3;
    for z in 0..config.clusters_z {
        for y in 0..config.clusters_y {
            for x in 0..config.clusters_x {
                let cluster = grid.index(x, y, z);
                let (min, max) = cluster_aabb(x, y, z, &config, &camera);
                let listed = grid.lights(cluster);
                for (i, light) in lights.iter().enumerate() {
                    let center = camera.view_position(Vec3::from_array(light.position));
                    if listed.contains(&(i as u32)) {
                        assert!(sphere_aabb_intersect(center, r + slack, min, max));
                    } else {
                        assert!(!sphere_aabb_intersect(center, r - slack, min, max));
                    }
                }
            }
        }
    }
}

#[test]
fn test_gpu_matches_cpu_grid_on_static_scene() {
    let Some(ctx) = gpu() else { return };
    let config = ClusteringConfig {
        max_num_lights: 6,
        num_lights: 6,
        clusters_x: 4,
        clusters_y: 4,
        clusters_z: 4,
        num_zbins: 8,
        light_radius: 1.0,
        ..Default::default()
    };
    let camera = forward_camera();
    let scene = vec![
        light_at(Vec3::new(0.5, 0.5, -40.0)),
        light_at(Vec3::new(-6.0, 2.0, -12.0)),
        light_at(Vec3::new(1.5, -1.5, -3.0)),
        light_at(Vec3::new(12.0, 12.0, -70.0)),
        light_at(Vec3::new(-1.0, 4.0, -25.0)),
        light_at(Vec3::new(0.0, 0.0, 10.0)),
    ];
    let mut clustering =
        LightClustering::new(&ctx.device, config.clone(), &ClusteringShaders::embedded()).unwrap();
    clustering.light_store().write_lights(&ctx.queue, &scene).unwrap();
    clustering.update_camera(&ctx.queue, &camera);
    cluster_frame(&ctx, &mut clustering, 6);

    let mut padded = scene.clone();
    padded.resize(8, light_at(Vec3::ZERO));
    let cpu = run_clustering_cpu(&padded, 6, &config, &camera);

    let gpu_lights = read_light_records(&ctx.device, &ctx.queue, clustering.light_buffer(), 6).unwrap();
    assert_eq!(gpu_lights, cpu.lights[..6].to_vec());

    let grid = read_cluster_grid(&ctx.device, &ctx.queue, clustering.cluster_buffer(), [4, 4, 4]).unwrap();
    assert_eq!(grid, cpu.grid);
}

// ============================================================================
// Shading
// ============================================================================

#[test]
fn test_gpu_clustered_shading_matches_naive() {
    let Some(ctx) = gpu() else { return };
    let config = ClusteringConfig {
        max_num_lights: 128,
        num_lights: 128,
        max_lights_per_cluster: 128,
        ..Default::default()
    };
    let shaders = ClusteringShaders::embedded();
    let mut clustering = LightClustering::new(&ctx.device, config, &shaders).unwrap();
    let camera = scene_camera();
    clustering.update_camera(&ctx.queue, &camera);

    let samples: Vec<Vec3> = (0..96)
        .map(|i| {
            let t = i as f32 / 96.0;
            camera.view_position(Vec3::new(
                -12.0 + 24.0 * t,
                1.0 + 10.0 * (t * 7.0).fract(),
                -4.0 + 8.0 * (t * 3.0).fract(),
            ))
        })
        .collect();

    let mut clustered = LightSamplePass::for_clustering(
        &ctx.device,
        ShadingStrategy::ForwardPlus,
        &clustering,
        &shaders.clustered_shading,
        samples.len() as u32,
    );
    clustered.upload_samples(&ctx.queue, &samples);
    let mut naive = LightSamplePass::for_clustering(
        &ctx.device,
        ShadingStrategy::Naive,
        &clustering,
        &shaders.clustered_shading,
        samples.len() as u32,
    );
    naive.upload_samples(&ctx.queue, &samples);

    let mut renderer = FrameRenderer::new(clustering, clustered);
    renderer.render_frame(&ctx.device, &ctx.queue, 2.5);
    assert_eq!(renderer.clustering().stage(), FrameStage::ConsumedByShading);

    // naive pass over the same light state
    let mut encoder = ctx.device.create_command_encoder(&Default::default());
    naive.render_frame(&mut encoder, &renderer.clustering().outputs());
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let grid = read_cluster_grid(
        &ctx.device,
        &ctx.queue,
        renderer.clustering().cluster_buffer(),
        renderer.clustering().outputs().dims,
    )
    .unwrap();
    assert_eq!(grid.dropped, 0);

    let a: Vec<[f32; 4]> = read_pod_vec(&ctx.device, &ctx.queue, renderer.pass().radiance_buffer()).unwrap();
    let b: Vec<[f32; 4]> = read_pod_vec(&ctx.device, &ctx.queue, naive.radiance_buffer()).unwrap();
    for (i, (c, n)) in a.iter().zip(&b).enumerate() {
        let diff = (Vec3::from_slice(&c[..3]) - Vec3::from_slice(&n[..3])).abs().max_element();
        assert!(diff < 1e-4, "sample {i}: clustered {c:?} naive {n:?}");
    }
}

#[test]
fn test_gpu_set_num_lights_bounds() {
    let Some(ctx) = gpu() else { return };
    let mut clustering =
        LightClustering::new(&ctx.device, small_grid_config(), &ClusteringShaders::embedded()).unwrap();
    assert!(clustering.set_num_lights(&ctx.queue, 0).is_err());
    assert!(clustering.set_num_lights(&ctx.queue, 4).is_err());
    assert!(clustering.set_num_lights(&ctx.queue, 2).is_ok());
    assert_eq!(clustering.num_lights(), 2);
    assert_eq!(clustering.config().num_lights, 2);
}

#[test]
fn test_gpu_switch_strategy_mid_run() {
    let Some(ctx) = gpu() else { return };
    let config = ClusteringConfig {
        max_num_lights: 64,
        num_lights: 64,
        max_lights_per_cluster: 64,
        ..Default::default()
    };
    let shaders = ClusteringShaders::embedded();
    let mut clustering = LightClustering::new(&ctx.device, config, &shaders).unwrap();
    let camera = scene_camera();
    clustering.update_camera(&ctx.queue, &camera);

    let samples: Vec<Vec3> = (0..48)
        .map(|i| {
            let t = i as f32 / 48.0;
            camera.view_position(Vec3::new(-10.0 + 20.0 * t, 2.0 + 8.0 * (t * 5.0).fract(), 0.0))
        })
        .collect();
    let mut clustered = LightSamplePass::for_clustering(
        &ctx.device,
        ShadingStrategy::ClusteredDeferred,
        &clustering,
        &shaders.clustered_shading,
        samples.len() as u32,
    );
    clustered.upload_samples(&ctx.queue, &samples);
    let mut naive = LightSamplePass::for_clustering(
        &ctx.device,
        ShadingStrategy::Naive,
        &clustering,
        &shaders.clustered_shading,
        samples.len() as u32,
    );
    naive.upload_samples(&ctx.queue, &samples);

    let mut renderer = FrameRenderer::new(clustering, clustered);
    renderer.render_frame(&ctx.device, &ctx.queue, 4.0);
    let before: Vec<[f32; 4]> =
        read_pod_vec(&ctx.device, &ctx.queue, renderer.pass().radiance_buffer()).unwrap();

    let old = renderer.replace_pass(naive);
    assert_eq!(old.strategy(), ShadingStrategy::ClusteredDeferred);
    assert_eq!(renderer.strategy(), ShadingStrategy::Naive);

    // Same time, same light positions: the naive pass must agree
    renderer.render_frame(&ctx.device, &ctx.queue, 4.0);
    let after: Vec<[f32; 4]> =
        read_pod_vec(&ctx.device, &ctx.queue, renderer.pass().radiance_buffer()).unwrap();
    for (i, (c, n)) in before.iter().zip(&after).enumerate() {
        let diff = (Vec3::from_slice(&c[..3]) - Vec3::from_slice(&n[..3])).abs().max_element();
        assert!(diff < 1e-4, "sample {i}: clustered {c:?} naive {n:?}");
    }

    renderer.clustering_mut().set_num_lights(&ctx.queue, 16).unwrap();
    renderer.pass_mut().upload_samples(&ctx.queue, &samples[..10]);
    assert_eq!(renderer.pass().num_samples(), 10);
    renderer.render_frame(&ctx.device, &ctx.queue, 5.0);
    assert_eq!(renderer.clustering().frame(), 3);
    assert_eq!(renderer.clustering().outputs().num_lights, 16);
    assert_eq!(renderer.clustering().stage(), FrameStage::ConsumedByShading);
}
