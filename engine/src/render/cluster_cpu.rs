//! CPU-Side Light Clustering (reference and fallback)
//!
//! Runs the same stages as the compute shaders on the host: depth keys,
//! the bitonic network, Z-bin construction and per-cluster assignment. Each
//! function mirrors its WGSL counterpart step for step, so results can be
//! compared against GPU readbacks and used when compute is unavailable.

use std::ops::Range;

use glam::Vec3;

use super::camera_uniforms::CameraUniforms;
use super::cluster_buffers::ClusterGrid;
use super::cluster_config::{
    ClusteringConfig, depth_slice_bounds, next_pow2, slice_depth, slice_for_depth,
    zbin_range_for_slice,
};
use super::light_sort::{PADDING_SORT_KEY, bitonic_pair, bitonic_schedule};
use super::light_store::GpuLight;
use super::zbin::ZBin;

/// Output of one CPU clustering frame.
#[derive(Clone, Debug)]
pub struct ClusterFrame {
    /// Light records after sorting (first `next_pow2(n)` slots permuted).
    pub lights: Vec<GpuLight>,
    /// Sort keys aligned with `lights` (padding slots hold [`PADDING_SORT_KEY`]).
    pub keys: Vec<f32>,
    pub zbins: Vec<ZBin>,
    pub grid: ClusterGrid,
}

/// View-depth keys for the padded domain of `num_lights` (`cs_compute_keys`).
pub fn compute_sort_keys(lights: &[GpuLight], num_lights: u32, camera: &CameraUniforms) -> Vec<f32> {
    let padded = next_pow2(num_lights) as usize;
    (0..padded)
        .map(|i| {
            if i < num_lights as usize {
                camera.view_depth(Vec3::from_array(lights[i].position))
            } else {
                PADDING_SORT_KEY
            }
        })
        .collect()
}

/// Run the bitonic network over `keys.len()` (a power of two) slots, moving
/// `lights[i]` together with `keys[i]` (`cs_bitonic_step`, every pass).
pub fn bitonic_sort_lights(lights: &mut [GpuLight], keys: &mut [f32]) {
    let padded = keys.len() as u32;
    debug_assert!(padded.is_power_of_two());
    debug_assert!(lights.len() >= keys.len());

    for pass in bitonic_schedule(padded) {
        for pair in 0..padded / 2 {
            let (i, l, ascending) = bitonic_pair(pair, pass);
            let (i, l) = (i as usize, l as usize);
            let out_of_order = if ascending { keys[i] > keys[l] } else { keys[i] < keys[l] };
            if out_of_order {
                keys.swap(i, l);
                lights.swap(i, l);
            }
        }
    }
}

/// Build the Z-bin table from sorted keys (`cs_clear_zbins` + `cs_build_zbins`).
///
/// Bin `b` holds the sorted-index range of lights with key in
/// `[slice_depth(b) - r, slice_depth(b + 1) + r]`.
pub fn build_zbins(
    sorted_keys: &[f32],
    num_lights: u32,
    config: &ClusteringConfig,
    camera: &CameraUniforms,
) -> Vec<ZBin> {
    let keys = &sorted_keys[..num_lights as usize];
    let r = config.light_radius;
    (0..config.num_zbins)
        .map(|bin| {
            let z0 = slice_depth(bin, config.num_zbins, camera.near, camera.far, config.depth_warp) - r;
            let z1 = slice_depth(bin + 1, config.num_zbins, camera.near, camera.far, config.depth_warp) + r;
            let first = keys.partition_point(|&k| k < z0) as u32;
            let end = keys.partition_point(|&k| k <= z1) as u32;
            if first < end {
                ZBin::new(first, end - 1)
            } else {
                ZBin::EMPTY
            }
        })
        .collect()
}

/// Sorted-index candidate range for depth slice `slice`.
///
/// With Z-bins: union of the bins overlapping the slice. Without: `0..num_lights`.
pub fn candidate_range(
    slice: u32,
    zbins: Option<&[ZBin]>,
    config: &ClusteringConfig,
    num_lights: u32,
) -> Range<u32> {
    let Some(zbins) = zbins else {
        return 0..num_lights;
    };
    let (b0, b1) = zbin_range_for_slice(slice, config.clusters_z, config.num_zbins);
    let merged = zbins[b0 as usize..=b1 as usize]
        .iter()
        .fold(ZBin::EMPTY, |acc, bin| acc.union(*bin));
    if merged.is_empty() {
        0..0
    } else {
        merged.min_light..(merged.max_light + 1).min(num_lights)
    }
}

/// View-space AABB of cluster `(x, y, z)` from its eight sub-frustum corners.
pub fn cluster_aabb(
    x: u32,
    y: u32,
    z: u32,
    config: &ClusteringConfig,
    camera: &CameraUniforms,
) -> (Vec3, Vec3) {
    let tiles_x = config.clusters_x as f32;
    let tiles_y = config.clusters_y as f32;
    let ndc_min = [x as f32 / tiles_x * 2.0 - 1.0, y as f32 / tiles_y * 2.0 - 1.0];
    let ndc_max = [(x + 1) as f32 / tiles_x * 2.0 - 1.0, (y + 1) as f32 / tiles_y * 2.0 - 1.0];
    let (depth_near, depth_far) =
        depth_slice_bounds(z, config.clusters_z, camera.near, camera.far, config.depth_warp);

    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for corner in 0..8u32 {
        let nx = if corner & 1 != 0 { ndc_max[0] } else { ndc_min[0] };
        let ny = if corner & 2 != 0 { ndc_max[1] } else { ndc_min[1] };
        let depth = if corner & 4 != 0 { depth_far } else { depth_near };
        let p = camera.view_point_at_depth(nx, ny, depth);
        min = min.min(p);
        max = max.max(p);
    }
    (min, max)
}

/// Sphere-AABB intersection, inclusive at the boundary.
#[inline]
pub fn sphere_aabb_intersect(center: Vec3, radius: f32, min: Vec3, max: Vec3) -> bool {
    let closest = center.clamp(min, max);
    center.distance_squared(closest) <= radius * radius
}

/// Assign sorted lights to clusters (`cs_assign_lights`).
///
/// `zbins` is `None` in brute-force mode.
pub fn assign_lights(
    lights: &[GpuLight],
    num_lights: u32,
    zbins: Option<&[ZBin]>,
    config: &ClusteringConfig,
    camera: &CameraUniforms,
) -> ClusterGrid {
    let mut grid = ClusterGrid::new(
        [config.clusters_x, config.clusters_y, config.clusters_z],
        config.max_lights_per_cluster,
    );
    let radius = config.light_radius;
    if radius <= 0.0 {
        return grid;
    }

    let view_positions: Vec<Vec3> = lights[..num_lights as usize]
        .iter()
        .map(|l| camera.view_position(Vec3::from_array(l.position)))
        .collect();

    for z in 0..config.clusters_z {
        let candidates = candidate_range(z, zbins, config, num_lights);
        for y in 0..config.clusters_y {
            for x in 0..config.clusters_x {
                let cluster = grid.index(x, y, z);
                let (min, max) = cluster_aabb(x, y, z, config, camera);
                for i in candidates.clone() {
                    if sphere_aabb_intersect(view_positions[i as usize], radius, min, max) {
                        grid.push(cluster, i);
                    }
                }
            }
        }
    }
    grid
}

/// Run every stage for `num_lights` active lights on the host.
///
/// `lights` must hold at least `next_pow2(num_lights)` records.
pub fn run_clustering_cpu(
    lights: &[GpuLight],
    num_lights: u32,
    config: &ClusteringConfig,
    camera: &CameraUniforms,
) -> ClusterFrame {
    let mut lights = lights.to_vec();
    if !config.mode.uses_zbins() {
        let keys = compute_sort_keys(&lights, num_lights, camera);
        let grid = assign_lights(&lights, num_lights, None, config, camera);
        return ClusterFrame {
            lights,
            keys,
            zbins: vec![ZBin::EMPTY; config.num_zbins as usize],
            grid,
        };
    }

    let mut keys = compute_sort_keys(&lights, num_lights, camera);
    bitonic_sort_lights(&mut lights[..keys.len()], &mut keys);
    let zbins = build_zbins(&keys, num_lights, config, camera);
    let grid = assign_lights(&lights, num_lights, Some(&zbins), config, camera);
    ClusterFrame {
        lights,
        keys,
        zbins,
        grid,
    }
}

/// Cluster containing view-space point `view_pos`, or `None` outside the frustum.
///
/// Mirrors `cluster_index_for_view_position` in `clustered_shading.wgsl`.
pub fn cluster_for_view_position(
    view_pos: Vec3,
    config: &ClusteringConfig,
    camera: &CameraUniforms,
) -> Option<u32> {
    let depth = -view_pos.z;
    let z = slice_for_depth(depth, config.clusters_z, camera.near, camera.far, config.depth_warp)?;
    let proj = glam::Mat4::from_cols_array_2d(&camera.proj);
    let clip = proj * view_pos.extend(1.0);
    let ndc = clip.truncate().truncate() / clip.w;
    if ndc.x < -1.0 || ndc.x > 1.0 || ndc.y < -1.0 || ndc.y > 1.0 {
        return None;
    }
    let x = (((ndc.x * 0.5 + 0.5) * config.clusters_x as f32).floor() as u32).min(config.clusters_x - 1);
    let y = (((ndc.y * 0.5 + 0.5) * config.clusters_y as f32).floor() as u32).min(config.clusters_y - 1);
    Some(x + y * config.clusters_x + z * config.clusters_x * config.clusters_y)
}

/// Radiance from one light at view-space point `view_pos` (zero beyond `radius`).
pub fn light_contribution(light: &GpuLight, view_pos: Vec3, radius: f32, camera: &CameraUniforms) -> Vec3 {
    let light_view = camera.view_position(Vec3::from_array(light.position));
    let dist = light_view.distance(view_pos);
    let ratio = dist / radius;
    let falloff = (1.0 - ratio.powi(4)).clamp(0.0, 1.0);
    Vec3::from_array(light.color) * falloff * falloff / (dist * dist + 1.0)
}

/// Total radiance at `view_pos` from the lights listed in its cluster.
pub fn shade_clustered(
    frame: &ClusterFrame,
    view_pos: Vec3,
    config: &ClusteringConfig,
    camera: &CameraUniforms,
) -> Vec3 {
    if config.light_radius <= 0.0 {
        return Vec3::ZERO;
    }
    let Some(cluster) = cluster_for_view_position(view_pos, config, camera) else {
        return Vec3::ZERO;
    };
    frame
        .grid
        .lights(cluster)
        .iter()
        .map(|&i| light_contribution(&frame.lights[i as usize], view_pos, config.light_radius, camera))
        .sum()
}

/// Total radiance at `view_pos` from every active light.
pub fn shade_naive(
    lights: &[GpuLight],
    num_lights: u32,
    view_pos: Vec3,
    radius: f32,
    camera: &CameraUniforms,
) -> Vec3 {
    if radius <= 0.0 {
        return Vec3::ZERO;
    }
    lights[..num_lights as usize]
        .iter()
        .map(|l| light_contribution(l, view_pos, radius, camera))
        .sum()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn light_at(p: [f32; 3]) -> GpuLight {
        GpuLight {
            position: p,
            color: [1.0, 1.0, 1.0],
            ..Default::default()
        }
    }

    fn forward_camera() -> CameraUniforms {
        CameraUniforms::look_at(
            Vec3::ZERO,
            Vec3::NEG_Z,
            std::f32::consts::FRAC_PI_2,
            [512.0, 512.0],
            1.0,
            100.0,
        )
    }

    #[test]
    fn test_sphere_aabb_intersect_inside() {
        assert!(sphere_aabb_intersect(Vec3::splat(5.0), 1.0, Vec3::ZERO, Vec3::splat(10.0)));
    }

    #[test]
    fn test_sphere_aabb_intersect_touching() {
        assert!(sphere_aabb_intersect(Vec3::new(11.0, 5.0, 5.0), 1.0, Vec3::ZERO, Vec3::splat(10.0)));
    }

    #[test]
    fn test_sphere_aabb_intersect_miss() {
        assert!(!sphere_aabb_intersect(Vec3::new(15.0, 5.0, 5.0), 1.0, Vec3::ZERO, Vec3::splat(10.0)));
    }

    #[test]
    fn test_sphere_aabb_intersect_corner() {
        let d = 3.0_f32.sqrt();
        let c = Vec3::splat(11.0);
        assert!(!sphere_aabb_intersect(c, d - 0.01, Vec3::ZERO, Vec3::splat(10.0)));
        assert!(sphere_aabb_intersect(c, d + 0.01, Vec3::ZERO, Vec3::splat(10.0)));
    }

    #[test]
    fn test_sort_keys_padding() {
        let camera = forward_camera();
        let lights = vec![light_at([0.0, 0.0, -3.0]); 8];
        let keys = compute_sort_keys(&lights, 5, &camera);
        assert_eq!(keys.len(), 8);
        assert!((keys[0] - 3.0).abs() < 1e-5);
        assert!(keys[5..].iter().all(|&k| k == PADDING_SORT_KEY));
    }

    #[test]
    fn test_bitonic_sorts_ascending() {
        let mut keys = vec![5.0, 1.0, 4.0, 1.5, 9.0, 2.0, 6.0, 0.5];
        let mut lights: Vec<GpuLight> = keys.iter().map(|&k| GpuLight { seed: k, ..Default::default() }).collect();
        bitonic_sort_lights(&mut lights, &mut keys);
        assert_eq!(keys, vec![0.5, 1.0, 1.5, 2.0, 4.0, 5.0, 6.0, 9.0]);
        // records travel with their keys
        for (light, key) in lights.iter().zip(&keys) {
            assert_eq!(light.seed, *key);
        }
    }

    #[test]
    fn test_cluster_aabb_first_cell() {
        let mut config = ClusteringConfig::default();
        config.clusters_x = 2;
        config.clusters_y = 2;
        config.clusters_z = 2;
        let camera = forward_camera();
        let (min, max) = cluster_aabb(0, 0, 0, &config, &camera);
        assert!((min - Vec3::new(-10.0, -10.0, -10.0)).abs().max_element() < 1e-3);
        assert!((max - Vec3::new(0.0, 0.0, -1.0)).abs().max_element() < 1e-3);
    }

    #[test]
    fn test_candidate_range_brute_force() {
        let config = ClusteringConfig::default();
        assert_eq!(candidate_range(3, None, &config, 17), 0..17);
    }

    #[test]
    fn test_candidate_range_from_bins() {
        let mut config = ClusteringConfig::default();
        config.clusters_z = 2;
        config.num_zbins = 4;
        let zbins = [ZBin::EMPTY, ZBin::new(0, 0), ZBin::new(1, 1), ZBin::new(2, 2)];
        assert_eq!(candidate_range(0, Some(&zbins), &config, 3), 0..1);
        assert_eq!(candidate_range(1, Some(&zbins), &config, 3), 1..3);
        let empty = [ZBin::EMPTY; 4];
        assert!(candidate_range(0, Some(&empty), &config, 3).is_empty());
    }

    #[test]
    fn test_zero_radius_never_matches() {
        let mut config = ClusteringConfig::default();
        config.light_radius = 0.0;
        let camera = forward_camera();
        let lights = vec![light_at([0.0, 0.0, -5.0]); 4];
        let grid = assign_lights(&lights, 4, None, &config, &camera);
        assert_eq!(grid.total_assignments(), 0);
    }

    #[test]
    fn test_cluster_for_view_position() {
        let mut config = ClusteringConfig::default();
        config.clusters_x = 2;
        config.clusters_y = 2;
        config.clusters_z = 2;
        let camera = forward_camera();
        assert_eq!(cluster_for_view_position(Vec3::new(-2.0, -2.0, -5.0), &config, &camera), Some(0));
        assert_eq!(cluster_for_view_position(Vec3::new(3.0, 3.0, -20.0), &config, &camera), Some(7));
        assert_eq!(cluster_for_view_position(Vec3::new(0.0, 0.0, 5.0), &config, &camera), None);
        assert_eq!(cluster_for_view_position(Vec3::new(50.0, 0.0, -5.0), &config, &camera), None);
    }

    #[test]
    fn test_light_contribution_falls_to_zero_at_radius() {
        let camera = forward_camera();
        let light = light_at([0.0, 0.0, -10.0]);
        let near = light_contribution(&light, Vec3::new(0.0, 0.0, -10.5), 2.0, &camera);
        let edge = light_contribution(&light, Vec3::new(0.0, 0.0, -12.0), 2.0, &camera);
        let far = light_contribution(&light, Vec3::new(0.0, 0.0, -15.0), 2.0, &camera);
        assert!(near.x > 0.0);
        assert!(edge.x.abs() < 1e-6);
        assert_eq!(far, Vec3::ZERO);
    }
}
