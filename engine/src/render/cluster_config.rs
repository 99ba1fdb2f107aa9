//! Clustering Configuration Module
//!
//! Session constants for the light clustering core: light budget, cluster grid
//! dimensions, per-cluster capacity, Z-bin count, influence radius and the
//! workgroup sizes handed to each compute stage as pipeline overrides.
//!
//! The grid divides the view frustum into cells:
//! - X/Y: NDC tiles (`clusters_x × clusters_y`), cell (0, 0) at NDC (-1, -1)
//! - Z: depth slices between `near` and `far`, distributed by [`DepthWarp`]
//!
//! Z-bins use the same warp with `num_zbins` subdivisions, so the bins that
//! overlap a cluster slice can be found with integer arithmetic alone
//! (see [`zbin_range_for_slice`]).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default maximum number of lights the light store allocates.
pub const DEFAULT_MAX_NUM_LIGHTS: u32 = 5000;

/// Default number of active lights at startup.
pub const DEFAULT_NUM_LIGHTS: u32 = 500;

/// Default cluster grid dimensions.
pub const DEFAULT_CLUSTERS_X: u32 = 16;
pub const DEFAULT_CLUSTERS_Y: u32 = 9;
pub const DEFAULT_CLUSTERS_Z: u32 = 24;

/// Default per-cluster light capacity `N`.
pub const DEFAULT_MAX_LIGHTS_PER_CLUSTER: u32 = 64;

/// Default Z-bin count (four bins per default depth slice).
pub const DEFAULT_NUM_ZBINS: u32 = 96;

/// Default light influence radius in world units.
pub const DEFAULT_LIGHT_RADIUS: f32 = 2.0;

/// Brightness scale folded into every light color.
pub const DEFAULT_LIGHT_INTENSITY: f32 = 0.1;

/// Depth distribution of cluster slices and Z-bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DepthWarp {
    /// `depth = near + (far - near) * t`
    Linear,
    /// `depth = near * (far / near)^t`
    #[default]
    Logarithmic,
}

impl DepthWarp {
    /// Value written to the `depth_warp` field of the GPU parameter block.
    pub fn as_gpu(self) -> u32 {
        match self {
            DepthWarp::Linear => 0,
            DepthWarp::Logarithmic => 1,
        }
    }
}

/// How candidate lights are gathered for each cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMode {
    /// Depth sort, Z-bin, then test only the binned range per cluster.
    #[default]
    SortBinCluster,
    /// Skip sort and Z-binning; every cluster scans all active lights.
    BruteForce,
}

impl ClusteringMode {
    pub fn uses_zbins(self) -> bool {
        matches!(self, ClusteringMode::SortBinCluster)
    }
}

/// Per-stage workgroup sizes, applied as WGSL pipeline-overridable constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkgroupSizes {
    pub move_lights: u32,
    pub sort: u32,
    pub zbin: u32,
    pub cluster: [u32; 3],
}

impl Default for WorkgroupSizes {
    fn default() -> Self {
        Self {
            move_lights: 128,
            sort: 256,
            zbin: 64,
            cluster: [4, 4, 4],
        }
    }
}

/// Light motion parameters. Lights oscillate inside an axis-aligned world box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightMotionConfig {
    /// Time scale applied to every light's oscillation.
    pub speed: f32,
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
}

impl Default for LightMotionConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            bounds_min: [-14.0, 0.0, -6.0],
            bounds_max: [14.0, 12.0, 6.0],
        }
    }
}

/// Session configuration for the clustering core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub max_num_lights: u32,
    pub num_lights: u32,
    pub clusters_x: u32,
    pub clusters_y: u32,
    pub clusters_z: u32,
    pub max_lights_per_cluster: u32,
    pub num_zbins: u32,
    pub light_radius: f32,
    pub light_intensity: f32,
    pub depth_warp: DepthWarp,
    pub mode: ClusteringMode,
    pub workgroups: WorkgroupSizes,
    pub motion: LightMotionConfig,
    /// Seed for light colors and motion phases.
    pub seed: u32,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_num_lights: DEFAULT_MAX_NUM_LIGHTS,
            num_lights: DEFAULT_NUM_LIGHTS,
            clusters_x: DEFAULT_CLUSTERS_X,
            clusters_y: DEFAULT_CLUSTERS_Y,
            clusters_z: DEFAULT_CLUSTERS_Z,
            max_lights_per_cluster: DEFAULT_MAX_LIGHTS_PER_CLUSTER,
            num_zbins: DEFAULT_NUM_ZBINS,
            light_radius: DEFAULT_LIGHT_RADIUS,
            light_intensity: DEFAULT_LIGHT_INTENSITY,
            depth_warp: DepthWarp::default(),
            mode: ClusteringMode::default(),
            workgroups: WorkgroupSizes::default(),
            motion: LightMotionConfig::default(),
            seed: 0x2545_f491,
        }
    }
}

impl ClusteringConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total number of clusters in the grid.
    pub fn num_clusters(&self) -> u32 {
        self.clusters_x * self.clusters_y * self.clusters_z
    }

    /// Power-of-two light capacity backing the sort network.
    pub fn light_capacity(&self) -> u32 {
        next_pow2(self.max_num_lights.max(1))
    }

    /// Check every session constant. Fails fast, never clamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            (self.max_num_lights, "max_num_lights"),
            (self.clusters_x, "clusters_x"),
            (self.clusters_y, "clusters_y"),
            (self.clusters_z, "clusters_z"),
            (self.max_lights_per_cluster, "max_lights_per_cluster"),
            (self.num_zbins, "num_zbins"),
            (self.workgroups.move_lights, "workgroups.move_lights"),
            (self.workgroups.sort, "workgroups.sort"),
            (self.workgroups.zbin, "workgroups.zbin"),
            (self.workgroups.cluster[0], "workgroups.cluster[0]"),
            (self.workgroups.cluster[1], "workgroups.cluster[1]"),
            (self.workgroups.cluster[2], "workgroups.cluster[2]"),
        ];
        for (value, what) in nonzero {
            if value == 0 {
                return Err(ConfigError::Zero { what });
            }
        }

        validate_active_count(self.num_lights, self.max_num_lights)?;

        if !(self.light_radius.is_finite() && self.light_radius >= 0.0) {
            return Err(ConfigError::LightRadius(self.light_radius));
        }

        let m = &self.motion;
        if (0..3).any(|i| !(m.bounds_min[i] < m.bounds_max[i])) {
            return Err(ConfigError::WorldBounds {
                min: m.bounds_min,
                max: m.bounds_max,
            });
        }

        // next_pow2 of the light budget must stay representable
        if self.max_num_lights > (1 << 31) {
            return Err(ConfigError::SizeOverflow { what: "light capacity" });
        }

        self.buffer_sizes()?;
        Ok(())
    }

    /// Byte sizes of every buffer the core allocates, with overflow checks.
    pub fn buffer_sizes(&self) -> Result<BufferSizes, ConfigError> {
        let capacity = u64::from(self.light_capacity());

        let lights = capacity
            .checked_mul(32)
            .and_then(|b| b.checked_add(16))
            .ok_or(ConfigError::SizeOverflow { what: "light buffer" })?;

        let sort_keys = capacity
            .checked_mul(4)
            .ok_or(ConfigError::SizeOverflow { what: "sort key buffer" })?;

        let zbins = u64::from(self.num_zbins)
            .checked_mul(8)
            .ok_or(ConfigError::SizeOverflow { what: "z-bin buffer" })?;

        let clusters = u64::from(self.clusters_x)
            .checked_mul(u64::from(self.clusters_y))
            .and_then(|c| c.checked_mul(u64::from(self.clusters_z)))
            .filter(|&c| c <= u64::from(u32::MAX))
            .ok_or(ConfigError::SizeOverflow { what: "cluster count" })?;

        let stride = u64::from(self.max_lights_per_cluster) + 1;
        let cluster_set = clusters
            .checked_mul(stride)
            .and_then(|w| w.checked_mul(4))
            .and_then(|b| b.checked_add(16))
            .ok_or(ConfigError::SizeOverflow { what: "cluster buffer" })?;

        Ok(BufferSizes {
            lights,
            sort_keys,
            zbins,
            cluster_set,
        })
    }

    /// Check buffer sizes and workgroup shapes against device limits.
    pub fn validate_for_limits(&self, limits: &wgpu::Limits) -> Result<(), ConfigError> {
        self.validate()?;
        let sizes = self.buffer_sizes()?;

        let storage_limit = u64::from(limits.max_storage_buffer_binding_size);
        for (what, size) in [
            ("light buffer", sizes.lights),
            ("sort key buffer", sizes.sort_keys),
            ("z-bin buffer", sizes.zbins),
            ("cluster buffer", sizes.cluster_set),
        ] {
            if size > storage_limit || size > limits.max_buffer_size {
                return Err(ConfigError::ExceedsDeviceLimit {
                    what,
                    size,
                    limit: storage_limit.min(limits.max_buffer_size),
                });
            }
        }

        let wg = &self.workgroups;
        let invocations = limits.max_compute_invocations_per_workgroup;
        for (what, size) in [
            ("move_lights", wg.move_lights),
            ("sort", wg.sort),
            ("zbin", wg.zbin),
        ] {
            if size > limits.max_compute_workgroup_size_x || size > invocations {
                return Err(ConfigError::WorkgroupTooLarge {
                    what,
                    size,
                    limit: limits.max_compute_workgroup_size_x.min(invocations),
                });
            }
        }

        let [cx, cy, cz] = wg.cluster;
        let per_axis = [
            ("cluster x", cx, limits.max_compute_workgroup_size_x),
            ("cluster y", cy, limits.max_compute_workgroup_size_y),
            ("cluster z", cz, limits.max_compute_workgroup_size_z),
        ];
        for (what, size, limit) in per_axis {
            if size > limit {
                return Err(ConfigError::WorkgroupTooLarge { what, size, limit });
            }
        }
        let total = cx.saturating_mul(cy).saturating_mul(cz);
        if total > invocations {
            return Err(ConfigError::WorkgroupTooLarge {
                what: "cluster (total)",
                size: total,
                limit: invocations,
            });
        }

        let per_dim = limits.max_compute_workgroups_per_dimension;
        let capacity = self.light_capacity();
        for (what, groups) in [
            ("move_lights", capacity.div_ceil(wg.move_lights)),
            ("sort", capacity.div_ceil(wg.sort)),
            ("zbin", self.num_zbins.div_ceil(wg.zbin)),
            ("cluster x", self.clusters_x.div_ceil(cx)),
            ("cluster y", self.clusters_y.div_ceil(cy)),
            ("cluster z", self.clusters_z.div_ceil(cz)),
        ] {
            if groups > per_dim {
                return Err(ConfigError::TooManyWorkgroups {
                    what,
                    groups,
                    limit: per_dim,
                });
            }
        }

        Ok(())
    }
}

/// Byte sizes of the core's GPU buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizes {
    pub lights: u64,
    pub sort_keys: u64,
    pub zbins: u64,
    pub cluster_set: u64,
}

/// Enforce `1 <= requested <= max`.
pub fn validate_active_count(requested: u32, max: u32) -> Result<(), ConfigError> {
    if requested == 0 || requested > max {
        return Err(ConfigError::LightCountOutOfRange { requested, max });
    }
    Ok(())
}

/// Camera depth range usable for slicing: finite and `0 < near < far`.
pub fn validate_depth_range(near: f32, far: f32) -> Result<(), ConfigError> {
    if !(near.is_finite() && far.is_finite() && near > 0.0 && near < far) {
        return Err(ConfigError::DepthRange { near, far });
    }
    Ok(())
}

/// Smallest power of two `>= n` (`next_pow2(0) == 1`).
pub fn next_pow2(n: u32) -> u32 {
    n.max(1).next_power_of_two()
}

/// View depth of slice boundary `index` out of `count` subdivisions of `[near, far]`.
///
/// `index == 0` is `near`, `index == count` is `far`. Mirrors `slice_depth` in the
/// WGSL shaders; `t` is formed by a single division so equal ratios (e.g. 3/24 and
/// 12/96) produce identical boundaries.
pub fn slice_depth(index: u32, count: u32, near: f32, far: f32, warp: DepthWarp) -> f32 {
    let t = index as f32 / count as f32;
    match warp {
        DepthWarp::Linear => near + (far - near) * t,
        DepthWarp::Logarithmic => near * (far / near).powf(t),
    }
}

/// Calculate the near and far depth bounds for a given depth slice.
///
/// # Example
///
/// ```
/// use cluster_lights_engine::render::cluster_config::{depth_slice_bounds, DepthWarp};
///
/// let (near, far) = depth_slice_bounds(0, 24, 0.1, 1000.0, DepthWarp::Logarithmic);
/// assert!((near - 0.1).abs() < 1e-6);
/// assert!(far > near);
/// ```
pub fn depth_slice_bounds(slice: u32, count: u32, near: f32, far: f32, warp: DepthWarp) -> (f32, f32) {
    (
        slice_depth(slice, count, near, far, warp),
        slice_depth(slice + 1, count, near, far, warp),
    )
}

/// Slice containing view depth `depth`, or `None` outside `[near, far]`.
pub fn slice_for_depth(depth: f32, count: u32, near: f32, far: f32, warp: DepthWarp) -> Option<u32> {
    if !(depth >= near && depth <= far) {
        return None;
    }
    let t = match warp {
        DepthWarp::Linear => (depth - near) / (far - near),
        DepthWarp::Logarithmic => (depth / near).ln() / (far / near).ln(),
    };
    let slice = (t * count as f32).floor() as u32;
    Some(slice.min(count - 1))
}

/// Inclusive Z-bin range `[b0, b1]` whose union covers cluster slice `slice`.
///
/// `b0 = floor(slice * B / Z)`, `b1 = ceil((slice + 1) * B / Z) - 1`.
pub fn zbin_range_for_slice(slice: u32, clusters_z: u32, num_zbins: u32) -> (u32, u32) {
    let z = u64::from(clusters_z);
    let b = u64::from(num_zbins);
    let s = u64::from(slice);
    let b0 = s * b / z;
    let b1 = ((s + 1) * b).div_ceil(z) - 1;
    (b0 as u32, b1.min(b - 1) as u32)
}
