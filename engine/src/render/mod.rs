//! Render Module
//!
//! GPU light clustering: a light store with per-frame motion, a bitonic depth
//! sort, a Z-bin depth index and per-cluster light lists, plus the shading
//! passes that consume them.

pub mod binding_validator;
pub mod camera_uniforms;
pub mod cluster_buffers;
pub mod cluster_config;
pub mod cluster_cpu;
pub mod cluster_dispatch;
pub mod compute_pipelines;
pub mod gpu_context;
pub mod light_sort;
pub mod light_store;
pub mod readback;
pub mod shader_loader;
pub mod shading;
pub mod zbin;

// Re-export commonly used types for convenience
pub use camera_uniforms::CameraUniforms;
pub use gpu_context::{GpuContext, GpuContextConfig};
pub use shader_loader::{ClusteringShaders, ShaderSource, create_shader_module, load_shader_file};

// Configuration and depth slicing
pub use cluster_config::{
    BufferSizes, ClusteringConfig, ClusteringMode, DepthWarp, LightMotionConfig, WorkgroupSizes,
    depth_slice_bounds, next_pow2, slice_for_depth, validate_depth_range, zbin_range_for_slice,
};

// Clustering stages
pub use compute_pipelines::ClusteringPipelines;
pub use light_store::{GpuLight, LightSetHeader, LightStore, MotionParams, hue_to_rgb, light_position_at};
pub use light_sort::{BitonicPass, LightSorter, PADDING_SORT_KEY, SortParams, bitonic_schedule};
pub use zbin::{DepthBinner, ZBIN_EMPTY_MIN, ZBin};
pub use cluster_buffers::{
    ClusterBindings, ClusterBuffers, ClusterGrid, ClusterParams, ClusterSetHeader,
    cluster_binding_layout_entries,
};
pub use cluster_dispatch::{ClusterOutputs, FrameStage, LightClustering};

// CPU reference
pub use cluster_cpu::{ClusterFrame, run_clustering_cpu, shade_clustered, shade_naive};

// Shading consumers
pub use shading::{FrameRenderer, LightSamplePass, ShadingPass, ShadingStrategy};

pub use readback::{read_buffer, read_cluster_grid, read_light_records, read_pod_vec};
