//! Shader Loading Utilities
//!
//! WGSL sources for the clustering stages. Shaders are embedded at compile
//! time by default; a directory override allows editing them without a rebuild.

use std::path::Path;

/// Shader source that can be either embedded at compile time or loaded at runtime.
#[derive(Debug, Clone)]
pub enum ShaderSource {
    /// Embedded shader source (no file I/O at runtime)
    Embedded(&'static str),
    /// Runtime-loaded shader source
    Runtime(String),
}

impl ShaderSource {
    /// Get the shader source as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            ShaderSource::Embedded(s) => s,
            ShaderSource::Runtime(s) => s.as_str(),
        }
    }
}

/// Load a shader from the filesystem at runtime.
pub fn load_shader_file(path: impl AsRef<Path>) -> Result<ShaderSource, std::io::Error> {
    let source = std::fs::read_to_string(path)?;
    Ok(ShaderSource::Runtime(source))
}

/// Create a wgpu shader module from the given source.
pub fn create_shader_module(
    device: &wgpu::Device,
    label: &str,
    source: &ShaderSource,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
    })
}

/// Shader file names, relative to the shader directory.
pub mod paths {
    /// Per-frame light motion (`cs_move_lights`)
    pub const MOVE_LIGHTS: &str = "move_lights.wgsl";
    /// Depth keys + bitonic network (`cs_compute_keys`, `cs_bitonic_step`)
    pub const LIGHT_SORT: &str = "light_sort.wgsl";
    /// Z-bin clear + build (`cs_clear_zbins`, `cs_build_zbins`)
    pub const ZBIN: &str = "zbin.wgsl";
    /// Per-cluster assignment (`cs_assign_lights`)
    pub const CLUSTER_ASSIGN: &str = "cluster_assign.wgsl";
    /// Cluster lookup + light accumulation (`cs_shade_clustered`, `cs_shade_naive`)
    pub const CLUSTERED_SHADING: &str = "clustered_shading.wgsl";

    /// Default shader directory relative to the project root.
    pub const SHADER_DIR: &str = "shaders";
}

/// Shaders compiled into the binary.
pub mod embedded {
    pub const MOVE_LIGHTS: &str = include_str!("../../../shaders/move_lights.wgsl");
    pub const LIGHT_SORT: &str = include_str!("../../../shaders/light_sort.wgsl");
    pub const ZBIN: &str = include_str!("../../../shaders/zbin.wgsl");
    pub const CLUSTER_ASSIGN: &str = include_str!("../../../shaders/cluster_assign.wgsl");
    pub const CLUSTERED_SHADING: &str = include_str!("../../../shaders/clustered_shading.wgsl");
}

/// Sources for every clustering stage.
#[derive(Debug, Clone)]
pub struct ClusteringShaders {
    pub move_lights: ShaderSource,
    pub light_sort: ShaderSource,
    pub zbin: ShaderSource,
    pub cluster_assign: ShaderSource,
    pub clustered_shading: ShaderSource,
}

impl Default for ClusteringShaders {
    fn default() -> Self {
        Self::embedded()
    }
}

impl ClusteringShaders {
    pub fn embedded() -> Self {
        Self {
            move_lights: ShaderSource::Embedded(embedded::MOVE_LIGHTS),
            light_sort: ShaderSource::Embedded(embedded::LIGHT_SORT),
            zbin: ShaderSource::Embedded(embedded::ZBIN),
            cluster_assign: ShaderSource::Embedded(embedded::CLUSTER_ASSIGN),
            clustered_shading: ShaderSource::Embedded(embedded::CLUSTERED_SHADING),
        }
    }

    /// Load every shader from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let dir = dir.as_ref();
        log::info!("loading clustering shaders from {}", dir.display());
        Ok(Self {
            move_lights: load_shader_file(dir.join(paths::MOVE_LIGHTS))?,
            light_sort: load_shader_file(dir.join(paths::LIGHT_SORT))?,
            zbin: load_shader_file(dir.join(paths::ZBIN))?,
            cluster_assign: load_shader_file(dir.join(paths::CLUSTER_ASSIGN))?,
            clustered_shading: load_shader_file(dir.join(paths::CLUSTERED_SHADING))?,
        })
    }
}
