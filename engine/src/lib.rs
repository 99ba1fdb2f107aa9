//! Cluster Lights Engine Library
//!
//! GPU clustered light assignment on wgpu. Each frame the active lights are
//! moved, depth-sorted, indexed into Z-bins and assigned to the cells of a
//! frustum-aligned cluster grid; shading passes then read the per-cluster
//! light lists.
//!
//! # Modules
//!
//! - [`render`] - Clustering stages, GPU context, shaders and shading passes
//! - [`error`] - Configuration, context and readback errors
//! - [`logging`] - `env_logger` setup for binaries and tests
//!
//! # Example
//!
//! ```ignore
//! use cluster_lights_engine::render::{
//!     CameraUniforms, ClusteringConfig, ClusteringShaders, GpuContext, GpuContextConfig,
//!     LightClustering,
//! };
//!
//! let ctx = GpuContext::new(GpuContextConfig::default())?;
//! let shaders = ClusteringShaders::embedded();
//! let mut clustering = LightClustering::new(&ctx.device, ClusteringConfig::default(), &shaders)?;
//!
//! clustering.update_camera(&ctx.queue, &camera);
//! clustering.update_lights(&ctx.device, &ctx.queue, time);
//! let mut encoder = ctx.device.create_command_encoder(&Default::default());
//! clustering.run_clustering(&ctx.queue, &mut encoder);
//! // ... shading passes bind clustering.bindings() ...
//! ctx.queue.submit(std::iter::once(encoder.finish()));
//! ```

pub mod error;
pub mod logging;
pub mod render;

// Re-export the render module contents at crate level for convenience
pub use render::*;
pub use error::{ConfigError, ContextError, ReadbackError};
pub use logging::{LoggingConfig, init_logging};
