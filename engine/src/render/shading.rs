//! Shading consumers of the clustering core.
//!
//! Every shading strategy sits behind [`ShadingPass`]. The core records its
//! passes first, then the selected pass reads the cluster and light buffers
//! through the shared cluster bind group.

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::binding_validator;
use super::cluster_buffers::cluster_binding_layout_entries;
use super::cluster_dispatch::{ClusterOutputs, LightClustering};
use super::compute_pipelines::create_compute_pipeline;
use super::shader_loader::{ShaderSource, create_shader_module};

/// Workgroup size of `cs_shade_clustered` / `cs_shade_naive`.
pub const SAMPLE_WORKGROUP_SIZE: u32 = 64;

/// Which shading architecture consumes the clustering results.
///
/// Headless sample-point passes have no G-buffer, so `ForwardPlus`,
/// `ClusteredDeferred` and `ClusteredDeferredPacked` all run
/// `cs_shade_clustered` and differ only in their label. `Naive` runs
/// `cs_shade_naive`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadingStrategy {
    /// Every light evaluated at every shaded point.
    Naive,
    /// Per-cluster lists consumed in the main shading pass.
    #[default]
    ForwardPlus,
    /// Per-cluster lists consumed by a fullscreen pass over a G-buffer.
    ClusteredDeferred,
    /// Clustered deferred with a packed G-buffer.
    ClusteredDeferredPacked,
}

impl ShadingStrategy {
    pub const ALL: [ShadingStrategy; 4] = [
        ShadingStrategy::Naive,
        ShadingStrategy::ForwardPlus,
        ShadingStrategy::ClusteredDeferred,
        ShadingStrategy::ClusteredDeferredPacked,
    ];

    pub fn uses_clusters(self) -> bool {
        !matches!(self, ShadingStrategy::Naive)
    }

    pub fn label(self) -> &'static str {
        match self {
            ShadingStrategy::Naive => "naive",
            ShadingStrategy::ForwardPlus => "forward-plus",
            ShadingStrategy::ClusteredDeferred => "clustered-deferred",
            ShadingStrategy::ClusteredDeferredPacked => "clustered-deferred-packed",
        }
    }
}

impl fmt::Display for ShadingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown shading strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for ShadingStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        ShadingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.label() == normalized)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// A shading pass that consumes the clustering outputs of one frame.
pub trait ShadingPass {
    fn strategy(&self) -> ShadingStrategy;

    /// Record this pass after the clustering passes of the same frame.
    fn render_frame(&mut self, encoder: &mut wgpu::CommandEncoder, outputs: &ClusterOutputs<'_>);
}

impl ShadingPass for Box<dyn ShadingPass> {
    fn strategy(&self) -> ShadingStrategy {
        (**self).strategy()
    }

    fn render_frame(&mut self, encoder: &mut wgpu::CommandEncoder, outputs: &ClusterOutputs<'_>) {
        (**self).render_frame(encoder, outputs)
    }
}

// ============================================================================
// LightSamplePass - headless radiance at view-space sample points
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SampleParams {
    pub num_samples: u32,
    pub _pad: [u32; 3],
}

const _: () = assert!(std::mem::size_of::<SampleParams>() == 16);

/// Group 1 of the shading shader.
///
/// binding 0: sample positions (storage, read), 1: radiance (storage, read_write),
/// 2: sample params (uniform)
pub fn sample_binding_layout_entries() -> [wgpu::BindGroupLayoutEntry; 3] {
    let visibility = wgpu::ShaderStages::COMPUTE;
    [
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 2,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(std::mem::size_of::<SampleParams>() as u64),
            },
            count: None,
        },
    ]
}

/// Evaluates lighting at a set of view-space points.
///
/// Clustered strategies walk the light list of each point's cluster; `Naive`
/// loops over every active light. Output is `rgb` radiance plus the cluster
/// index (as `f32`) in `w`.
pub struct LightSamplePass {
    strategy: ShadingStrategy,
    pipeline: wgpu::ComputePipeline,
    positions_buffer: wgpu::Buffer,
    radiance_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    max_samples: u32,
    num_samples: u32,
}

impl LightSamplePass {
    pub fn new(
        device: &wgpu::Device,
        strategy: ShadingStrategy,
        cluster_layout: &wgpu::BindGroupLayout,
        shader: &ShaderSource,
        max_samples: u32,
    ) -> Self {
        let max_samples = max_samples.max(1);
        let module = create_shader_module(device, "clustered_shading", shader);

        let sample_entries = sample_binding_layout_entries();
        binding_validator::report(
            "clustered shading",
            binding_validator::validate_shading_bindings(
                &cluster_binding_layout_entries(),
                &sample_entries,
            ),
        );
        let sample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shading_samples_bind_group_layout"),
            entries: &sample_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shading_pipeline_layout"),
            bind_group_layouts: &[cluster_layout, &sample_layout],
            push_constant_ranges: &[],
        });
        let entry_point = if strategy.uses_clusters() {
            "cs_shade_clustered"
        } else {
            "cs_shade_naive"
        };
        let pipeline = create_compute_pipeline(
            device,
            &format!("{strategy}_shading_pipeline"),
            &pipeline_layout,
            &module,
            entry_point,
            &[("WORKGROUP_SIZE", f64::from(SAMPLE_WORKGROUP_SIZE))],
        );

        let sample_bytes = u64::from(max_samples) * 16;
        let positions_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shading_sample_positions"),
            size: sample_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let radiance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shading_radiance"),
            size: sample_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shading_sample_params"),
            size: std::mem::size_of::<SampleParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shading_samples_bind_group"),
            layout: &sample_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: positions_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: radiance_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        log::debug!("{strategy} sample pass: up to {max_samples} samples");

        Self {
            strategy,
            pipeline,
            positions_buffer,
            radiance_buffer,
            params_buffer,
            bind_group,
            max_samples,
            num_samples: 0,
        }
    }

    /// Build a pass bound to `clustering`'s shading layout.
    pub fn for_clustering(
        device: &wgpu::Device,
        strategy: ShadingStrategy,
        clustering: &LightClustering,
        shader: &ShaderSource,
        max_samples: u32,
    ) -> Self {
        Self::new(device, strategy, &clustering.bindings().layout, shader, max_samples)
    }

    /// Upload view-space sample positions. Extra points beyond capacity are dropped.
    pub fn upload_samples(&mut self, queue: &wgpu::Queue, view_positions: &[Vec3]) {
        let count = view_positions.len().min(self.max_samples as usize);
        if count < view_positions.len() {
            log::warn!(
                "{} sample points supplied, {} fit",
                view_positions.len(),
                self.max_samples
            );
        }
        let packed: Vec<[f32; 4]> = view_positions[..count]
            .iter()
            .map(|p| p.extend(1.0).to_array())
            .collect();
        if !packed.is_empty() {
            queue.write_buffer(&self.positions_buffer, 0, bytemuck::cast_slice(&packed));
        }
        self.num_samples = count as u32;
        let params = SampleParams {
            num_samples: self.num_samples,
            ..Default::default()
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
    }

    pub fn radiance_buffer(&self) -> &wgpu::Buffer {
        &self.radiance_buffer
    }

    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }
}

impl ShadingPass for LightSamplePass {
    fn strategy(&self) -> ShadingStrategy {
        self.strategy
    }

    fn render_frame(&mut self, encoder: &mut wgpu::CommandEncoder, outputs: &ClusterOutputs<'_>) {
        if self.num_samples == 0 {
            return;
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("light_sample_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &outputs.bindings.bind_group, &[]);
        pass.set_bind_group(1, &self.bind_group, &[]);
        pass.dispatch_workgroups(self.num_samples.div_ceil(SAMPLE_WORKGROUP_SIZE), 1, 1);
    }
}

// ============================================================================
// FrameRenderer - one frame: motion, clustering, shading
// ============================================================================

/// Drives the clustering core and one shading pass frame by frame.
pub struct FrameRenderer<P: ShadingPass = Box<dyn ShadingPass>> {
    clustering: LightClustering,
    pass: P,
}

impl<P: ShadingPass> FrameRenderer<P> {
    pub fn new(clustering: LightClustering, pass: P) -> Self {
        log::info!("frame renderer using {} shading", pass.strategy());
        Self { clustering, pass }
    }

    /// Move lights, cluster them if the strategy needs it, then shade.
    ///
    /// Returns the index of the frame's main submission.
    pub fn render_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        time: f32,
    ) -> wgpu::SubmissionIndex {
        self.clustering.update_lights(device, queue, time);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });
        if self.pass.strategy().uses_clusters() {
            self.clustering.run_clustering(queue, &mut encoder);
        } else {
            let n = self.clustering.num_lights();
            self.clustering.write_params(queue, n);
        }

        let outputs = self.clustering.outputs();
        self.pass.render_frame(&mut encoder, &outputs);

        let index = queue.submit(std::iter::once(encoder.finish()));
        self.clustering.mark_consumed();
        index
    }

    pub fn strategy(&self) -> ShadingStrategy {
        self.pass.strategy()
    }

    pub fn clustering(&self) -> &LightClustering {
        &self.clustering
    }

    pub fn clustering_mut(&mut self) -> &mut LightClustering {
        &mut self.clustering
    }

    pub fn pass(&self) -> &P {
        &self.pass
    }

    pub fn pass_mut(&mut self) -> &mut P {
        &mut self.pass
    }

    /// Swap the shading pass, returning the old one.
    pub fn replace_pass(&mut self, pass: P) -> P {
        log::info!("shading strategy {} -> {}", self.pass.strategy(), pass.strategy());
        std::mem::replace(&mut self.pass, pass)
    }
}
