//! Light Clustering Dispatch
//!
//! `LightClustering` owns every buffer of the clustering core and records the
//! per-frame stages in order:
//! - `update_lights`: light motion, on its own submission
//! - `run_clustering`: depth sort, Z-bin build, cluster assignment
//!
//! Shading passes read the results through [`ClusterOutputs`].

use log::{debug, info, trace, warn};
use wgpu::util::DeviceExt;

use super::camera_uniforms::CameraUniforms;
use super::cluster_buffers::{ClusterBindings, ClusterBuffers, ClusterParams};
use super::cluster_config::{ClusteringConfig, validate_depth_range};
use super::compute_pipelines::ClusteringPipelines;
use super::light_sort::LightSorter;
use super::light_store::LightStore;
use super::shader_loader::ClusteringShaders;
use super::zbin::DepthBinner;
use crate::error::ConfigError;

/// Where the current frame is in the clustering sequence.
///
/// Tracked for logging only; command ordering is enforced by recording order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FrameStage {
    #[default]
    Idle,
    LightsUpdated,
    Sorted,
    Binned,
    Clustered,
    ConsumedByShading,
}

/// Read-only view of the clustering results handed to shading passes.
#[derive(Clone, Copy)]
pub struct ClusterOutputs<'a> {
    pub bindings: &'a ClusterBindings,
    pub light_buffer: &'a wgpu::Buffer,
    pub cluster_buffer: &'a wgpu::Buffer,
    pub dims: [u32; 3],
    pub capacity: u32,
    pub num_lights: u32,
}

/// The clustering core: light store, sorter, Z-bins and cluster set.
pub struct LightClustering {
    config: ClusteringConfig,
    pipelines: ClusteringPipelines,
    camera: CameraUniforms,
    camera_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    store: LightStore,
    sorter: LightSorter,
    binner: DepthBinner,
    clusters: ClusterBuffers,
    bindings: ClusterBindings,
    stage: FrameStage,
    frame: u64,
}

impl LightClustering {
    /// Validate `config` against the device and allocate every core buffer.
    pub fn new(
        device: &wgpu::Device,
        config: ClusteringConfig,
        shaders: &ClusteringShaders,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        config.validate_for_limits(&device.limits())?;

        let pipelines = ClusteringPipelines::new(device, shaders, &config.workgroups);

        let camera = CameraUniforms::default();
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("cluster_camera_uniforms"),
            contents: bytemuck::bytes_of(&camera),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("cluster_params"),
            contents: bytemuck::bytes_of(&ClusterParams::new(&config, config.num_lights)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let store = LightStore::new(device, &pipelines, &config)?;
        let sorter = LightSorter::new(
            device,
            &pipelines,
            store.buffer(),
            &camera_buffer,
            store.capacity(),
            config.workgroups.sort,
        );
        let binner = DepthBinner::new(
            device,
            &pipelines,
            sorter.keys_buffer(),
            &camera_buffer,
            &params_buffer,
            config.num_zbins,
            config.workgroups.zbin,
        );
        let clusters = ClusterBuffers::new(
            device,
            &pipelines,
            &config,
            store.buffer(),
            binner.buffer(),
            &camera_buffer,
            &params_buffer,
        );
        let bindings = ClusterBindings::new(
            device,
            &camera_buffer,
            store.buffer(),
            clusters.buffer(),
            &params_buffer,
        );

        info!(
            "light clustering ready: {:?} mode, {:?} depth warp, {} z-bins",
            config.mode, config.depth_warp, config.num_zbins
        );

        Ok(Self {
            config,
            pipelines,
            camera,
            camera_buffer,
            params_buffer,
            store,
            sorter,
            binner,
            clusters,
            bindings,
            stage: FrameStage::Idle,
            frame: 0,
        })
    }

    fn advance(&mut self, next: FrameStage) {
        trace!("frame {}: {:?} -> {:?}", self.frame, self.stage, next);
        self.stage = next;
    }

    /// Upload this frame's camera.
    pub fn update_camera(&mut self, queue: &wgpu::Queue, camera: &CameraUniforms) {
        if let Err(err) = validate_depth_range(camera.near, camera.far) {
            warn!("camera update: {err}");
        }
        self.camera = *camera;
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(camera));
    }

    /// Move the active lights to their positions at `time`.
    ///
    /// Submits immediately, so it lands before the frame's clustering commands.
    pub fn update_lights(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, time: f32) {
        if self.stage != FrameStage::Idle && self.stage != FrameStage::ConsumedByShading {
            debug!("light update while frame {} is {:?}", self.frame, self.stage);
        }
        self.store.update(device, queue, &self.pipelines, time);
        self.advance(FrameStage::LightsUpdated);
    }

    /// Change the active light count. Requires `1 <= n <= max_num_lights`.
    pub fn set_num_lights(&mut self, queue: &wgpu::Queue, n: u32) -> Result<(), ConfigError> {
        self.store.set_active_count(queue, n)?;
        self.config.num_lights = n;
        Ok(())
    }

    pub fn num_lights(&self) -> u32 {
        self.store.num_lights()
    }

    /// Write the cluster parameters for `num_lights` active lights.
    pub fn write_params(&self, queue: &wgpu::Queue, num_lights: u32) {
        let params = ClusterParams::new(&self.config, num_lights);
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
    }

    /// Record sort, Z-bin and cluster passes for the current active count.
    pub fn run_clustering(&mut self, queue: &wgpu::Queue, encoder: &mut wgpu::CommandEncoder) {
        let n = self.store.num_lights();
        self.run_clustering_for(queue, encoder, n);
    }

    /// Record the clustering passes over the first `num_lights` records.
    ///
    /// `num_lights` may be zero, which yields empty Z-bins and cluster lists.
    /// Counts above `max_num_lights` are clamped.
    pub fn run_clustering_for(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        num_lights: u32,
    ) {
        let max = self.store.max_num_lights();
        let n = if num_lights > max {
            warn!("clustering requested for {num_lights} lights, clamping to {max}");
            max
        } else {
            num_lights
        };

        self.write_params(queue, n);

        if self.config.mode.uses_zbins() {
            self.sorter.prepare(queue, n);
            self.sorter.record(encoder, &self.pipelines, n);
            self.advance(FrameStage::Sorted);

            self.binner.record(encoder, &self.pipelines);
            self.advance(FrameStage::Binned);
        }

        self.clusters.record(encoder, &self.pipelines);
        self.advance(FrameStage::Clustered);
    }

    /// Note that a shading pass has consumed this frame's clusters.
    pub fn mark_consumed(&mut self) {
        self.advance(FrameStage::ConsumedByShading);
        self.frame += 1;
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn outputs(&self) -> ClusterOutputs<'_> {
        ClusterOutputs {
            bindings: &self.bindings,
            light_buffer: self.store.buffer(),
            cluster_buffer: self.clusters.buffer(),
            dims: self.clusters.dims(),
            capacity: self.clusters.capacity(),
            num_lights: self.store.num_lights(),
        }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    pub fn camera(&self) -> &CameraUniforms {
        &self.camera
    }

    pub fn bindings(&self) -> &ClusterBindings {
        &self.bindings
    }

    pub fn light_store(&self) -> &LightStore {
        &self.store
    }

    pub fn light_buffer(&self) -> &wgpu::Buffer {
        self.store.buffer()
    }

    pub fn keys_buffer(&self) -> &wgpu::Buffer {
        self.sorter.keys_buffer()
    }

    pub fn zbin_buffer(&self) -> &wgpu::Buffer {
        self.binner.buffer()
    }

    pub fn cluster_buffer(&self) -> &wgpu::Buffer {
        self.clusters.buffer()
    }

    pub fn binding_mismatches(&self) -> u32 {
        self.pipelines.binding_mismatches
    }
}
