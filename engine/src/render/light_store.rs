//! Light Store
//!
//! Owns the canonical light array on the GPU: a 16-byte header holding the
//! active light count followed by a power-of-two number of 32-byte light
//! records. Every record, including the inactive tail, carries a color and a
//! motion seed so the padding slots of the sort network are valid lights.
//!
//! Colors are assigned once from a hue wheel. Positions are a deterministic
//! function of the record's seed and the frame clock (see
//! [`light_position_at`]), recomputed every frame by `cs_move_lights` on its
//! own submission.

use glam::Vec3;
use wgpu::util::DeviceExt;

use super::cluster_config::{ClusteringConfig, LightMotionConfig, validate_active_count};
use super::compute_pipelines::ClusteringPipelines;
use crate::error::ConfigError;

/// Size of the light set header (num_lights padded to 16 bytes).
pub const LIGHT_SET_HEADER_SIZE: u64 = 16;

/// GPU light record.
///
/// WGSL Layout (32 bytes):
///   offset  0: position (vec3<f32>) - World position, rewritten every frame
///   offset 12: seed     (f32)       - Motion seed in [0, 1), travels with the record
///   offset 16: color    (vec3<f32>) - RGB with intensity folded in
///   offset 28: _pad     (f32)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    pub position: [f32; 3],
    pub seed: f32,
    pub color: [f32; 3],
    pub _pad: f32,
}

const _: () = {
    assert!(
        std::mem::size_of::<GpuLight>() == 32,
        "GpuLight must be exactly 32 bytes for GPU compatibility"
    );
};

/// Header preceding the light records (`LightSet.num_lights` in WGSL).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightSetHeader {
    pub num_lights: u32,
    pub _pad: [u32; 3],
}

static_assertions::assert_eq_size!(LightSetHeader, [u8; LIGHT_SET_HEADER_SIZE as usize]);

/// Uniform block for `cs_move_lights`.
///
/// WGSL Layout (48 bytes):
///   offset  0: time, speed (f32), num_lights, _pad0 (u32)
///   offset 16: bounds_min (vec3<f32>), _pad1
///   offset 32: bounds_max (vec3<f32>), _pad2
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MotionParams {
    pub time: f32,
    pub speed: f32,
    pub num_lights: u32,
    pub _pad0: u32,
    pub bounds_min: [f32; 3],
    pub _pad1: f32,
    pub bounds_max: [f32; 3],
    pub _pad2: f32,
}

const _: () = assert!(std::mem::size_of::<MotionParams>() == 48);

impl MotionParams {
    pub fn new(time: f32, num_lights: u32, motion: &LightMotionConfig) -> Self {
        Self {
            time,
            speed: motion.speed,
            num_lights,
            bounds_min: motion.bounds_min,
            bounds_max: motion.bounds_max,
            ..Default::default()
        }
    }
}

/// Simple xorshift32 generator for light colors and seeds.
struct SimpleRng {
    state: u32,
}

impl SimpleRng {
    fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    /// Random f32 in [0.0, 1.0)
    fn next_f32(&mut self) -> f32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        // 24 mantissa bits keep the result strictly below 1.0
        (x >> 8) as f32 / (1u32 << 24) as f32
    }
}

/// Fully saturated hue `h` in [0, 1] pulled 80% of the way from white.
pub fn hue_to_rgb(h: f32) -> Vec3 {
    let f = |n: f32| {
        let k = (n + h * 6.0) % 6.0;
        1.0 - k.min(4.0 - k).min(1.0).max(0.0)
    };
    Vec3::ONE.lerp(Vec3::new(f(5.0), f(3.0), f(1.0)), 0.8)
}

fn fract(v: Vec3) -> Vec3 {
    v - v.floor()
}

/// World position of a light with motion seed `seed` at time `time`.
///
/// Mirrors `light_position_at` in `move_lights.wgsl`. Each axis follows a
/// triangle wave between the world bounds, so the light reflects at the box faces.
pub fn light_position_at(seed: f32, time: f32, motion: &LightMotionConfig) -> Vec3 {
    let s = Vec3::splat(seed);
    let freq = Vec3::new(0.13, 0.17, 0.11) + fract(s * Vec3::new(12.9898, 78.233, 37.719)) * 0.1;
    let phase = fract(s * Vec3::new(0.618034, 0.414214, 0.732051));
    let wave = fract(time * motion.speed * freq + phase) * 2.0 - Vec3::ONE;
    let t = wave.abs();
    let min = Vec3::from_array(motion.bounds_min);
    let max = Vec3::from_array(motion.bounds_max);
    min + (max - min) * t
}

/// Generate `count` light records with hue colors, seeds and t = 0 positions.
pub fn generate_lights(count: u32, config: &ClusteringConfig) -> Vec<GpuLight> {
    let mut rng = SimpleRng::new(config.seed);
    (0..count)
        .map(|_| {
            let hue = rng.next_f32();
            let seed = rng.next_f32();
            let color = hue_to_rgb(hue) * config.light_intensity;
            GpuLight {
                position: light_position_at(seed, 0.0, &config.motion).to_array(),
                seed,
                color: color.to_array(),
                _pad: 0.0,
            }
        })
        .collect()
}

/// GPU light array plus the motion update pipeline bindings.
pub struct LightStore {
    /// Header + `capacity` light records (STORAGE | COPY_DST | COPY_SRC).
    buffer: wgpu::Buffer,
    motion_buffer: wgpu::Buffer,
    move_bind_group: wgpu::BindGroup,
    /// Host copy of the records as uploaded at initialization.
    initial_lights: Vec<GpuLight>,
    motion: LightMotionConfig,
    max_num_lights: u32,
    num_lights: u32,
    capacity: u32,
    move_workgroup_size: u32,
}

impl LightStore {
    /// Allocate and upload the light array.
    pub fn new(
        device: &wgpu::Device,
        pipelines: &ClusteringPipelines,
        config: &ClusteringConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.light_capacity();
        let initial_lights = generate_lights(capacity, config);

        let header = LightSetHeader {
            num_lights: config.num_lights,
            ..Default::default()
        };
        let mut contents = Vec::with_capacity(config.buffer_sizes()?.lights as usize);
        contents.extend_from_slice(bytemuck::bytes_of(&header));
        contents.extend_from_slice(bytemuck::cast_slice(&initial_lights));

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("light_set_buffer"),
            contents: &contents,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });

        let motion_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("light_motion_params"),
            contents: bytemuck::bytes_of(&MotionParams::new(0.0, config.num_lights, &config.motion)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let move_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("move_lights_bind_group"),
            layout: &pipelines.move_lights_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: motion_buffer.as_entire_binding(),
                },
            ],
        });

        log::info!(
            "light store: {} records ({} max, {} active), {} bytes",
            capacity,
            config.max_num_lights,
            config.num_lights,
            buffer.size()
        );

        Ok(Self {
            buffer,
            motion_buffer,
            move_bind_group,
            initial_lights,
            motion: config.motion,
            max_num_lights: config.max_num_lights,
            num_lights: config.num_lights,
            capacity,
            move_workgroup_size: config.workgroups.move_lights,
        })
    }

    /// Change the active light count. Requires `1 <= n <= max_num_lights`.
    pub fn set_active_count(&mut self, queue: &wgpu::Queue, n: u32) -> Result<(), ConfigError> {
        if let Err(err) = validate_active_count(n, self.max_num_lights) {
            log::warn!("rejected active light count: {}", err);
            return Err(err);
        }
        if n != self.num_lights {
            log::debug!("active lights {} -> {}", self.num_lights, n);
        }
        self.num_lights = n;
        let header = LightSetHeader {
            num_lights: n,
            ..Default::default()
        };
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&header));
        Ok(())
    }

    /// Overwrite the first `lights.len()` records, e.g. with a fixed test scene.
    ///
    /// Records written this way are still moved by [`update`](Self::update).
    pub fn write_lights(&self, queue: &wgpu::Queue, lights: &[GpuLight]) -> Result<(), ConfigError> {
        if lights.len() > self.capacity as usize {
            return Err(ConfigError::LightCountOutOfRange {
                requested: lights.len() as u32,
                max: self.capacity,
            });
        }
        queue.write_buffer(&self.buffer, LIGHT_SET_HEADER_SIZE, bytemuck::cast_slice(lights));
        Ok(())
    }

    /// Move the active lights to their positions at `time` on a separate submission.
    ///
    /// Must be called before the frame's clustering commands are submitted.
    pub fn update(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipelines: &ClusteringPipelines,
        time: f32,
    ) {
        let params = MotionParams::new(time, self.num_lights, &self.motion);
        queue.write_buffer(&self.motion_buffer, 0, bytemuck::bytes_of(&params));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("move_lights_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("move_lights_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipelines.move_lights_pipeline);
            pass.set_bind_group(0, &self.move_bind_group, &[]);
            pass.dispatch_workgroups(self.num_lights.div_ceil(self.move_workgroup_size), 1, 1);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn num_lights(&self) -> u32 {
        self.num_lights
    }

    pub fn max_num_lights(&self) -> u32 {
        self.max_num_lights
    }

    /// Number of physical records (`next_pow2(max_num_lights)`).
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn initial_lights(&self) -> &[GpuLight] {
        &self.initial_lights
    }

    pub fn motion(&self) -> &LightMotionConfig {
        &self.motion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_light_size() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 32);
        assert_eq!(std::mem::size_of::<LightSetHeader>(), 16);
    }

    #[test]
    fn test_hue_to_rgb_primaries() {
        // hue 0: red, lerped 80% from white -> (1.0, 0.2, 0.2)
        let red = hue_to_rgb(0.0);
        assert!((red - Vec3::new(1.0, 0.2, 0.2)).abs().max_element() < 1e-5);

        let green = hue_to_rgb(1.0 / 3.0);
        assert!((green - Vec3::new(0.2, 1.0, 0.2)).abs().max_element() < 1e-4);

        let blue = hue_to_rgb(2.0 / 3.0);
        assert!((blue - Vec3::new(0.2, 0.2, 1.0)).abs().max_element() < 1e-4);
    }

    #[test]
    fn test_hue_to_rgb_in_unit_range() {
        for i in 0..=100 {
            let c = hue_to_rgb(i as f32 / 100.0);
            assert!(c.min_element() >= 0.2 - 1e-5);
            assert!(c.max_element() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn test_rng_range() {
        let mut rng = SimpleRng::new(0);
        for _ in 0..10_000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_light_position_stays_in_bounds() {
        let motion = LightMotionConfig::default();
        let min = Vec3::from_array(motion.bounds_min);
        let max = Vec3::from_array(motion.bounds_max);
        for i in 0..64 {
            let seed = i as f32 / 64.0;
            for step in 0..100 {
                let p = light_position_at(seed, step as f32 * 0.37, &motion);
                assert!(p.cmpge(min - 1e-4).all() && p.cmple(max + 1e-4).all(), "{p:?}");
            }
        }
    }

    #[test]
    fn test_light_position_is_deterministic_and_moves() {
        let motion = LightMotionConfig::default();
        let a = light_position_at(0.42, 3.0, &motion);
        let b = light_position_at(0.42, 3.0, &motion);
        let c = light_position_at(0.42, 4.0, &motion);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generate_lights_colors_and_seeds() {
        let config = ClusteringConfig::default();
        let lights = generate_lights(256, &config);
        assert_eq!(lights.len(), 256);
        for light in &lights {
            assert!((0.0..1.0).contains(&light.seed));
            let color = Vec3::from_array(light.color);
            assert!(color.max_element() <= config.light_intensity + 1e-6);
            assert!(color.min_element() > 0.0);
        }
        // Same seed, same lights
        assert_eq!(lights, generate_lights(256, &config));
    }

    #[test]
    fn test_motion_params_from_config() {
        let motion = LightMotionConfig::default();
        let params = MotionParams::new(2.5, 77, &motion);
        assert_eq!(params.time, 2.5);
        assert_eq!(params.num_lights, 77);
        assert_eq!(params.bounds_min, motion.bounds_min);
        assert_eq!(params.bounds_max, motion.bounds_max);
    }
}
