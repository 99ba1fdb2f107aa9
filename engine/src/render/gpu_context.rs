//! GPU Context
//!
//! Headless device and queue for the clustering core. No surface is created:
//! clustering output is consumed by compute shading passes or read back.

use crate::error::ContextError;

/// Shared GPU resources
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

/// Configuration for GPU context creation
#[derive(Clone, Debug)]
pub struct GpuContextConfig {
    /// Prefer high-performance GPU
    pub high_performance: bool,
    /// Accept only a software fallback adapter
    pub force_fallback_adapter: bool,
    /// Device label
    pub label: &'static str,
    /// Limits to request; `None` takes whatever the adapter supports
    pub required_limits: Option<wgpu::Limits>,
}

impl Default for GpuContextConfig {
    fn default() -> Self {
        Self {
            high_performance: true,
            force_fallback_adapter: false,
            label: "Cluster Lights Device",
            required_limits: None,
        }
    }
}

impl GpuContext {
    /// Create a headless GPU context, blocking on adapter and device requests.
    pub fn new(config: GpuContextConfig) -> Result<Self, ContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: if config.high_performance {
                wgpu::PowerPreference::HighPerformance
            } else {
                wgpu::PowerPreference::LowPower
            },
            compatible_surface: None,
            force_fallback_adapter: config.force_fallback_adapter,
        }))?;

        let adapter_info = adapter.get_info();
        let required_limits = config.required_limits.clone().unwrap_or_else(|| adapter.limits());

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some(config.label),
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

        log::info!(
            "GPU context: {} ({:?}, {:?})",
            adapter_info.name,
            adapter_info.device_type,
            adapter_info.backend
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }

    /// Limits the device was actually created with.
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Block until all submitted work has finished.
    pub fn wait_idle(&self) -> Result<(), wgpu::PollError> {
        self.device.poll(wgpu::PollType::wait_indefinitely()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GpuContextConfig::default();
        assert!(config.high_performance);
        assert!(!config.force_fallback_adapter);
        assert!(config.required_limits.is_none());
    }
}
