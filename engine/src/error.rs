//! Error types for the clustering engine.
//!
//! All errors surface at startup or on explicit host requests. Steady-state
//! per-frame work (`run_clustering`) never returns an error: capacity overflow
//! is a silent drop and empty ranges are encoded as sentinels.

/// Invalid session configuration, detected before any GPU resource exists.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("active light count {requested} outside [1, {max}]")]
    LightCountOutOfRange { requested: u32, max: u32 },

    #[error("{what} must be non-zero")]
    Zero { what: &'static str },

    #[error("{what} overflows a 64-bit byte size")]
    SizeOverflow { what: &'static str },

    #[error("{what} needs {size} bytes, device allows {limit}")]
    ExceedsDeviceLimit {
        what: &'static str,
        size: u64,
        limit: u64,
    },

    #[error("workgroup size {what} = {size} exceeds device limit {limit}")]
    WorkgroupTooLarge {
        what: &'static str,
        size: u32,
        limit: u32,
    },

    #[error("{what} dispatch needs {groups} workgroups, device allows {limit} per dimension")]
    TooManyWorkgroups {
        what: &'static str,
        groups: u32,
        limit: u32,
    },

    #[error("invalid depth range: near={near}, far={far}")]
    DepthRange { near: f32, far: f32 },

    #[error("invalid light radius {0}")]
    LightRadius(f32),

    #[error("world bounds min {min:?} not below max {max:?}")]
    WorldBounds { min: [f32; 3], max: [f32; 3] },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Failure to acquire a GPU adapter or device.
#[derive(thiserror::Error, Debug)]
pub enum ContextError {
    #[error("no suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

/// Failure while mapping a GPU buffer back to the host.
#[derive(thiserror::Error, Debug)]
pub enum ReadbackError {
    #[error("buffer map failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("map callback dropped before completion")]
    CallbackDropped,

    #[error("readback of {len} bytes is not a multiple of {elem}")]
    Misaligned { len: usize, elem: usize },

    #[error("malformed {0} readback")]
    Malformed(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::LightCountOutOfRange { requested: 6000, max: 5000 };
        assert_eq!(err.to_string(), "active light count 6000 outside [1, 5000]");

        let err = ConfigError::Zero { what: "clusters_x" };
        assert_eq!(err.to_string(), "clusters_x must be non-zero");
    }

    #[test]
    fn test_json_error_converts_to_parse() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: ConfigError = json_err.into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
