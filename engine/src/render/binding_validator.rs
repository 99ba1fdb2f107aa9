//! Shader Binding Validator
//!
//! Checks at startup that the bind group layouts built on the Rust side match
//! the WGSL declarations of each clustering shader. Mismatches are logged and
//! counted; they would otherwise surface as GPU validation errors mid-frame.
//!
//! The expected bindings below are the canonical mirror of the shaders'
//! `@group/@binding` declarations.

use std::fmt;

/// Describes a single expected binding in a bind group layout.
#[derive(Debug, Clone)]
struct ExpectedBinding {
    binding: u32,
    binding_type: ExpectedBindingType,
    label: &'static str,
}

/// The type of a binding, matching the wgpu::BindingType variants we use.
#[derive(Debug, Clone, PartialEq)]
enum ExpectedBindingType {
    UniformBuffer,
    StorageBufferReadOnly,
    StorageBufferReadWrite,
    Other,
}

impl fmt::Display for ExpectedBindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UniformBuffer => write!(f, "uniform buffer"),
            Self::StorageBufferReadOnly => write!(f, "storage buffer (read-only)"),
            Self::StorageBufferReadWrite => write!(f, "storage buffer (read-write)"),
            Self::Other => write!(f, "non-buffer binding"),
        }
    }
}

/// Describes the expected layout for one bind group of a pipeline.
struct ExpectedBindGroup {
    pipeline_name: &'static str,
    group_index: u32,
    bindings: Vec<ExpectedBinding>,
}

fn uniform(binding: u32, label: &'static str) -> ExpectedBinding {
    ExpectedBinding { binding, binding_type: ExpectedBindingType::UniformBuffer, label }
}

fn storage_read(binding: u32, label: &'static str) -> ExpectedBinding {
    ExpectedBinding { binding, binding_type: ExpectedBindingType::StorageBufferReadOnly, label }
}

fn storage_rw(binding: u32, label: &'static str) -> ExpectedBinding {
    ExpectedBinding { binding, binding_type: ExpectedBindingType::StorageBufferReadWrite, label }
}

fn classify_entry(entry: &wgpu::BindGroupLayoutEntry) -> ExpectedBindingType {
    match &entry.ty {
        wgpu::BindingType::Buffer { ty, .. } => match ty {
            wgpu::BufferBindingType::Uniform => ExpectedBindingType::UniformBuffer,
            wgpu::BufferBindingType::Storage { read_only: true } => ExpectedBindingType::StorageBufferReadOnly,
            wgpu::BufferBindingType::Storage { read_only: false } => ExpectedBindingType::StorageBufferReadWrite,
        },
        _ => ExpectedBindingType::Other,
    }
}

/// Validates actual bind group layout entries against expected bindings.
/// Returns the number of mismatches found.
fn validate_bind_group(
    expected: &ExpectedBindGroup,
    actual_entries: &[wgpu::BindGroupLayoutEntry],
) -> u32 {
    let mut mismatches = 0u32;

    for exp in &expected.bindings {
        match actual_entries.iter().find(|e| e.binding == exp.binding) {
            None => {
                log::warn!(
                    "binding mismatch in '{}' group {} binding {}: expected {} ({}), actual: MISSING",
                    expected.pipeline_name, expected.group_index, exp.binding, exp.binding_type, exp.label
                );
                mismatches += 1;
            }
            Some(actual) => {
                let actual_type = classify_entry(actual);
                if actual_type != exp.binding_type {
                    log::warn!(
                        "binding mismatch in '{}' group {} binding {}: expected {} ({}), actual: {}",
                        expected.pipeline_name, expected.group_index, exp.binding,
                        exp.binding_type, exp.label, actual_type
                    );
                    mismatches += 1;
                }
            }
        }
    }

    for actual in actual_entries {
        if !expected.bindings.iter().any(|e| e.binding == actual.binding) {
            log::warn!(
                "extra binding in '{}' group {} binding {}: type {} not declared by the shader",
                expected.pipeline_name, expected.group_index, actual.binding, classify_entry(actual)
            );
            mismatches += 1;
        }
    }

    mismatches
}

/// Validate the four clustering compute bind groups.
pub fn validate_compute_bindings(
    move_lights_entries: &[wgpu::BindGroupLayoutEntry],
    sort_entries: &[wgpu::BindGroupLayoutEntry],
    zbin_entries: &[wgpu::BindGroupLayoutEntry],
    cluster_entries: &[wgpu::BindGroupLayoutEntry],
) -> u32 {
    let mut total = 0u32;

    let move_lights = ExpectedBindGroup {
        pipeline_name: "Move Lights",
        group_index: 0,
        bindings: vec![storage_rw(0, "LightSet"), uniform(1, "MotionParams")],
    };
    total += validate_bind_group(&move_lights, move_lights_entries);

    let sort = ExpectedBindGroup {
        pipeline_name: "Light Sort",
        group_index: 0,
        bindings: vec![
            storage_rw(0, "LightSet"),
            storage_rw(1, "sort keys"),
            uniform(2, "Camera"),
            uniform(3, "SortParams"),
        ],
    };
    total += validate_bind_group(&sort, sort_entries);

    let zbin = ExpectedBindGroup {
        pipeline_name: "Z-Bin",
        group_index: 0,
        bindings: vec![
            storage_read(0, "sort keys"),
            storage_rw(1, "ZBin table"),
            uniform(2, "Camera"),
            uniform(3, "ClusterParams"),
        ],
    };
    total += validate_bind_group(&zbin, zbin_entries);

    let cluster = ExpectedBindGroup {
        pipeline_name: "Cluster Assign",
        group_index: 0,
        bindings: vec![
            storage_read(0, "LightSet"),
            storage_read(1, "ZBin table"),
            storage_rw(2, "ClusterSet"),
            uniform(3, "Camera"),
            uniform(4, "ClusterParams"),
        ],
    };
    total += validate_bind_group(&cluster, cluster_entries);

    total
}

/// Validate the shading-side groups: cluster outputs (group 0) and samples (group 1).
pub fn validate_shading_bindings(
    cluster_entries: &[wgpu::BindGroupLayoutEntry],
    sample_entries: &[wgpu::BindGroupLayoutEntry],
) -> u32 {
    let cluster = ExpectedBindGroup {
        pipeline_name: "Clustered Shading",
        group_index: 0,
        bindings: vec![
            uniform(0, "Camera"),
            storage_read(1, "LightSet"),
            storage_read(2, "ClusterSet"),
            uniform(3, "ClusterParams"),
        ],
    };
    let samples = ExpectedBindGroup {
        pipeline_name: "Clustered Shading",
        group_index: 1,
        bindings: vec![
            storage_read(0, "sample positions"),
            storage_rw(1, "radiance"),
            uniform(2, "SampleParams"),
        ],
    };
    validate_bind_group(&cluster, cluster_entries) + validate_bind_group(&samples, sample_entries)
}

/// Log the outcome of a validation run and pass the count through.
pub fn report(what: &str, mismatches: u32) -> u32 {
    if mismatches == 0 {
        log::debug!("{what}: all shader bindings validated");
    } else {
        log::warn!("{what}: {mismatches} binding mismatch(es), GPU validation errors may occur");
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    #[test]
    fn test_matching_group_has_no_mismatch() {
        let entries = [
            buffer_entry(0, wgpu::BufferBindingType::Storage { read_only: false }),
            buffer_entry(1, wgpu::BufferBindingType::Uniform),
        ];
        let expected = ExpectedBindGroup {
            pipeline_name: "test",
            group_index: 0,
            bindings: vec![storage_rw(0, "a"), uniform(1, "b")],
        };
        assert_eq!(validate_bind_group(&expected, &entries), 0);
    }

    #[test]
    fn test_wrong_access_missing_and_extra() {
        let entries = [
            buffer_entry(0, wgpu::BufferBindingType::Storage { read_only: true }),
            buffer_entry(5, wgpu::BufferBindingType::Uniform),
        ];
        let expected = ExpectedBindGroup {
            pipeline_name: "test",
            group_index: 0,
            bindings: vec![storage_rw(0, "a"), uniform(1, "b")],
        };
        // wrong type at 0, missing 1, extra 5
        assert_eq!(validate_bind_group(&expected, &entries), 3);
    }

    #[test]
    fn test_shading_layout_entries_match() {
        let cluster = crate::render::cluster_buffers::cluster_binding_layout_entries();
        let samples = crate::render::shading::sample_binding_layout_entries();
        assert_eq!(validate_shading_bindings(&cluster, &samples), 0);
    }
}
