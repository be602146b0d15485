use std::mem::size_of;

use crate::binding::{self, GROUP_COUNT, GROUP_LABELS};

/// Global bindings visible to every stage of the dispatch.
pub struct RootSignature {
    pub bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pub layout: wgpu::PipelineLayout,
}

impl RootSignature {
    /// Derives one bind group layout per binding-table group.
    pub fn global(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Self {
        let bind_group_layouts: Vec<wgpu::BindGroupLayout> = (0..GROUP_COUNT)
            .map(|group| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(GROUP_LABELS[group as usize]),
                    entries: &binding::layout_entries(group, target_format),
                })
            })
            .collect();

        let refs: Vec<&wgpu::BindGroupLayout> = bind_group_layouts.iter().collect();
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("global root signature"),
            bind_group_layouts: &refs,
            immediate_size: 0,
        });

        Self {
            bind_group_layouts,
            layout,
        }
    }
}

/// Per-hit-group inline constants, stored in each hit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRootSignature {
    pub constant_words: u32,
}

impl LocalRootSignature {
    /// Sized to `T`, rounded up to whole 32-bit words.
    pub fn for_payload<T>() -> Self {
        Self::for_bytes(size_of::<T>())
    }

    pub fn for_bytes(bytes: usize) -> Self {
        Self {
            constant_words: bytes.div_ceil(4) as u32,
        }
    }

    pub fn payload_bytes(&self) -> u64 {
        self.constant_words as u64 * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::InstanceConstants;

    #[test]
    fn local_constants_round_to_words() {
        assert_eq!(LocalRootSignature::for_payload::<InstanceConstants>().constant_words, 4);
        assert_eq!(LocalRootSignature::for_bytes(0).constant_words, 0);
        assert_eq!(LocalRootSignature::for_bytes(1).constant_words, 1);
        assert_eq!(LocalRootSignature::for_bytes(5).payload_bytes(), 8);
        assert_eq!(LocalRootSignature::for_bytes(12).payload_bytes(), 12);
    }
}
