//! Declarative binding table.
//!
//! Every resource the ray dispatch reads or writes has one [`Slot`]. Its
//! group and binding index are declared once in [`BINDING_TABLE`]; the root
//! signature builder derives the bind group layouts from it and
//! [`DescriptorHeap::populate`] derives the bind groups from it, so the two
//! cannot disagree. [`validate_wgsl`] checks the shader side.

use crate::error::{RendererError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Output,
    Tlas,
    SceneConstants,
    ShaderTable,
    IndexBuffer,
    VertexBuffer,
    GeometryDescs,
    Materials,
    AlbedoTexture,
    NormalMap,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    StorageTexture,
    AccelerationStructure,
    Uniform,
    ReadOnlyStorage,
    SampledTexture,
    Sampler,
}

#[derive(Debug, Clone, Copy)]
pub struct SlotBinding {
    pub slot: Slot,
    pub group: u32,
    pub binding: u32,
    pub kind: SlotKind,
    /// Variable name in the WGSL source.
    pub wgsl_name: &'static str,
}

const fn entry(
    slot: Slot,
    group: u32,
    binding: u32,
    kind: SlotKind,
    wgsl_name: &'static str,
) -> SlotBinding {
    SlotBinding {
        slot,
        group,
        binding,
        kind,
        wgsl_name,
    }
}

/// Group 0: output table. Group 1: root descriptors. Group 2: geometry
/// table. Group 3: texture and sampler table.
pub const BINDING_TABLE: [SlotBinding; 11] = [
    entry(Slot::Output, 0, 0, SlotKind::StorageTexture, "render_target"),
    entry(Slot::Tlas, 1, 0, SlotKind::AccelerationStructure, "scene_tlas"),
    entry(Slot::SceneConstants, 1, 1, SlotKind::Uniform, "scene"),
    entry(Slot::ShaderTable, 1, 2, SlotKind::ReadOnlyStorage, "shader_table"),
    entry(Slot::IndexBuffer, 2, 0, SlotKind::ReadOnlyStorage, "indices"),
    entry(Slot::VertexBuffer, 2, 1, SlotKind::ReadOnlyStorage, "vertices"),
    entry(Slot::GeometryDescs, 2, 2, SlotKind::ReadOnlyStorage, "geometry_descs"),
    entry(Slot::Materials, 2, 3, SlotKind::ReadOnlyStorage, "materials"),
    entry(Slot::AlbedoTexture, 3, 0, SlotKind::SampledTexture, "albedo_texture"),
    entry(Slot::NormalMap, 3, 1, SlotKind::SampledTexture, "normal_map"),
    entry(Slot::Sampler, 3, 2, SlotKind::Sampler, "linear_sampler"),
];

pub const GROUP_COUNT: u32 = 4;

impl Slot {
    pub fn binding(self) -> &'static SlotBinding {
        // table is declared in enum order
        &BINDING_TABLE[self as usize]
    }
}

/// Slots of one bind group, in binding order.
pub fn group_slots(group: u32) -> impl Iterator<Item = &'static SlotBinding> {
    BINDING_TABLE.iter().filter(move |b| b.group == group)
}

/// Layout entries for `group`. `target_format` is the storage format of the
/// ray-traced output.
pub fn layout_entries(
    group: u32,
    target_format: wgpu::TextureFormat,
) -> Vec<wgpu::BindGroupLayoutEntry> {
    group_slots(group)
        .map(|b| wgpu::BindGroupLayoutEntry {
            binding: b.binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: binding_type(b.kind, target_format),
            count: None,
        })
        .collect()
}

fn binding_type(kind: SlotKind, target_format: wgpu::TextureFormat) -> wgpu::BindingType {
    match kind {
        SlotKind::StorageTexture => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: target_format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        SlotKind::AccelerationStructure => wgpu::BindingType::AccelerationStructure {
            vertex_return: false,
        },
        SlotKind::Uniform => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        SlotKind::ReadOnlyStorage => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        SlotKind::SampledTexture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        SlotKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
    }
}

/// Everything the heap points at.
pub struct BindingResources<'a> {
    pub output: &'a wgpu::TextureView,
    pub tlas: &'a wgpu::Tlas,
    pub scene_constants: &'a wgpu::Buffer,
    pub shader_table: &'a wgpu::Buffer,
    pub indices: &'a wgpu::Buffer,
    pub vertices: &'a wgpu::Buffer,
    pub geometry_descs: &'a wgpu::Buffer,
    pub materials: &'a wgpu::Buffer,
    pub albedo: &'a wgpu::TextureView,
    pub normal_map: &'a wgpu::TextureView,
    pub sampler: &'a wgpu::Sampler,
}

impl<'a> BindingResources<'a> {
    fn resource(&self, slot: Slot) -> wgpu::BindingResource<'a> {
        match slot {
            Slot::Output => wgpu::BindingResource::TextureView(self.output),
            Slot::Tlas => wgpu::BindingResource::AccelerationStructure(self.tlas),
            Slot::SceneConstants => self.scene_constants.as_entire_binding(),
            Slot::ShaderTable => self.shader_table.as_entire_binding(),
            Slot::IndexBuffer => self.indices.as_entire_binding(),
            Slot::VertexBuffer => self.vertices.as_entire_binding(),
            Slot::GeometryDescs => self.geometry_descs.as_entire_binding(),
            Slot::Materials => self.materials.as_entire_binding(),
            Slot::AlbedoTexture => wgpu::BindingResource::TextureView(self.albedo),
            Slot::NormalMap => wgpu::BindingResource::TextureView(self.normal_map),
            Slot::Sampler => wgpu::BindingResource::Sampler(self.sampler),
        }
    }
}

/// Shader-visible bindings for one dispatch, one bind group per table group.
pub struct DescriptorHeap {
    groups: Vec<wgpu::BindGroup>,
}

impl DescriptorHeap {
    pub fn populate(
        device: &wgpu::Device,
        layouts: &[wgpu::BindGroupLayout],
        resources: &BindingResources<'_>,
    ) -> Result<Self> {
        if layouts.len() != GROUP_COUNT as usize {
            return Err(RendererError::Binding(format!(
                "{} layouts for {GROUP_COUNT} groups",
                layouts.len()
            )));
        }

        let groups = layouts
            .iter()
            .enumerate()
            .map(|(group, layout)| {
                let entries: Vec<wgpu::BindGroupEntry> = group_slots(group as u32)
                    .map(|b| wgpu::BindGroupEntry {
                        binding: b.binding,
                        resource: resources.resource(b.slot),
                    })
                    .collect();
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(GROUP_LABELS[group]),
                    layout,
                    entries: &entries,
                })
            })
            .collect();

        Ok(Self { groups })
    }

    pub fn bind(&self, pass: &mut wgpu::ComputePass<'_>) {
        for (index, group) in self.groups.iter().enumerate() {
            pass.set_bind_group(index as u32, group, &[]);
        }
    }

    pub fn slot_count(&self) -> usize {
        BINDING_TABLE.len()
    }
}

pub const GROUP_LABELS: [&str; GROUP_COUNT as usize] = [
    "output table",
    "root descriptors",
    "geometry table",
    "texture table",
];

/// A `@group(g) @binding(b) var... name` declaration found in WGSL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Declaration {
    group: u32,
    binding: u32,
    name: String,
}

fn attribute(line: &str, attr: &str) -> Option<u32> {
    let start = line.find(attr)? + attr.len();
    let rest = &line[start..];
    let end = rest.find(')')?;
    rest[..end].trim().parse().ok()
}

fn declarations(source: &str) -> Vec<Declaration> {
    source
        .lines()
        .map(|l| l.split("//").next().unwrap_or(""))
        .filter_map(|line| {
            let group = attribute(line, "@group(")?;
            let binding = attribute(line, "@binding(")?;
            let after_var = &line[line.find("var")? + 3..];
            let after_space = match after_var.find('>') {
                Some(close) if after_var.trim_start().starts_with('<') => &after_var[close + 1..],
                _ => after_var,
            };
            let name = after_space.split(':').next()?.trim().to_owned();
            Some(Declaration {
                group,
                binding,
                name,
            })
        })
        .collect()
}

/// Checks that the shader declares exactly the bindings of the table.
pub fn validate_wgsl(source: &str) -> Result<()> {
    let found = declarations(source);

    for b in &BINDING_TABLE {
        match found.iter().find(|d| d.name == b.wgsl_name) {
            Some(d) if d.group == b.group && d.binding == b.binding => {}
            Some(d) => {
                return Err(RendererError::Binding(format!(
                    "{:?}: shader declares `{}` at ({}, {}), table says ({}, {})",
                    b.slot, d.name, d.group, d.binding, b.group, b.binding
                )));
            }
            None => {
                return Err(RendererError::Binding(format!(
                    "{:?}: `{}` is not declared by the shader",
                    b.slot, b.wgsl_name
                )));
            }
        }
    }

    if let Some(extra) = found
        .iter()
        .find(|d| !BINDING_TABLE.iter().any(|b| b.wgsl_name == d.name))
    {
        return Err(RendererError::Binding(format!(
            "shader binding `{}` at ({}, {}) has no slot",
            extra.name, extra.group, extra.binding
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SHADER: &str = include_str!("../resources/shaders/raytracing.wgsl");

    #[test]
    fn table_is_in_enum_order() {
        for (i, b) in BINDING_TABLE.iter().enumerate() {
            assert_eq!(b.slot as usize, i);
            assert_eq!(b.slot.binding().slot, b.slot);
        }
    }

    #[test]
    fn group_binding_pairs_are_unique() {
        let mut seen = HashSet::new();
        for b in &BINDING_TABLE {
            assert!(b.group < GROUP_COUNT);
            assert!(seen.insert((b.group, b.binding)), "{:?} collides", b.slot);
        }
    }

    #[test]
    fn groups_are_dense() {
        for group in 0..GROUP_COUNT {
            let bindings: Vec<u32> = group_slots(group).map(|b| b.binding).collect();
            let expected: Vec<u32> = (0..bindings.len() as u32).collect();
            assert_eq!(bindings, expected, "group {group}");
        }
    }

    #[test]
    fn layout_entries_follow_table() {
        let entries = layout_entries(2, wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| matches!(
            e.ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                ..
            }
        )));

        let output = layout_entries(0, wgpu::TextureFormat::Bgra8Unorm);
        assert!(matches!(
            output[0].ty,
            wgpu::BindingType::StorageTexture {
                format: wgpu::TextureFormat::Bgra8Unorm,
                ..
            }
        ));
    }

    #[test]
    fn builtin_shader_matches_table() {
        validate_wgsl(SHADER).unwrap();
    }

    #[test]
    fn moved_binding_is_reported() {
        let tampered = SHADER.replace(
            "@group(2) @binding(1) var<storage, read> vertices",
            "@group(2) @binding(5) var<storage, read> vertices",
        );
        assert_ne!(tampered, SHADER);
        let err = validate_wgsl(&tampered).unwrap_err();
        assert!(err.to_string().contains("VertexBuffer"));
    }

    #[test]
    fn parses_declarations() {
        let src = "\
@group(0) @binding(3) var<storage, read> things: array<u32>; // note
@group(1) @binding(0) var tex: texture_2d<f32>;
// @group(9) @binding(9) var ignored: u32;
";
        let found = declarations(src);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "things");
        assert_eq!((found[0].group, found[0].binding), (0, 3));
        assert_eq!(found[1].name, "tex");
    }
}
