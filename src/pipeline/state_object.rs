use std::borrow::Cow;
use std::collections::HashSet;

use crate::binding;
use crate::error::{RendererError, Result};

use super::root_signature::{LocalRootSignature, RootSignature};

/// Upper bound accepted for the recursion cap.
pub const MAX_RECURSION_LIMIT: u32 = 31;
/// Triangle barycentrics.
pub const ATTRIBUTE_BYTES: u32 = 8;
pub const PAYLOAD_BYTES: u32 = 32;
pub const MAX_ATTRIBUTE_BYTES: u32 = 32;

pub const RAYGEN_EXPORT: &str = "raygen";
pub const CLOSEST_HIT_EXPORT: &str = "closest_hit";

const TARGET_FORMAT_DECL: &str = "texture_storage_2d<rgba8unorm, write>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RayType {
    Radiance = 0,
    Shadow = 1,
}

impl RayType {
    pub const ALL: [RayType; 2] = [RayType::Radiance, RayType::Shadow];
    pub const COUNT: u32 = Self::ALL.len() as u32;

    pub fn miss_export(self) -> &'static str {
        match self {
            RayType::Radiance => "miss_radiance",
            RayType::Shadow => "miss_shadow",
        }
    }

    pub fn hit_group_export(self) -> &'static str {
        match self {
            RayType::Radiance => "hit_group_radiance",
            RayType::Shadow => "hit_group_shadow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    RayGeneration,
    Miss,
    ClosestHit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderExport {
    pub name: &'static str,
    pub kind: ShaderKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroup {
    pub export: &'static str,
    pub ray_type: RayType,
    pub closest_hit: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderConfig {
    pub max_attribute_bytes: u32,
    pub max_payload_bytes: u32,
}

/// Binds the local root signature to a set of exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAssociation {
    pub local: LocalRootSignature,
    pub exports: Vec<&'static str>,
}

/// Subobjects that make up the ray-tracing state object.
#[derive(Debug, Clone)]
pub struct StateObjectDesc {
    pub library: Vec<ShaderExport>,
    pub hit_groups: Vec<HitGroup>,
    pub shader_config: ShaderConfig,
    pub max_recursion_depth: u32,
    pub association: LocalAssociation,
}

/// Opaque 32-byte handle written at the start of each shader record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderIdentifier([u8; 32]);

impl ShaderIdentifier {
    pub const SIZE: usize = 32;
    pub const NULL: ShaderIdentifier = ShaderIdentifier([0; 32]);

    fn from_id(id: u32) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&id.to_le_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl StateObjectDesc {
    /// One ray generation shader, one miss shader per ray type and one hit
    /// group per ray type sharing the closest-hit shader.
    pub fn standard(max_recursion_depth: u32, local: LocalRootSignature) -> Self {
        let mut library = vec![ShaderExport {
            name: RAYGEN_EXPORT,
            kind: ShaderKind::RayGeneration,
        }];
        library.push(ShaderExport {
            name: CLOSEST_HIT_EXPORT,
            kind: ShaderKind::ClosestHit,
        });
        library.extend(RayType::ALL.iter().map(|r| ShaderExport {
            name: r.miss_export(),
            kind: ShaderKind::Miss,
        }));

        let hit_groups: Vec<HitGroup> = RayType::ALL
            .iter()
            .map(|r| HitGroup {
                export: r.hit_group_export(),
                ray_type: *r,
                closest_hit: CLOSEST_HIT_EXPORT,
            })
            .collect();

        let association = LocalAssociation {
            local,
            exports: hit_groups.iter().map(|g| g.export).collect(),
        };

        Self {
            library,
            hit_groups,
            shader_config: ShaderConfig {
                max_attribute_bytes: ATTRIBUTE_BYTES,
                max_payload_bytes: PAYLOAD_BYTES,
            },
            max_recursion_depth,
            association,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RendererError::StateObject(msg));

        let mut names = HashSet::new();
        for name in self
            .library
            .iter()
            .map(|e| e.name)
            .chain(self.hit_groups.iter().map(|g| g.export))
        {
            if !names.insert(name) {
                return invalid(format!("export `{name}` is declared twice"));
            }
        }

        let raygen = self
            .library
            .iter()
            .filter(|e| e.kind == ShaderKind::RayGeneration)
            .count();
        if raygen != 1 {
            return invalid(format!("{raygen} ray generation shaders, expected 1"));
        }

        for ray in RayType::ALL {
            if !self
                .library
                .iter()
                .any(|e| e.kind == ShaderKind::Miss && e.name == ray.miss_export())
            {
                return invalid(format!("no miss shader for {ray:?}"));
            }
            let groups = self
                .hit_groups
                .iter()
                .filter(|g| g.ray_type == ray)
                .count();
            if groups != 1 {
                return invalid(format!("{groups} hit groups for {ray:?}, expected 1"));
            }
        }

        for group in &self.hit_groups {
            if !self
                .library
                .iter()
                .any(|e| e.kind == ShaderKind::ClosestHit && e.name == group.closest_hit)
            {
                return invalid(format!(
                    "hit group `{}` references unknown closest hit `{}`",
                    group.export, group.closest_hit
                ));
            }
        }

        let associated: HashSet<&str> = self.association.exports.iter().copied().collect();
        let hit_exports: HashSet<&str> = self.hit_groups.iter().map(|g| g.export).collect();
        if associated.len() != self.association.exports.len() || associated != hit_exports {
            return invalid(format!(
                "local root signature is associated with {:?}, expected exactly {:?}",
                self.association.exports,
                self.hit_groups.iter().map(|g| g.export).collect::<Vec<_>>()
            ));
        }

        if self.max_recursion_depth == 0 || self.max_recursion_depth > MAX_RECURSION_LIMIT {
            return invalid(format!(
                "recursion depth {} outside 1..={MAX_RECURSION_LIMIT}",
                self.max_recursion_depth
            ));
        }
        let cfg = self.shader_config;
        if cfg.max_attribute_bytes < ATTRIBUTE_BYTES || cfg.max_attribute_bytes > MAX_ATTRIBUTE_BYTES
        {
            return invalid(format!(
                "attribute size {} outside {ATTRIBUTE_BYTES}..={MAX_ATTRIBUTE_BYTES}",
                cfg.max_attribute_bytes
            ));
        }
        if cfg.max_payload_bytes == 0 || cfg.max_payload_bytes % 4 != 0 {
            return invalid(format!("payload size {} is not whole words", cfg.max_payload_bytes));
        }
        Ok(())
    }

    /// Exports that may appear in a shader record, in identifier order.
    fn record_exports(&self) -> impl Iterator<Item = &'static str> + '_ {
        let raygen = self
            .library
            .iter()
            .filter(|e| e.kind == ShaderKind::RayGeneration)
            .map(|e| e.name);
        let misses = RayType::ALL.iter().map(|r| r.miss_export());
        let hits = RayType::ALL.iter().map(|r| r.hit_group_export());
        raygen.chain(misses).chain(hits)
    }

    /// Identifier of a ray generation, miss or hit group export.
    pub fn identifier(&self, export: &str) -> Option<ShaderIdentifier> {
        self.record_exports()
            .position(|e| e == export)
            .map(|i| ShaderIdentifier::from_id(i as u32 + 1))
    }

    /// Pipeline-overridable constants handed to the compiled shader.
    fn overrides(&self) -> Vec<(String, f64)> {
        let mut constants = vec![(
            "MAX_RECURSION_DEPTH".to_owned(),
            self.max_recursion_depth as f64,
        )];
        for (i, export) in self.record_exports().enumerate() {
            constants.push((format!("ID_{}", export.to_uppercase()), (i + 1) as f64));
        }
        constants
    }
}

/// The compiled state object.
pub struct StateObject {
    pub pipeline: wgpu::ComputePipeline,
    pub desc: StateObjectDesc,
}

impl StateObject {
    /// Validates `desc` and the shader's bindings, then compiles the shader
    /// library into a single compute pipeline.
    pub fn compile(
        device: &wgpu::Device,
        desc: StateObjectDesc,
        root: &RootSignature,
        source: &str,
        target_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        desc.validate()?;
        binding::validate_wgsl(source)?;
        let source = specialize_target_format(source, target_format)?;

        // a malformed library surfaces here instead of in the uncaptured handler
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ray tracing library"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });

        let overrides = desc.overrides();
        let constants: Vec<(&str, f64)> =
            overrides.iter().map(|(k, v)| (k.as_str(), *v)).collect();

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("ray tracing state object"),
            layout: Some(&root.layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions {
                constants: &constants,
                ..Default::default()
            },
            cache: None,
        });
        if let Some(err) = pollster::block_on(scope.pop()) {
            log::error!("state object compilation failed: {err}");
            return Err(RendererError::StateObject(err.to_string()));
        }

        log::debug!(
            "state object: {} exports, {} hit groups, recursion {}",
            desc.library.len(),
            desc.hit_groups.len(),
            desc.max_recursion_depth
        );
        Ok(Self { pipeline, desc })
    }
}

/// The shader is written against an rgba8 target; BGRA back buffers need the
/// storage declaration rewritten.
fn specialize_target_format(source: &str, format: wgpu::TextureFormat) -> Result<String> {
    let wgsl_format = match format {
        wgpu::TextureFormat::Rgba8Unorm => return Ok(source.to_owned()),
        wgpu::TextureFormat::Bgra8Unorm => "bgra8unorm",
        other => {
            return Err(RendererError::StateObject(format!(
                "unsupported ray target format {other:?}"
            )));
        }
    };
    if !source.contains(TARGET_FORMAT_DECL) {
        return Err(RendererError::StateObject(
            "shader does not declare an rgba8unorm ray target".to_owned(),
        ));
    }
    Ok(source.replace(
        TARGET_FORMAT_DECL,
        &format!("texture_storage_2d<{wgsl_format}, write>"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> StateObjectDesc {
        StateObjectDesc::standard(10, LocalRootSignature::for_bytes(16))
    }

    #[test]
    fn standard_desc_is_valid() {
        let d = desc();
        d.validate().unwrap();
        assert_eq!(d.hit_groups.len(), RayType::COUNT as usize);
        assert_eq!(d.association.exports, vec!["hit_group_radiance", "hit_group_shadow"]);
    }

    #[test]
    fn association_must_cover_exactly_the_hit_groups() {
        let mut d = desc();
        d.association.exports.push(RAYGEN_EXPORT);
        assert!(d.validate().is_err());

        let mut d = desc();
        d.association.exports.pop();
        assert!(d.validate().is_err());

        let mut d = desc();
        d.association.exports = vec!["hit_group_radiance", "hit_group_radiance"];
        assert!(d.validate().is_err());
    }

    #[test]
    fn missing_miss_shader_is_rejected() {
        let mut d = desc();
        d.library.retain(|e| e.name != RayType::Shadow.miss_export());
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("Shadow"));
    }

    #[test]
    fn recursion_cap_is_bounded() {
        let mut d = desc();
        d.max_recursion_depth = 0;
        assert!(d.validate().is_err());
        d.max_recursion_depth = MAX_RECURSION_LIMIT + 1;
        assert!(d.validate().is_err());
        d.max_recursion_depth = MAX_RECURSION_LIMIT;
        assert!(d.validate().is_ok());
    }

    #[test]
    fn identifiers_are_distinct_and_non_null() {
        let d = desc();
        let ids: Vec<ShaderIdentifier> = [
            RAYGEN_EXPORT,
            "miss_radiance",
            "miss_shadow",
            "hit_group_radiance",
            "hit_group_shadow",
        ]
        .iter()
        .map(|e| d.identifier(e).unwrap())
        .collect();
        for (i, a) in ids.iter().enumerate() {
            assert_ne!(*a, ShaderIdentifier::NULL);
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
        // the closest hit shader is only reachable through a hit group
        assert!(d.identifier(CLOSEST_HIT_EXPORT).is_none());
    }

    #[test]
    fn overrides_name_every_record_export() {
        let names: Vec<String> = desc().overrides().into_iter().map(|(k, _)| k).collect();
        for expected in [
            "MAX_RECURSION_DEPTH",
            "ID_RAYGEN",
            "ID_MISS_RADIANCE",
            "ID_MISS_SHADOW",
            "ID_HIT_GROUP_RADIANCE",
            "ID_HIT_GROUP_SHADOW",
        ] {
            assert!(names.iter().any(|n| n == expected), "{expected}");
        }
    }

    #[test]
    fn builtin_shader_declares_every_override() {
        let source = include_str!("../../resources/shaders/raytracing.wgsl");
        for (name, _) in desc().overrides() {
            assert!(source.contains(&format!("override {name}")), "{name}");
        }
    }

    #[test]
    fn bgra_target_rewrites_storage_format() {
        let src = "@group(0) @binding(0) var render_target: texture_storage_2d<rgba8unorm, write>;";
        let out = specialize_target_format(src, wgpu::TextureFormat::Bgra8Unorm).unwrap();
        assert!(out.contains("texture_storage_2d<bgra8unorm, write>"));
        assert_eq!(
            specialize_target_format(src, wgpu::TextureFormat::Rgba8Unorm).unwrap(),
            src
        );
        assert!(specialize_target_format(src, wgpu::TextureFormat::Rgba16Float).is_err());
    }

    fn parse_and_validate(source: &str) -> naga::Module {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(m) => m,
            Err(e) => panic!("{}", e.emit_to_string(source)),
        };
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        if let Err(e) = validator.validate(&module) {
            panic!("{}", e.emit_to_string(source));
        }
        module
    }

    #[test]
    fn builtin_shader_compiles_for_both_target_formats() {
        let source = include_str!("../../resources/shaders/raytracing.wgsl");
        for format in [wgpu::TextureFormat::Rgba8Unorm, wgpu::TextureFormat::Bgra8Unorm] {
            let specialized = specialize_target_format(source, format).unwrap();
            let module = parse_and_validate(&specialized);
            assert!(
                module.entry_points.iter().any(|e| e.name == "main"),
                "no main entry point"
            );

            let declared: HashSet<&str> = module
                .overrides
                .iter()
                .filter_map(|(_, o)| o.name.as_deref())
                .collect();
            for (name, _) in desc().overrides() {
                assert!(declared.contains(name.as_str()), "{name} is not an override");
            }
        }
    }
}
