//! Ray-tracing pipeline assembly.
//!
//! wgpu exposes hardware traversal through ray queries only, so the state
//! object compiles to one compute pipeline whose entry point walks the
//! shader table: it reads the record selected for each ray (ray generation,
//! miss by ray type, hit group by geometry and ray type) and branches on the
//! record's identifier.

pub mod root_signature;
pub mod shader_table;
pub mod state_object;

pub use root_signature::{LocalRootSignature, RootSignature};
pub use shader_table::{ShaderTable, TableLayout};
pub use state_object::{RayType, StateObject, StateObjectDesc};

use crate::error::Result;
use crate::geometry::InstanceConstants;

/// Root signatures plus the compiled state object.
pub struct RayTracingPipeline {
    pub root: RootSignature,
    pub state_object: StateObject,
}

impl RayTracingPipeline {
    pub fn assemble(
        device: &wgpu::Device,
        source: &str,
        target_format: wgpu::TextureFormat,
        max_recursion_depth: u32,
    ) -> Result<Self> {
        let root = RootSignature::global(device, target_format);
        let local = LocalRootSignature::for_payload::<InstanceConstants>();
        let desc = StateObjectDesc::standard(max_recursion_depth, local);
        let state_object = StateObject::compile(device, desc, &root, source, target_format)?;
        Ok(Self { root, state_object })
    }

    pub fn desc(&self) -> &StateObjectDesc {
        &self.state_object.desc
    }
}
