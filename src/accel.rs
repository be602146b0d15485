use crate::error::{RendererError, Result};
use crate::geometry::{GeometryDesc, Index, VERTEX_STRIDE};
use crate::resources::{GpuBuffer, ResourceManager};

/// Row-major 3x4 identity.
pub const IDENTITY_TRANSFORM: [f32; 12] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0,
];

/// One triangle geometry per mesh slice, all in a single structure.
pub struct BottomLevel {
    pub blas: wgpu::Blas,
    pub geometry_count: u32,
}

/// Instance of a bottom-level structure inside the top level.
#[derive(Debug, Clone, Copy)]
pub struct InstanceDesc {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    pub mask: u8,
    /// Index into the bottom-level list passed to [`build_top_level`].
    pub bottom_level: usize,
    /// 24-bit value visible to the shader as the instance custom index.
    pub custom_index: u32,
}

impl InstanceDesc {
    pub fn identity(bottom_level: usize) -> Self {
        Self {
            transform: IDENTITY_TRANSFORM,
            mask: 1,
            bottom_level,
            custom_index: 0,
        }
    }
}

pub struct TopLevel {
    pub tlas: wgpu::Tlas,
    pub instance_count: u32,
}

fn precondition(msg: impl Into<String>) -> RendererError {
    RendererError::AccelPrecondition(msg.into())
}

/// Checks the slices before anything is handed to the device.
///
/// The shared buffers must be fully populated: the descriptors have to tile
/// `vertex_total` and `index_total` exactly, and every slice must hold whole
/// triangles.
pub fn validate_geometry(
    descs: &[GeometryDesc],
    vertex_total: u64,
    index_total: u64,
) -> Result<()> {
    if descs.is_empty() {
        return Err(precondition("zero geometry count"));
    }

    let mut vertex_end = 0u64;
    let mut index_end = 0u64;
    for (i, d) in descs.iter().enumerate() {
        if d.vertex_count == 0 {
            return Err(precondition(format!("geometry {i} has no vertices")));
        }
        if d.index_count == 0 || d.index_count % 3 != 0 {
            return Err(precondition(format!(
                "geometry {i} has {} indices, expected a non-empty triangle list",
                d.index_count
            )));
        }
        if d.vertex_offset as u64 != vertex_end || d.index_offset as u64 != index_end {
            return Err(precondition(format!(
                "geometry {i} does not start where geometry {} ends",
                i.saturating_sub(1)
            )));
        }
        vertex_end += d.vertex_count as u64;
        index_end += d.index_count as u64;
    }

    if vertex_end != vertex_total || index_end != index_total {
        return Err(precondition(format!(
            "geometries cover {vertex_end}/{vertex_total} vertices and {index_end}/{index_total} indices"
        )));
    }
    Ok(())
}

fn require_blas_input(buffer: &GpuBuffer) -> Result<()> {
    if buffer.buffer.usage().contains(wgpu::BufferUsages::BLAS_INPUT) {
        Ok(())
    } else {
        Err(precondition(format!(
            "buffer `{}` was not created as acceleration structure input",
            buffer.label()
        )))
    }
}

/// Builds one bottom-level structure holding a triangle geometry per slice
/// of the shared vertex/index buffers, and waits for the build.
pub fn build_bottom_level(
    resources: &mut ResourceManager<'_>,
    descs: &[GeometryDesc],
    vertices: &GpuBuffer,
    indices: &GpuBuffer,
) -> Result<BottomLevel> {
    let vertex_total = vertices.len() / VERTEX_STRIDE;
    let index_total = indices.len() / std::mem::size_of::<Index>() as u64;
    validate_geometry(descs, vertex_total, index_total)?;
    require_blas_input(vertices)?;
    require_blas_input(indices)?;

    let sizes: Vec<wgpu::BlasTriangleGeometrySizeDescriptor> = descs
        .iter()
        .map(|d| wgpu::BlasTriangleGeometrySizeDescriptor {
            vertex_format: wgpu::VertexFormat::Float32x3,
            vertex_count: d.vertex_count,
            index_format: Some(wgpu::IndexFormat::Uint32),
            index_count: Some(d.index_count),
            // no any-hit work
            flags: wgpu::AccelerationStructureGeometryFlags::OPAQUE,
        })
        .collect();

    let blas = resources.context().device.create_blas(
        &wgpu::CreateBlasDescriptor {
            label: Some("scene BLAS"),
            flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
            update_mode: wgpu::AccelerationStructureUpdateMode::Build,
        },
        wgpu::BlasGeometrySizeDescriptors::Triangles {
            descriptors: sizes.clone(),
        },
    );

    let geometries: Vec<wgpu::BlasTriangleGeometry> = descs
        .iter()
        .zip(&sizes)
        .map(|(d, size)| wgpu::BlasTriangleGeometry {
            size,
            vertex_buffer: &vertices.buffer,
            first_vertex: d.vertex_offset,
            vertex_stride: VERTEX_STRIDE,
            index_buffer: Some(&indices.buffer),
            first_index: Some(d.index_offset),
            transform_buffer: None,
            transform_buffer_offset: None,
        })
        .collect();

    resources.begin()?.build_acceleration_structures(
        std::iter::once(&wgpu::BlasBuildEntry {
            blas: &blas,
            geometry: wgpu::BlasGeometries::TriangleGeometries(geometries),
        }),
        None,
    );
    // scratch memory is released by wgpu once this submission retires
    resources.submit_and_wait()?;

    log::debug!(
        "built BLAS: {} geometries, {vertex_total} vertices, {index_total} indices",
        descs.len()
    );
    Ok(BottomLevel {
        blas,
        geometry_count: descs.len() as u32,
    })
}

/// Builds the top-level structure traced by the frame dispatch.
pub fn build_top_level(
    resources: &mut ResourceManager<'_>,
    bottom_levels: &[&BottomLevel],
    instances: &[InstanceDesc],
) -> Result<TopLevel> {
    if instances.is_empty() {
        return Err(precondition("zero instance count"));
    }
    for (i, inst) in instances.iter().enumerate() {
        if inst.bottom_level >= bottom_levels.len() {
            return Err(precondition(format!(
                "instance {i} references bottom level {} of {}",
                inst.bottom_level,
                bottom_levels.len()
            )));
        }
        if inst.custom_index >= 1 << 24 {
            return Err(precondition(format!(
                "instance {i} custom index {} exceeds 24 bits",
                inst.custom_index
            )));
        }
    }

    let mut tlas = resources
        .context()
        .device
        .create_tlas(&wgpu::CreateTlasDescriptor {
            label: Some("scene TLAS"),
            max_instances: instances.len() as u32,
            flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
            update_mode: wgpu::AccelerationStructureUpdateMode::Build,
        });

    for (i, inst) in instances.iter().enumerate() {
        tlas[i] = Some(wgpu::TlasInstance::new(
            &bottom_levels[inst.bottom_level].blas,
            inst.transform,
            inst.custom_index,
            inst.mask,
        ));
    }

    resources
        .begin()?
        .build_acceleration_structures(None, Some(&tlas));
    resources.submit_and_wait()?;

    log::debug!("built TLAS: {} instances", instances.len());
    Ok(TopLevel {
        tlas,
        instance_count: instances.len() as u32,
    })
}
