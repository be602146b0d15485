use std::mem::size_of;

// Vertex layout shared with the shader (52 bytes, read as 13 floats)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 4], // w = 1
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

pub const VERTEX_STRIDE: u64 = size_of::<Vertex>() as u64;

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position: [position[0], position[1], position[2], 1.0],
            normal,
            uv,
            color: [1.0; 4],
        }
    }
}

pub type Index = u32;

/// Slice of one mesh inside the shared vertex/index buffers.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GeometryDesc {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub material_index: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Material {
    pub emission: [f32; 4], // rgb + ior
    pub kd: [f32; 3],
    pub ks: [f32; 3],
    pub specular_exponent: f32,
}

impl Material {
    pub fn diffuse(kd: [f32; 3]) -> Self {
        Self {
            emission: [0.0; 4],
            kd,
            ks: [0.1; 3],
            specular_exponent: 50.0,
        }
    }

    pub fn emissive(mut self, emission: [f32; 3], ior: f32) -> Self {
        self.emission = [emission[0], emission[1], emission[2], ior];
        self
    }
}

/// Inline payload of a hit-group record.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceConstants {
    pub albedo: [f32; 4],
}

impl InstanceConstants {
    pub const WHITE: InstanceConstants = InstanceConstants { albedo: [1.0; 4] };
}

/// CPU-side triangle list as produced by the loaders.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
    pub material: u32,
}

impl Mesh {
    /// Paints every vertex with a flat color.
    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        for v in &mut self.vertices {
            v.color = color;
        }
        self
    }

    pub fn with_material(mut self, material: u32) -> Self {
        self.material = material;
        self
    }

    /// Single triangle facing -Z, in front of a camera at the origin.
    pub fn triangle(z: f32) -> Self {
        let n = [0.0, 0.0, -1.0];
        Self {
            vertices: vec![
                Vertex::new([-1.0, -1.0, z], n, [0.0, 1.0]),
                Vertex::new([0.0, 1.0, z], n, [0.5, 0.0]),
                Vertex::new([1.0, -1.0, z], n, [1.0, 1.0]),
            ],
            indices: vec![0, 1, 2],
            material: 0,
        }
    }

    /// Mean vertex position.
    pub fn centroid(&self) -> [f32; 3] {
        if self.vertices.is_empty() {
            return [0.0; 3];
        }
        let mut sum = [0.0f32; 3];
        for v in &self.vertices {
            sum[0] += v.position[0];
            sum[1] += v.position[1];
            sum[2] += v.position[2];
        }
        let n = self.vertices.len() as f32;
        [sum[0] / n, sum[1] / n, sum[2] / n]
    }
}

/// All meshes concatenated into one vertex and one index stream.
///
/// Indices stay local to their mesh; `vertex_offset` is applied by the
/// acceleration structure build and by the shader when fetching attributes.
#[derive(Clone, Debug, Default)]
pub struct CombinedMeshes {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
    pub descs: Vec<GeometryDesc>,
}

impl CombinedMeshes {
    pub fn from_meshes(meshes: &[Mesh]) -> Self {
        let mut combined = Self {
            vertices: Vec::with_capacity(meshes.iter().map(|m| m.vertices.len()).sum()),
            indices: Vec::with_capacity(meshes.iter().map(|m| m.indices.len()).sum()),
            descs: Vec::with_capacity(meshes.len()),
        };
        for mesh in meshes {
            combined.push(mesh);
        }
        combined
    }

    pub fn push(&mut self, mesh: &Mesh) -> u32 {
        let id = self.descs.len() as u32;
        self.descs.push(GeometryDesc {
            vertex_offset: self.vertices.len() as u32,
            vertex_count: mesh.vertices.len() as u32,
            index_offset: self.indices.len() as u32,
            index_count: mesh.indices.len() as u32,
            material_index: mesh.material,
        });
        self.vertices.extend_from_slice(&mesh.vertices);
        self.indices.extend_from_slice(&mesh.indices);
        id
    }

    /// True when the descriptors tile both buffers exactly, in order.
    pub fn is_partition(&self) -> bool {
        let mut v = 0u32;
        let mut i = 0u32;
        for d in &self.descs {
            if d.vertex_offset != v || d.index_offset != i {
                return false;
            }
            v += d.vertex_count;
            i += d.index_count;
        }
        v as usize == self.vertices.len() && i as usize == self.indices.len()
    }
}
