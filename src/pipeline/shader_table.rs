use crate::error::{RendererError, Result};
use crate::resources::{GpuBuffer, ResourceManager};
use crate::wgpu_utils::align_to;

use super::state_object::{RAYGEN_EXPORT, RayType, ShaderIdentifier, StateObjectDesc};

pub const SHADER_IDENTIFIER_SIZE: u64 = ShaderIdentifier::SIZE as u64;
/// Every record stride is a multiple of this.
pub const SHADER_RECORD_ALIGNMENT: u64 = 32;
/// Minimum placement of each table section.
pub const SHADER_TABLE_ALIGNMENT: u64 = 64;
/// Dispatch description at the start of the buffer, in 32-bit words.
pub const HEADER_WORDS: u64 = 16;

/// Byte layout of the ray generation, miss and hit-group tables inside one
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub section_alignment: u64,
    pub raygen_offset: u64,
    pub raygen_stride: u64,
    pub miss_offset: u64,
    pub miss_stride: u64,
    pub miss_count: u32,
    pub hit_offset: u64,
    pub hit_stride: u64,
    pub hit_count: u32,
    pub ray_type_count: u32,
    pub total_size: u64,
}

impl TableLayout {
    /// `geometry_count` hit records per ray type, each carrying
    /// `local_payload_bytes` of inline constants after its identifier.
    pub fn new(
        ray_type_count: u32,
        geometry_count: u32,
        local_payload_bytes: u64,
        min_section_alignment: u64,
    ) -> Result<Self> {
        if ray_type_count == 0 {
            return Err(RendererError::ShaderTable("zero ray types".to_owned()));
        }
        if local_payload_bytes % 4 != 0 {
            return Err(RendererError::ShaderTable(format!(
                "local payload of {local_payload_bytes} bytes is not whole words"
            )));
        }

        let section_alignment = SHADER_TABLE_ALIGNMENT.max(min_section_alignment);
        let id_stride = align_to(SHADER_IDENTIFIER_SIZE, SHADER_RECORD_ALIGNMENT);
        let hit_stride = align_to(
            SHADER_IDENTIFIER_SIZE + local_payload_bytes,
            SHADER_RECORD_ALIGNMENT,
        );

        let miss_count = ray_type_count;
        let hit_count = geometry_count
            .checked_mul(ray_type_count)
            .ok_or_else(|| RendererError::ShaderTable("hit record count overflows".to_owned()))?;

        let raygen_offset = align_to(HEADER_WORDS * 4, section_alignment);
        let miss_offset = align_to(raygen_offset + id_stride, section_alignment);
        let hit_offset = align_to(
            miss_offset + id_stride * miss_count as u64,
            section_alignment,
        );
        let end = hit_offset + hit_stride * hit_count as u64;
        let total_size = align_to(end, SHADER_RECORD_ALIGNMENT);

        Ok(Self {
            section_alignment,
            raygen_offset,
            raygen_stride: id_stride,
            miss_offset,
            miss_stride: id_stride,
            miss_count,
            hit_offset,
            hit_stride,
            hit_count,
            ray_type_count,
            total_size,
        })
    }

    /// Hit record for `geometry` traced with `ray`.
    pub fn hit_record_offset(&self, geometry: u32, ray: u32) -> u64 {
        self.hit_offset + (geometry * self.ray_type_count + ray) as u64 * self.hit_stride
    }

    pub fn miss_record_offset(&self, ray: u32) -> u64 {
        self.miss_offset + ray as u64 * self.miss_stride
    }

    fn header(&self) -> [u32; HEADER_WORDS as usize] {
        let mut words = [0u32; HEADER_WORDS as usize];
        words[0] = (self.raygen_offset / 4) as u32;
        words[1] = (self.raygen_stride / 4) as u32;
        words[2] = (self.miss_offset / 4) as u32;
        words[3] = (self.miss_stride / 4) as u32;
        words[4] = self.miss_count;
        words[5] = (self.hit_offset / 4) as u32;
        words[6] = (self.hit_stride / 4) as u32;
        words[7] = self.hit_count;
        words[8] = self.ray_type_count;
        words
    }
}

/// Serializes shader records into the byte image of the table.
pub struct ShaderTableWriter {
    layout: TableLayout,
    bytes: Vec<u8>,
}

impl ShaderTableWriter {
    pub fn new(layout: TableLayout) -> Self {
        let mut bytes = vec![0u8; layout.total_size as usize];
        bytes[..(HEADER_WORDS * 4) as usize].copy_from_slice(bytemuck::cast_slice(&layout.header()));
        Self { layout, bytes }
    }

    fn write(&mut self, offset: u64, stride: u64, id: &ShaderIdentifier, local: &[u8]) -> Result<()> {
        if SHADER_IDENTIFIER_SIZE + local.len() as u64 > stride {
            return Err(RendererError::ShaderTable(format!(
                "record of {} bytes exceeds stride {stride}",
                SHADER_IDENTIFIER_SIZE + local.len() as u64
            )));
        }
        let start = offset as usize;
        let id_end = start + ShaderIdentifier::SIZE;
        self.bytes[start..id_end].copy_from_slice(id.as_bytes());
        self.bytes[id_end..id_end + local.len()].copy_from_slice(local);
        Ok(())
    }

    pub fn raygen(&mut self, id: &ShaderIdentifier) -> Result<()> {
        let (offset, stride) = (self.layout.raygen_offset, self.layout.raygen_stride);
        self.write(offset, stride, id, &[])
    }

    pub fn miss(&mut self, ray: u32, id: &ShaderIdentifier) -> Result<()> {
        if ray >= self.layout.miss_count {
            return Err(RendererError::ShaderTable(format!("miss record {ray} out of range")));
        }
        let offset = self.layout.miss_record_offset(ray);
        self.write(offset, self.layout.miss_stride, id, &[])
    }

    pub fn hit_group(
        &mut self,
        geometry: u32,
        ray: u32,
        id: &ShaderIdentifier,
        local: &[u8],
    ) -> Result<()> {
        if ray >= self.layout.ray_type_count
            || geometry * self.layout.ray_type_count + ray >= self.layout.hit_count
        {
            return Err(RendererError::ShaderTable(format!(
                "hit record ({geometry}, {ray}) out of range"
            )));
        }
        let offset = self.layout.hit_record_offset(geometry, ray);
        self.write(offset, self.layout.hit_stride, id, local)
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// GPU-resident shader table.
pub struct ShaderTable {
    pub buffer: GpuBuffer,
    pub layout: TableLayout,
}

impl ShaderTable {
    /// Writes the ray generation record, one miss record per ray type and,
    /// for every geometry, one hit record per ray type carrying that
    /// geometry's local constants.
    pub fn build<T: bytemuck::Pod>(
        resources: &ResourceManager<'_>,
        desc: &StateObjectDesc,
        local_constants: &[T],
    ) -> Result<Self> {
        let payload = desc.association.local.payload_bytes();
        if (std::mem::size_of::<T>() as u64) > payload {
            return Err(RendererError::ShaderTable(format!(
                "local constants of {} bytes exceed the local root signature ({payload} bytes)",
                std::mem::size_of::<T>()
            )));
        }

        let layout = TableLayout::new(
            RayType::COUNT,
            local_constants.len() as u32,
            payload,
            resources.context().descriptor_increment() as u64,
        )?;

        let lookup = |export: &str| {
            desc.identifier(export).ok_or_else(|| {
                RendererError::ShaderTable(format!("no identifier for export `{export}`"))
            })
        };

        let mut writer = ShaderTableWriter::new(layout);
        writer.raygen(&lookup(RAYGEN_EXPORT)?)?;
        for ray in RayType::ALL {
            writer.miss(ray as u32, &lookup(ray.miss_export())?)?;
        }
        for (geometry, constants) in local_constants.iter().enumerate() {
            for ray in RayType::ALL {
                writer.hit_group(
                    geometry as u32,
                    ray as u32,
                    &lookup(ray.hit_group_export())?,
                    bytemuck::bytes_of(constants),
                )?;
            }
        }

        let bytes = writer.finish();
        let buffer = resources.upload_buffer("shader table", &bytes, wgpu::BufferUsages::STORAGE);
        log::debug!(
            "shader table: {} bytes, hit stride {}, {} hit records",
            layout.total_size,
            layout.hit_stride,
            layout.hit_count
        );
        Ok(Self { buffer, layout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::root_signature::LocalRootSignature;

    #[test]
    fn strides_and_sections_are_aligned_for_any_shape() {
        for ray_types in 1..=4u32 {
            for payload_words in 0..=20u64 {
                for geometries in [0u32, 1, 2, 6, 17] {
                    for min_align in [0u64, 64, 256] {
                        let l = TableLayout::new(ray_types, geometries, payload_words * 4, min_align)
                            .unwrap();
                        assert_eq!(l.raygen_stride % SHADER_RECORD_ALIGNMENT, 0);
                        assert_eq!(l.miss_stride % SHADER_RECORD_ALIGNMENT, 0);
                        assert_eq!(l.hit_stride % SHADER_RECORD_ALIGNMENT, 0);
                        assert!(l.hit_stride >= SHADER_IDENTIFIER_SIZE + payload_words * 4);
                        for offset in [l.raygen_offset, l.miss_offset, l.hit_offset] {
                            assert_eq!(offset % l.section_alignment, 0);
                        }
                        assert_eq!(l.total_size % SHADER_RECORD_ALIGNMENT, 0);
                        assert_eq!(l.miss_count, ray_types);
                        assert_eq!(l.hit_count, geometries * ray_types);
                        assert!(l.total_size >= l.hit_offset + l.hit_stride * l.hit_count as u64);
                    }
                }
            }
        }
    }

    #[test]
    fn sections_do_not_overlap() {
        let l = TableLayout::new(2, 6, 16, 0).unwrap();
        assert!(l.raygen_offset >= HEADER_WORDS * 4);
        assert!(l.miss_offset >= l.raygen_offset + l.raygen_stride);
        assert!(l.hit_offset >= l.miss_offset + l.miss_stride * 2);
        assert_eq!(l.hit_stride, 64);
    }

    #[test]
    fn odd_payload_is_rejected() {
        assert!(TableLayout::new(2, 1, 6, 0).is_err());
        assert!(TableLayout::new(0, 1, 4, 0).is_err());
    }

    #[test]
    fn records_land_at_their_offsets() {
        let desc = StateObjectDesc::standard(10, LocalRootSignature::for_bytes(16));
        let layout = TableLayout::new(2, 3, 16, 0).unwrap();
        let mut w = ShaderTableWriter::new(layout);
        let hit = desc.identifier("hit_group_shadow").unwrap();
        let albedo: [f32; 4] = [0.25, 0.5, 0.75, 1.0];
        w.raygen(&desc.identifier(RAYGEN_EXPORT).unwrap()).unwrap();
        w.hit_group(2, 1, &hit, bytemuck::bytes_of(&albedo)).unwrap();
        let bytes = w.finish();

        let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word(0) as u64 * 4, layout.raygen_offset);
        assert_eq!(word(6) as u64 * 4, layout.hit_stride);

        let at = layout.hit_record_offset(2, 1) as usize;
        assert_eq!(&bytes[at..at + 32], hit.as_bytes());
        assert_eq!(&bytes[at + 32..at + 48], bytemuck::bytes_of(&albedo));

        // untouched record keeps a null identifier
        let other = layout.hit_record_offset(0, 0) as usize;
        assert!(bytes[other..other + 32].iter().all(|b| *b == 0));
    }

    #[test]
    fn out_of_range_and_oversized_records_fail() {
        let desc = StateObjectDesc::standard(10, LocalRootSignature::for_bytes(16));
        let id = desc.identifier("hit_group_radiance").unwrap();
        let layout = TableLayout::new(2, 1, 16, 0).unwrap();
        let mut w = ShaderTableWriter::new(layout);
        assert!(w.hit_group(1, 0, &id, &[0; 16]).is_err());
        assert!(w.hit_group(0, 2, &id, &[0; 16]).is_err());
        assert!(w.hit_group(0, 0, &id, &[0; 40]).is_err());
        assert!(w.miss(2, &id).is_err());
    }
}
