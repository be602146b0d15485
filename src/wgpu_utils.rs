use rayon::prelude::*;

/// Rounds `value` up to the next multiple of `alignment` (a power of two or
/// any non-zero value).
pub fn align_to(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);
    value.div_ceil(alignment) * alignment
}

/// Row pitch of a buffer <-> texture copy. Device-side rows are padded to
/// `COPY_BYTES_PER_ROW_ALIGNMENT`, so the pitch may exceed `width * bpp`.
pub fn get_padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padding = (align - unpadded % align) % align;
    unpadded + padding
}

/// Copies tightly packed rows into a buffer laid out with `padded` pitch.
pub fn pad_rows(src: &[u8], dst: &mut [u8], unpadded: usize, padded: usize) {
    dst.par_chunks_mut(padded)
        .zip(src.par_chunks(unpadded))
        .for_each(|(dst_row, src_row)| dst_row[..unpadded].copy_from_slice(src_row));
}

/// Strips row padding from a device readback.
pub fn depad_rows(src: &[u8], unpadded: usize, padded: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; unpadded * height];
    out.par_chunks_mut(unpadded)
        .zip(src.par_chunks(padded))
        .for_each(|(dst_row, src_row)| dst_row.copy_from_slice(&src_row[..unpadded]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_pitch_is_aligned_and_minimal() {
        for width in [1u32, 3, 63, 64, 65, 100, 255, 256, 1023, 4096] {
            let pitch = get_padded_bytes_per_row(width, 4);
            assert_eq!(pitch % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);
            assert!(pitch >= width * 4);
            assert!(pitch - width * 4 < wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        }
        assert_eq!(get_padded_bytes_per_row(64, 4), 256);
        assert_eq!(get_padded_bytes_per_row(65, 4), 512);
    }

    #[test]
    fn pad_then_depad_restores_rows() {
        let (width, height) = (3usize, 5usize);
        let unpadded = width * 4;
        let padded = get_padded_bytes_per_row(width as u32, 4) as usize;
        let src: Vec<u8> = (0..unpadded * height).map(|i| i as u8).collect();

        let mut staged = vec![0xAA; padded * height];
        pad_rows(&src, &mut staged, unpadded, padded);
        assert_eq!(&staged[padded..padded + unpadded], &src[unpadded..2 * unpadded]);
        assert_eq!(staged[unpadded], 0xAA);

        assert_eq!(depad_rows(&staged, unpadded, padded, height), src);
    }

    #[test]
    fn align_to_rounds_up() {
        assert_eq!(align_to(0, 32), 0);
        assert_eq!(align_to(1, 32), 32);
        assert_eq!(align_to(48, 32), 64);
        assert_eq!(align_to(64, 64), 64);
        assert_eq!(align_to(10, 12), 12);
    }
}
