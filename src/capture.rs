use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use rayon::prelude::*;

use crate::error::{RendererError, Result};
use crate::resources::TextureReadback;

/// Strips row padding and reorders channels to RGBA with opaque alpha.
pub fn to_rgba(readback: &TextureReadback, format: wgpu::TextureFormat) -> Vec<u8> {
    let unpadded = (readback.width * 4) as usize;
    let padded = readback.padded_bytes_per_row as usize;
    let bgra = matches!(
        format,
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
    );

    let mut rgba = vec![0u8; unpadded * readback.height as usize];
    rgba.par_chunks_mut(unpadded)
        .zip(readback.data.par_chunks(padded))
        .for_each(|(dst_row, src_row)| {
            for (dst, src) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                if bgra {
                    dst[0] = src[2];
                    dst[1] = src[1];
                    dst[2] = src[0];
                } else {
                    dst[..3].copy_from_slice(&src[..3]);
                }
                dst[3] = 255;
            }
        });
    rgba
}

/// Encodes the frame as `frame_<timestamp>.png` inside `dir`, creating the
/// directory if needed.
pub fn save_png(
    readback: &TextureReadback,
    format: wgpu::TextureFormat,
    dir: &Path,
) -> Result<PathBuf> {
    let started = chrono::Local::now();
    let path = dir.join(format!(
        "frame_{}.png",
        started.format("%Y-%m-%d_%H-%M-%S%.3f")
    ));
    let fail = |reason: String| RendererError::Capture {
        path: path.clone(),
        reason,
    };

    std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    let rgba = to_rgba(readback, format);

    let file = File::create(&path).map_err(|e| fail(e.to_string()))?;
    let encoder = PngEncoder::new_with_quality(
        BufWriter::new(file),
        CompressionType::Fast,
        FilterType::NoFilter,
    );
    encoder
        .write_image(
            &rgba,
            readback.width,
            readback.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| fail(e.to_string()))?;

    log::info!(
        "saved capture {} ({}ms)",
        path.display(),
        (chrono::Local::now() - started).num_milliseconds()
    );
    Ok(path)
}
