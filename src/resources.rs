use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::commands::CommandList;
use crate::error::{RendererError, Result};
use crate::fence::{CancelToken, Fence};
use crate::wgpu_ctx::GpuContext;
use crate::wgpu_utils::{align_to, depad_rows, get_padded_bytes_per_row, pad_rows};

/// Usage state of a renderer-owned texture.
///
/// wgpu inserts the actual barriers; tracking the state here keeps every
/// transition of the frame explicit and catches out-of-order ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Common,
    CopySource,
    CopyDest,
    UnorderedAccess,
    ShaderResource,
    Present,
}

/// Checked state transition for a resource the manager did not create, such
/// as a swap-chain image.
pub fn track(
    label: &str,
    state: &mut ResourceState,
    from: ResourceState,
    to: ResourceState,
) -> Result<()> {
    if *state != from {
        return Err(RendererError::ResourceState {
            label: label.to_owned(),
            tracked: *state,
            from,
            to,
        });
    }
    log::trace!("{label}: {from:?} -> {to:?}");
    *state = to;
    Ok(())
}

/// Buffer created through the resource manager.
pub struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    label: String,
    /// Payload size; the allocation may be padded past it.
    len: u64,
}

impl GpuBuffer {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn as_entire_binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    label: String,
    state: ResourceState,
}

impl GpuTexture {
    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Moves the tracked state from `from` to `to`.
    pub fn transition(&mut self, from: ResourceState, to: ResourceState) -> Result<()> {
        track(&self.label, &mut self.state, from, to)
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// Texture contents copied back to the CPU, rows still padded.
pub struct TextureReadback {
    pub width: u32,
    pub height: u32,
    pub padded_bytes_per_row: u32,
    pub data: Vec<u8>,
}

impl TextureReadback {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y * self.padded_bytes_per_row + x * 4) as usize;
        let px = self.data.get(at..at + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Tightly packed rows.
    pub fn to_packed(&self) -> Vec<u8> {
        depad_rows(
            &self.data,
            (self.width * 4) as usize,
            self.padded_bytes_per_row as usize,
            self.height as usize,
        )
    }
}

/// Creates and fills GPU buffers and textures.
///
/// Uploads that need a copy on the queue go through the backend's single
/// command list and block on the fence before returning, so they belong to
/// initialization only.
pub struct ResourceManager<'a> {
    ctx: &'a GpuContext,
    commands: &'a mut CommandList,
    fence: &'a mut Fence,
    cancel: CancelToken,
}

impl<'a> ResourceManager<'a> {
    pub fn new(
        ctx: &'a GpuContext,
        commands: &'a mut CommandList,
        fence: &'a mut Fence,
        cancel: CancelToken,
    ) -> Self {
        Self {
            ctx,
            commands,
            fence,
            cancel,
        }
    }

    pub fn context(&self) -> &GpuContext {
        self.ctx
    }

    /// Creates a buffer mapped at creation, copies `data` in and unmaps it.
    ///
    /// The allocation is padded to `COPY_BUFFER_ALIGNMENT` and is never
    /// zero-sized, so empty slices still produce a bindable buffer.
    pub fn upload_buffer<T: bytemuck::Pod>(
        &self,
        label: &str,
        data: &[T],
        usage: wgpu::BufferUsages,
    ) -> GpuBuffer {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = align_to(bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT)
            .max(wgpu::COPY_BUFFER_ALIGNMENT);

        let buffer = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: usage | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        let mut contents = bytes.to_vec();
        contents.resize(size as usize, 0);
        buffer.slice(..).get_mapped_range_mut().copy_from_slice(&contents);
        buffer.unmap();

        log::debug!("uploaded buffer `{label}`: {} bytes", bytes.len());
        GpuBuffer {
            buffer,
            label: label.to_owned(),
            len: bytes.len() as u64,
        }
    }

    /// Uniform buffer rewritten through [`write_buffer`].
    pub fn create_uniform<T: bytemuck::Pod>(&self, label: &str, value: &T) -> GpuBuffer {
        self.upload_buffer(
            label,
            std::slice::from_ref(value),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )
    }

    /// Uploads RGBA8 pixels into a sampled texture.
    ///
    /// Rows are copied one by one into a staging buffer whose pitch is
    /// padded to the device copy alignment, then copied on the queue. Blocks
    /// until the copy has completed.
    pub fn upload_texture(
        &mut self,
        label: &str,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<GpuTexture> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RendererError::TextureSize {
                label: label.to_owned(),
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        let format = wgpu::TextureFormat::Rgba8Unorm;
        let mut texture = self.create_texture(
            label,
            width,
            height,
            format,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            ResourceState::CopyDest,
        );

        let unpadded = (width * 4) as usize;
        let padded_bytes_per_row = get_padded_bytes_per_row(width, 4);
        let staging = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture staging"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        let mut rows = vec![0u8; padded_bytes_per_row as usize * height as usize];
        pad_rows(pixels, &mut rows, unpadded, padded_bytes_per_row as usize);
        staging.slice(..).get_mapped_range_mut().copy_from_slice(&rows);
        staging.unmap();

        self.commands.reset(&self.ctx.device, &*self.fence)?;
        self.commands.encoder()?.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            texture.texture.as_image_copy(),
            texture.extent(),
        );
        texture.transition(ResourceState::CopyDest, ResourceState::ShaderResource)?;
        self.submit_and_wait()?;

        log::debug!(
            "uploaded texture `{label}`: {width}x{height}, pitch {padded_bytes_per_row}"
        );
        Ok(texture)
    }

    /// Closes the open recording, submits it and blocks on the fence.
    pub fn submit_and_wait(&mut self) -> Result<u64> {
        self.commands.close()?;
        self.commands.execute(&self.ctx.queue)?;
        let value = self.fence.signal(&self.ctx.queue);
        self.fence.wait(&self.ctx.device, value, &self.cancel)?;
        Ok(value)
    }

    /// Starts a recording on the backend command list.
    pub fn begin(&mut self) -> Result<&mut wgpu::CommandEncoder> {
        self.commands.reset(&self.ctx.device, &*self.fence)?;
        self.commands.encoder()
    }

    pub fn create_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        initial: ResourceState,
    ) -> GpuTexture {
        let texture = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            width,
            height,
            format,
            label: label.to_owned(),
            state: initial,
        }
    }

    /// Copies a buffer back to the CPU.
    pub fn read_buffer(&mut self, src: &GpuBuffer) -> Result<Vec<u8>> {
        let size = align_to(src.len.max(1), wgpu::COPY_BUFFER_ALIGNMENT);
        let staging = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("buffer readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.begin()?
            .copy_buffer_to_buffer(&src.buffer, 0, &staging, 0, size);
        self.submit_and_wait()?;

        let mut data = map_read(&self.ctx.device, &staging, &src.label, &*self.fence, &self.cancel)?;
        data.truncate(src.len as usize);
        Ok(data)
    }

    /// Copies a 4-byte-per-texel texture back to the CPU. The texture's
    /// tracked state is restored afterwards.
    pub fn read_texture(&mut self, src: &mut GpuTexture) -> Result<TextureReadback> {
        let padded_bytes_per_row = get_padded_bytes_per_row(src.width, 4);
        let staging = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture readback"),
            size: padded_bytes_per_row as u64 * src.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let previous = src.state();
        src.transition(previous, ResourceState::CopySource)?;
        let extent = src.extent();
        let height = src.height;
        self.begin()?.copy_texture_to_buffer(
            src.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent,
        );
        src.transition(ResourceState::CopySource, previous)?;
        self.submit_and_wait()?;

        let data = map_read(&self.ctx.device, &staging, &src.label, &*self.fence, &self.cancel)?;
        Ok(TextureReadback {
            width: src.width,
            height: src.height,
            padded_bytes_per_row,
            data,
        })
    }

    pub fn read_texture_pixel(&mut self, src: &mut GpuTexture, x: u32, y: u32) -> Result<[u8; 4]> {
        let readback = self.read_texture(src)?;
        readback.pixel(x, y).ok_or_else(|| RendererError::TextureSize {
            label: src.label.clone(),
            width: src.width,
            height: src.height,
            expected: (y as usize * src.width as usize + x as usize) * 4 + 4,
            actual: readback.data.len(),
        })
    }
}

/// Rewrites an existing buffer through the queue. Callers only do this
/// between a completed fence wait and the next dispatch.
pub fn write_buffer<T: bytemuck::Pod>(queue: &wgpu::Queue, dst: &GpuBuffer, data: &[T]) {
    queue.write_buffer(&dst.buffer, 0, bytemuck::cast_slice(data));
}

/// Maps a `MAP_READ` buffer whose copy has already been fenced. The map is
/// bounded by the fence's timeout and honours `cancel`.
pub fn map_read(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    label: &str,
    fence: &Fence,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    let mapped = await_map(&rx, label, fence.timeout(), fence.poll_interval(), cancel, || {
        device.poll(wgpu::PollType::Poll)?;
        Ok(())
    })?;
    if let Err(source) = mapped {
        return Err(RendererError::BufferMap {
            label: label.to_owned(),
            source,
        });
    }

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(data)
}

fn await_map<T>(
    rx: &mpsc::Receiver<T>,
    label: &str,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancelToken,
    mut poll: impl FnMut() -> Result<()>,
) -> Result<T> {
    let start = Instant::now();
    loop {
        poll()?;
        match rx.recv_timeout(poll_interval) {
            Ok(value) => return Ok(value),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RendererError::MapCallbackDropped(label.to_owned()));
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if cancel.is_cancelled() {
            return Err(RendererError::MapCancelled(label.to_owned()));
        }
        if start.elapsed() >= timeout {
            log::error!("mapping `{label}` timed out after {timeout:?}");
            return Err(RendererError::MapTimeout {
                label: label.to_owned(),
                timeout,
            });
        }
    }
}
