use std::path::{Path, PathBuf};

use crate::capture;
use crate::error::{RendererError, Result};
use crate::fence::CancelToken;
use crate::renderer::Renderer;
use crate::resources::{self, GpuTexture, ResourceManager, ResourceState, TextureReadback};
use crate::scene::SceneState;

/// Threads per workgroup along x and y in the ray generation entry point.
pub const WORKGROUP_SIZE: u32 = 8;

/// Response to a failed back buffer acquisition.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Surface was reconfigured; rendering resumes next frame.
    Reconfigured,
    /// Transient; skip this frame.
    SkipFrame,
    Fatal,
}

/// Outcome of one [`FrameDispatcher::render_frame`] call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameStatus {
    /// The frame was dispatched, presented and its fence value reached.
    Presented { fence_value: u64 },
    /// Nothing was submitted.
    Skipped,
}

/// Back buffer of the frame being recorded.
enum BackBuffer {
    Surface(wgpu::SurfaceTexture),
    Offscreen,
}

/// Drives the per-frame sequence: acquire, record, dispatch, copy, present
/// and wait. Owns the scene state fed to the shader.
///
/// Without a window surface frames land in an offscreen texture that plays
/// the back buffer's part.
pub struct FrameDispatcher {
    scene: SceneState,
    offscreen: Option<GpuTexture>,
    frames: u64,
    renderer: Renderer,
}

impl FrameDispatcher {
    pub fn new(mut renderer: Renderer, scene: SceneState) -> Self {
        let offscreen = if renderer.ctx.surface.is_none() {
            let (width, height) = renderer.target_size();
            Some(create_offscreen(&renderer.resources(), width, height))
        } else {
            None
        };
        Self {
            scene,
            offscreen,
            frames: 0,
            renderer,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn scene(&self) -> &SceneState {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneState {
        &mut self.scene
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.renderer.cancel_token()
    }

    /// Records and submits one frame, then blocks until the GPU has
    /// finished it. Command-list misuse, fence timeouts and cancellation are
    /// returned as errors; a lost or outdated surface is reconfigured and
    /// the frame skipped.
    pub fn render_frame(&mut self) -> Result<FrameStatus> {
        let (width, height) = self.renderer.target_size();
        if width == 0 || height == 0 {
            return Ok(FrameStatus::Skipped);
        }

        let backbuffer = match self.acquire()? {
            Some(b) => b,
            None => return Ok(FrameStatus::Skipped),
        };

        let r = &mut self.renderer;
        r.commands.reset(&r.ctx.device, &r.fence)?;
        resources::write_buffer(
            &r.ctx.queue,
            &r.scene_constants,
            &[self.scene.constants(width, height)],
        );

        let encoder = r.commands.encoder()?;

        r.ray_target
            .transition(ResourceState::CopySource, ResourceState::UnorderedAccess)?;
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("dispatch rays"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&r.pipeline.state_object.pipeline);
            r.heap.bind(&mut pass);
            pass.dispatch_workgroups(
                width.div_ceil(WORKGROUP_SIZE),
                height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        r.ray_target
            .transition(ResourceState::UnorderedAccess, ResourceState::CopySource)?;

        let mut surface_state = ResourceState::Present;
        let dst = match &backbuffer {
            BackBuffer::Surface(frame) => {
                resources::track(
                    "back buffer",
                    &mut surface_state,
                    ResourceState::Present,
                    ResourceState::CopyDest,
                )?;
                &frame.texture
            }
            BackBuffer::Offscreen => {
                let target = self.offscreen.as_mut().ok_or_else(|| {
                    RendererError::Binding("no offscreen back buffer".to_owned())
                })?;
                target.transition(ResourceState::Present, ResourceState::CopyDest)?;
                &target.texture
            }
        };
        encoder.copy_texture_to_texture(
            r.ray_target.texture.as_image_copy(),
            dst.as_image_copy(),
            r.ray_target.extent(),
        );
        match (&backbuffer, self.offscreen.as_mut()) {
            (BackBuffer::Offscreen, Some(target)) => {
                target.transition(ResourceState::CopyDest, ResourceState::Present)?
            }
            _ => resources::track(
                "back buffer",
                &mut surface_state,
                ResourceState::CopyDest,
                ResourceState::Present,
            )?,
        }

        r.commands.close()?;
        r.commands.execute(&r.ctx.queue)?;
        if let BackBuffer::Surface(frame) = backbuffer {
            frame.present();
        }

        let value = r.fence.signal(&r.ctx.queue);
        r.fence.wait(&r.ctx.device, value, &r.cancel)?;

        self.frames += 1;
        log::trace!("frame {} presented at fence {value}", self.frames);
        Ok(FrameStatus::Presented { fence_value: value })
    }

    fn acquire(&mut self) -> Result<Option<BackBuffer>> {
        let Some(state) = &self.renderer.ctx.surface else {
            return Ok(Some(BackBuffer::Offscreen));
        };
        match state.surface.get_current_texture() {
            Ok(frame) => Ok(Some(BackBuffer::Surface(frame))),
            Err(err) => match self.handle_surface_error(&err) {
                SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame => {
                    log::warn!("skipping frame: {err}");
                    Ok(None)
                }
                SurfaceErrorAction::Fatal => Err(RendererError::SurfaceAcquire(err)),
            },
        }
    }

    /// Reconfigures on `Lost`/`Outdated`; out of memory is fatal.
    pub fn handle_surface_error(&mut self, err: &wgpu::SurfaceError) -> SurfaceErrorAction {
        match err {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                self.renderer.ctx.reconfigure();
                SurfaceErrorAction::Reconfigured
            }
            wgpu::SurfaceError::OutOfMemory => SurfaceErrorAction::Fatal,
            wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other => SurfaceErrorAction::SkipFrame,
        }
    }

    /// Resizes the surface, ray target and offscreen back buffer.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        if !self.renderer.resize(width, height)? {
            return Ok(false);
        }
        if self.offscreen.is_some() {
            self.offscreen = Some(create_offscreen(&self.renderer.resources(), width, height));
        }
        Ok(true)
    }

    /// Copies the last presented image back to the CPU.
    pub fn read_frame(&mut self) -> Result<TextureReadback> {
        let r = &mut self.renderer;
        let mut resources =
            ResourceManager::new(&r.ctx, &mut r.commands, &mut r.fence, r.cancel.clone());
        match self.offscreen.as_mut() {
            Some(target) => resources.read_texture(target),
            // the ray target holds the same pixels as the swap-chain image
            None => resources.read_texture(&mut r.ray_target),
        }
    }

    /// Writes the last presented image as PNG into `dir`.
    pub fn capture(&mut self, dir: &Path) -> Result<PathBuf> {
        let format = self.renderer.ctx.target_format();
        let readback = self.read_frame()?;
        capture::save_png(&readback, format, dir)
    }
}

fn create_offscreen(resources: &ResourceManager<'_>, width: u32, height: u32) -> GpuTexture {
    resources.create_texture(
        "offscreen back buffer",
        width,
        height,
        resources.context().target_format(),
        wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
        ResourceState::Present,
    )
}
