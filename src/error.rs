use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::resources::ResourceState;

/// Errors raised by the ray-tracing backend.
///
/// Construction-time variants abort start-up. Per-frame variants are fatal to
/// the frame loop except `SurfaceAcquire`, which the dispatcher may recover
/// from by reconfiguring the surface.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("no adapter with hardware ray query support was found")]
    NoRayTracingAdapter,

    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("failed to request device on {adapter}: {source}")]
    RequestDevice {
        adapter: String,
        #[source]
        source: wgpu::RequestDeviceError,
    },

    #[error("surface is not supported by adapter {0}")]
    SurfaceUnsupported(String),

    #[error("command list is {actual:?}, expected {expected:?} for `{op}`")]
    CommandListState {
        op: &'static str,
        expected: crate::commands::ListState,
        actual: crate::commands::ListState,
    },

    #[error("command list reset while the GPU is busy (completed {completed}, signaled {signaled})")]
    CommandListInFlight { completed: u64, signaled: u64 },

    #[error("fence wait for value {value} timed out after {timeout:?} (completed {completed})")]
    FenceTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },

    #[error("fence wait for value {value} was cancelled")]
    FenceCancelled { value: u64 },

    #[error("fence value {value} was never signaled (last signaled {signaled})")]
    FenceNotSignaled { value: u64, signaled: u64 },

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("failed to map buffer `{label}`: {source}")]
    BufferMap {
        label: String,
        #[source]
        source: wgpu::BufferAsyncError,
    },

    #[error("map callback for `{0}` was dropped before completing")]
    MapCallbackDropped(String),

    #[error("mapping `{label}` did not complete within {timeout:?}")]
    MapTimeout { label: String, timeout: Duration },

    #[error("mapping `{0}` was cancelled")]
    MapCancelled(String),

    #[error("invalid transition on `{label}`: tracked {tracked:?}, requested {from:?} -> {to:?}")]
    ResourceState {
        label: String,
        tracked: ResourceState,
        from: ResourceState,
        to: ResourceState,
    },

    #[error("texture `{label}` {width}x{height} expects {expected} bytes, got {actual}")]
    TextureSize {
        label: String,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("acceleration structure precondition failed: {0}")]
    AccelPrecondition(String),

    #[error("pipeline state object is invalid: {0}")]
    StateObject(String),

    #[error("shader table layout is invalid: {0}")]
    ShaderTable(String),

    #[error("binding table mismatch: {0}")]
    Binding(String),

    #[error("failed to load mesh {path}: {reason}")]
    MeshLoad { path: PathBuf, reason: String },

    #[error("failed to load texture {path}: {reason}")]
    TextureLoad { path: PathBuf, reason: String },

    #[error("failed to load shader {path}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to acquire back buffer: {0}")]
    SurfaceAcquire(wgpu::SurfaceError),

    #[error("failed to write capture {path}: {reason}")]
    Capture { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, RendererError>;
