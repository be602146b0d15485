//! Minimal real-time renderer on a hardware ray-tracing backend.
//!
//! Start-up goes [`wgpu_ctx::GpuContext`] → [`renderer::Renderer`] (command
//! list, fence, geometry, acceleration structures, pipeline, shader table,
//! descriptor heap) → [`frame::FrameDispatcher`], which then renders one
//! frame per call and blocks on the fence until the GPU has finished it.

pub mod accel;
pub mod binding;
pub mod camera;
pub mod capture;
pub mod commands;
pub mod config;
pub mod error;
pub mod fence;
pub mod frame;
pub mod geometry;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod wgpu_ctx;
pub mod wgpu_utils;

pub use config::RendererConfig;
pub use error::{RendererError, Result};
pub use frame::{FrameDispatcher, FrameStatus};
pub use renderer::Renderer;
pub use scene::{SceneConfig, SceneInput, SceneState};
pub use wgpu_ctx::GpuContext;
