use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use hwrt_renderer::frame::FrameStatus;
use hwrt_renderer::loader::{self, ResourceRoot};
use hwrt_renderer::logging::{LoggingConfig, init_logging};
use hwrt_renderer::{FrameDispatcher, GpuContext, Renderer, RendererConfig, SceneConfig, SceneInput};

#[derive(Parser, Debug)]
#[command(name = "hwrt-renderer", version, about = "Hardware ray-traced Cornell box")]
struct Args {
    /// Asset directory. Defaults to `Resource` two levels above the
    /// executable's directory.
    #[arg(long)]
    resource_root: Option<PathBuf>,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Render offscreen without a window and write the last frame as PNG.
    #[arg(long)]
    headless: bool,

    /// Frames to render in headless mode.
    #[arg(long, default_value_t = 1)]
    frames: u32,

    #[arg(long)]
    fence_timeout_ms: Option<u64>,

    /// Directory captures are written to. In a window, `P` captures.
    #[arg(long)]
    capture: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SceneChoice::CornellBox)]
    scene: SceneChoice,

    /// Shader library relative to the resource root, replacing the built-in one.
    #[arg(long)]
    shader: Option<PathBuf>,

    /// `env_logger` filter, e.g. `hwrt_renderer=debug`.
    #[arg(long)]
    log: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SceneChoice {
    CornellBox,
    /// A single triangle that needs no asset files.
    Triangle,
}

const DEFAULT_CAPTURE_DIR: &str = "output";

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LoggingConfig {
        env_filter: args.log.clone(),
        ..Default::default()
    });

    let root = args
        .resource_root
        .clone()
        .map(ResourceRoot::new)
        .or_else(ResourceRoot::beside_executable)
        .unwrap_or_else(|| ResourceRoot::new(RendererConfig::default().resource_root));

    let mut config = RendererConfig {
        offscreen_size: (args.width, args.height),
        resource_root: root.path().to_owned(),
        shader_path: args.shader.clone(),
        ..Default::default()
    };
    if let Some(ms) = args.fence_timeout_ms {
        config.fence_timeout = Duration::from_millis(ms);
    }
    log::info!("resource root: {}", root.path().display());

    // assets are read before any GPU object exists
    let input = match args.scene {
        SceneChoice::CornellBox => SceneConfig::cornell_box()
            .load(&root)
            .context("failed to load the scene")?,
        SceneChoice::Triangle => SceneInput::single_triangle(),
    };
    let shader_file = config.shader_path.as_ref().map(|p| root.resolve(p));
    let shader = loader::load_shader(shader_file.as_deref())
        .context("failed to load the shader library")?
        .into_owned();

    if args.headless {
        run_headless(&args, &config, &input, &shader)
    } else {
        run_windowed(args, config, input, shader)
    }
}

fn run_headless(args: &Args, config: &RendererConfig, input: &SceneInput, shader: &str) -> Result<()> {
    let ctx = pollster::block_on(GpuContext::headless(config)).context("GPU bring-up failed")?;
    let renderer = Renderer::new(ctx, config, input, shader).context("renderer bring-up failed")?;
    let mut dispatcher = FrameDispatcher::new(renderer, input.state);

    for _ in 0..args.frames.max(1) {
        dispatcher.render_frame().context("frame failed")?;
    }
    let dir = args
        .capture
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR));
    let path = dispatcher.capture(&dir).context("capture failed")?;
    println!("{}", path.display());
    Ok(())
}

fn run_windowed(args: Args, config: RendererConfig, input: SceneInput, shader: String) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        dispatcher: None,
        window: None,
        pending: Some((input, shader)),
        config,
        capture_dir: args
            .capture
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR)),
        size: PhysicalSize::new(args.width, args.height),
        error: None,
    };
    event_loop
        .run_app(&mut app)
        .context("event loop terminated with error")?;

    match app.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Field order drops the dispatcher, and with it the device, before the
/// window its surface points into.
struct App {
    dispatcher: Option<FrameDispatcher>,
    window: Option<Arc<Window>>,
    pending: Option<(SceneInput, String)>,
    config: RendererConfig,
    capture_dir: PathBuf,
    size: PhysicalSize<u32>,
    error: Option<anyhow::Error>,
}

impl App {
    fn start(&mut self, el: &ActiveEventLoop) -> Result<()> {
        let Some((input, shader)) = self.pending.take() else {
            return Ok(());
        };
        let window = Arc::new(
            el.create_window(
                Window::default_attributes()
                    .with_title("hwrt-renderer")
                    .with_inner_size(self.size),
            )
            .context("failed to create window")?,
        );

        let ctx = pollster::block_on(GpuContext::with_window(window.clone(), &self.config))
            .context("GPU bring-up failed")?;
        let renderer = Renderer::new(ctx, &self.config, &input, &shader)
            .context("renderer bring-up failed")?;
        self.dispatcher = Some(FrameDispatcher::new(renderer, input.state));
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, el: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.error = Some(err);
        el.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, el: &ActiveEventLoop) {
        if let Err(e) = self.start(el) {
            self.fail(el, e);
        }
    }

    fn window_event(&mut self, el: &ActiveEventLoop, _: WindowId, ev: WindowEvent) {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return;
        };
        let result = match ev {
            WindowEvent::CloseRequested => {
                el.exit();
                Ok(())
            }
            WindowEvent::Resized(size) => {
                self.size = size;
                dispatcher
                    .resize(size.width, size.height)
                    .map(|_| ())
                    .context("resize failed")
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::KeyP) =>
            {
                dispatcher
                    .capture(&self.capture_dir)
                    .map(|path| log::info!("captured {}", path.display()))
                    .context("capture failed")
            }
            WindowEvent::RedrawRequested if self.size.width == 0 || self.size.height == 0 => {
                // minimized
                Ok(())
            }
            WindowEvent::RedrawRequested => {
                let status = dispatcher.render_frame().context("frame failed");
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
                status.map(|s| {
                    if s == FrameStatus::Skipped {
                        log::trace!("frame skipped");
                    }
                })
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fail(el, e);
        }
    }
}
