// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{anyhow, Result};
use clap::Parser;
use obsidian_core::init_tracing;
use obsidian_platform::PlatformWindow;
use obsidian_render::{FrameOutcome, RenderConfig, Renderer, WindowSurface};
use obsidian_render_vk::VkRenderer;
use tracing::{error, info, warn};

use obsidian_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults.
    #[arg(long, default_value = "obsidian.toml")]
    config: PathBuf,
    /// Exit after this many presented frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Force FIFO presentation regardless of the config file.
    #[arg(long)]
    vsync: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    vsync: bool,
    /// Bound on GPU fence waits; absent waits forever.
    fence_timeout_ms: Option<u64>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let defaults = RenderConfig::default();
        RenderCfg {
            clear_color: defaults.clear_color,
            vsync: defaults.vsync,
            fence_timeout_ms: None,
        }
    }
}

impl RenderCfg {
    fn to_render_config(self) -> RenderConfig {
        RenderConfig {
            clear_color: self.clear_color,
            vsync: self.vsync,
            fence_timeout: self.fence_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "obsidian".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
struct AppCfg {
    render: RenderCfg,
    window: WindowCfg,
}

fn parse_cfg(text: &str) -> Result<AppCfg> {
    Ok(toml::from_str::<AppCfg>(text)?)
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e:#}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => {
            info!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
    }
}

/// Presented-frame bookkeeping for `--max-frames` and the fps log.
#[derive(Debug, Default)]
struct FrameCounter {
    max: Option<u64>,
    presented: u64,
    since_log: u32,
}

impl FrameCounter {
    fn new(max: Option<u64>) -> Self {
        FrameCounter {
            max,
            ..Default::default()
        }
    }

    /// Returns true once the frame budget is used up. Skipped frames count
    /// toward nothing.
    fn record(&mut self, outcome: FrameOutcome) -> bool {
        if outcome.is_presented() {
            self.presented += 1;
            self.since_log = self.since_log.saturating_add(1);
        }
        self.max.is_some_and(|max| self.presented >= max)
    }

    fn take_since_log(&mut self) -> u32 {
        std::mem::take(&mut self.since_log)
    }
}

struct App {
    // Renderer before window: the surface must go before the window it wraps.
    renderer: Option<VkRenderer>,
    window: Option<PlatformWindow>,

    cfg: AppCfg,
    fatal: Option<anyhow::Error>,
    paused: bool,

    counter: FrameCounter,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, max_frames: Option<u64>) -> Self {
        App {
            renderer: None,
            window: None,
            cfg,
            fatal: None,
            paused: false,
            counter: FrameCounter::new(max_frames),
            last_fps_instant: Instant::now(),
        }
    }

    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(LogicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = Arc::new(event_loop.create_window(attrs)?);
        let mut platform = PlatformWindow::new(window.clone());

        let render_cfg = self.cfg.render.to_render_config();
        let renderer = VkRenderer::new(&*window, &*window, &mut platform, &render_cfg)?;
        info!("vsync cfg = {}", render_cfg.vsync);

        self.paused = platform.extent().is_zero_area();
        self.window = Some(platform);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("fatal: {err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        info!("resumed → paused={}", self.paused);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = &mut self.window else {
            return;
        };
        if window_id != window.window().id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                window.note_resized(new_size);
                let now_paused = new_size.width == 0 || new_size.height == 0;
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        new_size.width, new_size.height, self.paused
                    );
                }
                if !self.paused {
                    window.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                let outcome = match renderer.render(window) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.fail(event_loop, e);
                        return;
                    }
                };
                if self.counter.record(outcome) {
                    info!("presented {} frames; exiting", self.counter.presented);
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = &self.window else {
            return;
        };
        if self.paused {
            // Minimized: sleep until the next resize.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.counter.take_since_log();
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.counter.take_since_log());
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config);
    if args.vsync {
        cfg.render.vsync = true;
    }
    if args.max_frames == Some(0) {
        return Err(anyhow!("--max-frames must be at least 1"));
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.max_frames);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
