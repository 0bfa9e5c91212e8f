// Minimal Vulkan demo engine.
//
// Startup: config + flags -> logging -> window -> device/swapchain setup.
// Runtime: window events are translated into the bounded event queue and the
// frame loop is pumped from redraw requests. Setup failures are fatal;
// per-frame failures only skip the frame.

mod backend;
mod clock;
mod config;
mod engine;
mod events;
mod power;

use anyhow::Result;
use backend::VulkanBackend;
use config::Config;
use engine::FrameLoop;
use events::{Event, EventQueue, Key};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

fn main() -> Result<()> {
    let mut config = Config::load();
    if let Err(e) = config.apply_args(std::env::args().skip(1)) {
        let program = std::env::args().next().unwrap_or_else(|| "prism".into());
        if e.to_string() != "help requested" {
            eprintln!("Error: {e}");
        }
        config::print_usage(&program);
        std::process::exit(1);
    }

    init_logging(&config);
    log::info!(
        "Starting: {}x{}, {} backbuffers, validation {}",
        config.window.width,
        config.window.height,
        config.graphics.backbuffers,
        if config.debug.validation { "on" } else { "off" }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn init_logging(config: &Config) {
    env_logger::Builder::from_default_env()
        .filter_level(config.log_level_filter())
        .init();
}

/// Application state. Field order matters for Drop: the backend must be torn
/// down before the window it renders to.
struct App {
    config: Config,
    frame_loop: FrameLoop,
    backend: Option<VulkanBackend>,
    window: Option<Arc<Window>>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            frame_loop: FrameLoop::new(EventQueue::default()),
            backend: None,
            window: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {e:?}");
                event_loop.exit();
                return;
            }
        };

        match VulkanBackend::new(&window, &self.config) {
            Ok(backend) => {
                self.backend = Some(backend);
            }
            Err(e) => {
                log::error!("Failed to initialize graphics backend: {e:#}");
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
        self.frame_loop.start();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.frame_loop.events_mut().push(Event::Close);
            }
            WindowEvent::Resized(size) => {
                self.frame_loop.events_mut().push(Event::Resize {
                    width: size.width,
                    height: size.height,
                });
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let key = map_key(&event.physical_key);
                let mapped = if event.state.is_pressed() {
                    Event::KeyPress(key)
                } else {
                    Event::KeyRelease(key)
                };
                self.frame_loop.events_mut().push(mapped);
            }
            WindowEvent::RedrawRequested => {
                if let Some(backend) = self.backend.as_mut() {
                    if !self.frame_loop.tick(backend) && self.frame_loop.is_quitting() {
                        let _ = backend.wait_idle();
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn map_key(key: &winit::keyboard::PhysicalKey) -> Key {
    use winit::keyboard::{KeyCode, PhysicalKey};
    match key {
        PhysicalKey::Code(KeyCode::Escape) => Key::Escape,
        PhysicalKey::Code(KeyCode::Space) => Key::Space,
        other => Key::Other(key_id(other)),
    }
}

/// Stable opaque id for keys the engine does not react to, for logging.
fn key_id(key: &winit::keyboard::PhysicalKey) -> u32 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as u32
}
