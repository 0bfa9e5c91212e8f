// Frame loop driver
//
// Owns the quit/pause flags and drives the per-frame sequence: time update,
// event drain, then begin-frame / draw / end-frame when running unpaused.
// The graphics backend is held behind a capability trait, not inherited.

use anyhow::Result;

use crate::clock::Clock;
use crate::events::{Event, EventQueue, Key};

/// Capabilities the frame loop needs from a renderer.
pub trait GraphicsBackend {
    /// Acquire the next backbuffer. Returns false when the frame should be
    /// skipped this iteration (e.g. swapchain out of date) - not an error.
    fn begin_frame(&mut self) -> Result<bool>;
    fn draw(&mut self) -> Result<()>;
    /// Submit and present the frame begun by `begin_frame`.
    fn end_frame(&mut self) -> Result<()>;
    fn handle_resize(&mut self, width: u32, height: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Quitting,
}

pub struct FrameLoop {
    state: LoopState,
    paused: bool,
    frame_counter: u64,
    clock: Clock,
    events: EventQueue,
}

impl FrameLoop {
    pub fn new(events: EventQueue) -> Self {
        Self {
            state: LoopState::Idle,
            paused: false,
            frame_counter: 0,
            clock: Clock::new(),
            events,
        }
    }

    pub fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_quitting(&self) -> bool {
        self.state == LoopState::Quitting
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter
    }

    pub fn start(&mut self) {
        if self.state == LoopState::Idle {
            self.clock.start();
            self.state = LoopState::Running;
            log::info!("Starting engine loop");
        }
    }

    /// Run one loop iteration. Returns false once the loop has quit.
    pub fn tick<B: GraphicsBackend>(&mut self, backend: &mut B) -> bool {
        if self.state != LoopState::Running {
            return false;
        }

        let (real_ms, sim_ms) = self.clock.tick();
        log::debug!("Frame delta: {:.2}ms real, {:.2}ms sim", real_ms, sim_ms);

        self.process_events(backend);
        if self.state == LoopState::Quitting {
            log::info!("Engine loop finished after {} frames", self.frame_counter);
            return false;
        }

        if !self.paused {
            // Per-frame failures never tear the loop down; the frame is
            // simply not drawn.
            match backend.begin_frame() {
                Ok(true) => {
                    if let Err(e) = backend.draw().and_then(|_| backend.end_frame()) {
                        log::warn!("Frame {} not completed: {e:#}", self.frame_counter);
                    } else {
                        self.frame_counter += 1;
                    }
                }
                Ok(false) => {
                    log::debug!("Frame skipped");
                }
                Err(e) => {
                    log::warn!("Failed to begin frame: {e:#}");
                }
            }
        }

        true
    }

    fn process_events<B: GraphicsBackend>(&mut self, backend: &mut B) {
        while let Some(event) = self.events.pop() {
            match event {
                Event::Close => {
                    log::info!("Close event, quitting");
                    self.state = LoopState::Quitting;
                }
                Event::Resize { width, height } => {
                    log::info!("Resize event: {}x{}", width, height);
                    backend.handle_resize(width, height);
                }
                Event::KeyPress(Key::Escape) => {
                    log::info!("Escape pressed, quitting");
                    self.state = LoopState::Quitting;
                }
                Event::KeyPress(Key::Space) => {
                    self.paused = !self.paused;
                    self.clock.set_paused(self.paused);
                    log::info!("{}", if self.paused { "Paused" } else { "Unpaused" });
                }
                Event::KeyPress(Key::Other(code)) => {
                    log::warn!("Unhandled key press {code}");
                }
                Event::KeyRelease(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockBackend {
        frames_begun: u32,
        frames_drawn: u32,
        frames_ended: u32,
        resizes: Vec<(u32, u32)>,
        skip_next_begin: bool,
    }

    impl GraphicsBackend for MockBackend {
        fn begin_frame(&mut self) -> Result<bool> {
            self.frames_begun += 1;
            if self.skip_next_begin {
                self.skip_next_begin = false;
                return Ok(false);
            }
            Ok(true)
        }

        fn draw(&mut self) -> Result<()> {
            self.frames_drawn += 1;
            Ok(())
        }

        fn end_frame(&mut self) -> Result<()> {
            self.frames_ended += 1;
            Ok(())
        }

        fn handle_resize(&mut self, width: u32, height: u32) {
            self.resizes.push((width, height));
        }
    }

    fn started_loop() -> FrameLoop {
        let mut frame_loop = FrameLoop::new(EventQueue::default());
        frame_loop.start();
        frame_loop
    }

    #[test]
    fn idle_until_started() {
        let mut frame_loop = FrameLoop::new(EventQueue::default());
        let mut backend = MockBackend::default();
        assert_eq!(frame_loop.state(), LoopState::Idle);
        assert!(!frame_loop.tick(&mut backend));
        assert_eq!(backend.frames_begun, 0);

        frame_loop.start();
        assert_eq!(frame_loop.state(), LoopState::Running);
        assert!(frame_loop.tick(&mut backend));
        assert_eq!(backend.frames_drawn, 1);
        assert_eq!(frame_loop.frame_count(), 1);
    }

    #[test]
    fn close_event_quits() {
        let mut frame_loop = started_loop();
        let mut backend = MockBackend::default();
        frame_loop.events_mut().push(Event::Close);
        assert!(!frame_loop.tick(&mut backend));
        assert!(frame_loop.is_quitting());
        // The quit iteration never draws, and further ticks do nothing.
        assert_eq!(backend.frames_drawn, 0);
        assert!(!frame_loop.tick(&mut backend));
        assert_eq!(backend.frames_begun, 0);
    }

    #[test]
    fn escape_quits() {
        let mut frame_loop = started_loop();
        let mut backend = MockBackend::default();
        frame_loop.events_mut().push(Event::KeyPress(Key::Escape));
        assert!(!frame_loop.tick(&mut backend));
        assert!(frame_loop.is_quitting());
    }

    #[test]
    fn space_toggles_pause_without_quitting() {
        let mut frame_loop = started_loop();
        let mut backend = MockBackend::default();

        frame_loop.events_mut().push(Event::KeyPress(Key::Space));
        assert!(frame_loop.tick(&mut backend));
        assert!(frame_loop.is_paused());
        assert_eq!(backend.frames_drawn, 0);

        frame_loop.events_mut().push(Event::KeyPress(Key::Space));
        assert!(frame_loop.tick(&mut backend));
        assert!(!frame_loop.is_paused());
        assert_eq!(backend.frames_drawn, 1);
    }

    #[test]
    fn even_pause_toggles_leave_drawing_unchanged() {
        let mut toggled = started_loop();
        let mut straight = started_loop();
        let mut backend_a = MockBackend::default();
        let mut backend_b = MockBackend::default();

        // Toggle twice within one drain, then run some frames.
        toggled.events_mut().push(Event::KeyPress(Key::Space));
        toggled.events_mut().push(Event::KeyPress(Key::Space));
        for _ in 0..5 {
            toggled.tick(&mut backend_a);
            straight.tick(&mut backend_b);
        }

        assert_eq!(backend_a.frames_drawn, backend_b.frames_drawn);
        assert_eq!(toggled.frame_count(), straight.frame_count());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut frame_loop = started_loop();
        let mut backend = MockBackend::default();
        frame_loop.events_mut().push(Event::KeyPress(Key::Other(42)));
        frame_loop.events_mut().push(Event::KeyRelease(Key::Other(42)));
        assert!(frame_loop.tick(&mut backend));
        assert!(!frame_loop.is_quitting());
        assert!(!frame_loop.is_paused());
        assert_eq!(backend.frames_drawn, 1);
    }

    #[test]
    fn resize_is_forwarded_to_backend() {
        let mut frame_loop = started_loop();
        let mut backend = MockBackend::default();
        frame_loop.events_mut().push(Event::Resize {
            width: 800,
            height: 600,
        });
        assert!(frame_loop.tick(&mut backend));
        assert_eq!(backend.resizes, vec![(800, 600)]);
    }

    #[test]
    fn skipped_begin_does_not_advance_frame_counter() {
        let mut frame_loop = started_loop();
        let mut backend = MockBackend {
            skip_next_begin: true,
            ..Default::default()
        };
        assert!(frame_loop.tick(&mut backend));
        assert_eq!(backend.frames_begun, 1);
        assert_eq!(backend.frames_drawn, 0);
        assert_eq!(frame_loop.frame_count(), 0);

        assert!(frame_loop.tick(&mut backend));
        assert_eq!(frame_loop.frame_count(), 1);
    }

    #[test]
    fn frame_counter_is_monotonic() {
        let mut frame_loop = started_loop();
        let mut backend = MockBackend::default();
        for expected in 1..=10 {
            frame_loop.tick(&mut backend);
            assert_eq!(frame_loop.frame_count(), expected);
        }
    }
}
