// Frame clock - tracks real (wall) time and simulation time separately.
//
// Simulation time advances at a configurable scale so it can be slowed or
// frozen (pause) without disturbing real-time measurements.

use std::time::Instant;

pub struct Clock {
    last_tick: Instant,
    sim_scale: f32,
    running: bool,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            last_tick: Instant::now(),
            sim_scale: 1.0,
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.last_tick = Instant::now();
        self.running = true;
    }

    /// Milliseconds of real and simulated time since the previous tick.
    pub fn tick(&mut self) -> (f32, f32) {
        if !self.running {
            return (0.0, 0.0);
        }
        let now = Instant::now();
        let real_ms = now.duration_since(self.last_tick).as_secs_f32() * 1000.0;
        self.last_tick = now;
        (real_ms, real_ms * self.sim_scale)
    }

    /// Freeze or resume simulation time. Real time is unaffected.
    pub fn set_paused(&mut self, paused: bool) {
        self.sim_scale = if paused { 0.0 } else { 1.0 };
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_time_elapses_before_start() {
        let mut clock = Clock::new();
        assert_eq!(clock.tick(), (0.0, 0.0));
    }

    #[test]
    fn sim_time_freezes_while_paused() {
        let mut clock = Clock::new();
        clock.start();
        clock.set_paused(true);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let (real, sim) = clock.tick();
        assert!(real > 0.0);
        assert_eq!(sim, 0.0);
    }
}
