use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of scheduler timestamps, in microseconds.
///
/// Starvation costs and the time-dependent cost refresh compare wall-clock
/// timestamps; simulations drive the same code with a manually advanced
/// clock.
pub trait TimeSource {
    fn now_us(&self) -> u64;
}

/// Monotonic wall clock, measured from the creation of the source.
pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        WallClock {
            start: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Default)]
pub struct SimClock {
    now_us: Cell<u64>,
}

impl SimClock {
    pub fn new(now_us: u64) -> Rc<Self> {
        Rc::new(SimClock {
            now_us: Cell::new(now_us),
        })
    }

    pub fn set(&self, now_us: u64) {
        self.now_us.set(now_us);
    }

    pub fn advance(&self, delta_us: u64) {
        self.now_us.set(self.now_us.get() + delta_us);
    }
}

impl TimeSource for SimClock {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }
}
