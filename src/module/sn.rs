use parking_lot::Mutex;

/// Serial number generator cycling through `[start, max]`.
#[derive(Debug)]
pub struct SnGenerator {
    start: u64,
    max: u64,
    state: Mutex<SnState>,
}

#[derive(Debug)]
struct SnState {
    next: u64,
    cycle_count: u64,
}

impl SnGenerator {
    /// A `max` of zero means no upper bound. A `start` above `max` is lowered to `max`.
    pub fn new(start: u64, max: u64) -> Self {
        let max = if max == 0 { u64::MAX } else { max };
        let start = start.min(max);
        Self {
            start,
            max,
            state: Mutex::new(SnState {
                next: start,
                cycle_count: 0,
            }),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn next(&self) -> u64 {
        self.state.lock().next
    }

    pub fn cycle_count(&self) -> u64 {
        self.state.lock().cycle_count
    }

    /// Returns the current serial number and advances, wrapping to `start` after `max`.
    pub fn get(&self) -> u64 {
        let mut state = self.state.lock();
        let sn = state.next;
        if sn == self.max {
            state.next = self.start;
            state.cycle_count += 1;
        } else {
            state.next = sn + 1;
        }
        sn
    }
}

impl Default for SnGenerator {
    fn default() -> Self {
        Self::new(1, 0)
    }
}
