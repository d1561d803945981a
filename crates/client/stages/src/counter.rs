use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Blocks per second over a sliding window, for progress logs.
pub struct ThroughputCounter {
    /// Start of each closed slice and the number of events in it.
    slices: VecDeque<(Instant, u64)>,
    slice_len: Duration,
    window: Duration,
    open_count: u64,
    open_start: Instant,
}

impl ThroughputCounter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    fn starting_at(window: Duration, now: Instant) -> Self {
        Self { slices: VecDeque::new(), slice_len: window / 20, window, open_count: 0, open_start: now }
    }

    pub fn increment(&mut self) {
        self.increment_at(Instant::now())
    }

    fn increment_at(&mut self, now: Instant) {
        if now.duration_since(self.open_start) >= self.slice_len {
            while self.slices.front().is_some_and(|(start, _)| now.duration_since(*start) >= self.window) {
                self.slices.pop_front();
            }
            if self.open_count > 0 {
                self.slices.push_back((self.open_start, self.open_count));
            }
            self.open_count = 0;
            self.open_start = now;
        }
        self.open_count += 1;
    }

    pub fn get_throughput(&self) -> f64 {
        self.throughput_at(Instant::now())
    }

    fn throughput_at(&self, now: Instant) -> f64 {
        let live = self.slices.iter().filter(|(start, _)| now.duration_since(*start) < self.window);
        let oldest = live.clone().next().map_or(self.open_start, |(start, _)| *start);
        let total = live.map(|(_, count)| count).sum::<u64>() + self.open_count;

        let elapsed = now.duration_since(oldest).min(self.window).as_secs_f64();
        if elapsed > 0.0 {
            total as f64 / elapsed
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_counter_reports_zero() {
        let start = Instant::now();
        let counter = ThroughputCounter::starting_at(Duration::from_secs(10), start);
        assert_eq!(counter.throughput_at(start), 0.0);
    }

    #[test]
    fn steady_rate() {
        let start = Instant::now();
        let mut counter = ThroughputCounter::starting_at(Duration::from_secs(10), start);
        for i in 1..=40 {
            counter.increment_at(start + Duration::from_millis(250 * i));
        }
        let throughput = counter.throughput_at(start + Duration::from_secs(10));
        assert!((3.5..=4.5).contains(&throughput), "got {throughput}");
    }

    #[test]
    fn old_slices_leave_the_window() {
        let start = Instant::now();
        let mut counter = ThroughputCounter::starting_at(Duration::from_secs(10), start);
        for _ in 0..100 {
            counter.increment_at(start);
        }
        counter.increment_at(start + Duration::from_secs(30));
        let throughput = counter.throughput_at(start + Duration::from_secs(31));
        assert!(throughput <= 1.0, "got {throughput}");
    }
}
