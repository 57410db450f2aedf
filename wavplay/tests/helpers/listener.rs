//! Listener that records callbacks for assertions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use wavplay::audio::PlaybackListener;

#[derive(Default)]
pub struct RecordingListener {
    starts: AtomicUsize,
    stops: Mutex<Vec<Instant>>,
    periods: Mutex<Vec<u64>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.lock().unwrap().len()
    }

    /// When each `on_stop` fired
    pub fn stop_times(&self) -> Vec<Instant> {
        self.stops.lock().unwrap().clone()
    }

    /// Positions reported by `on_period_reached`
    pub fn periods(&self) -> Vec<u64> {
        self.periods.lock().unwrap().clone()
    }
}

impl PlaybackListener for RecordingListener {
    fn on_start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stop(&self) {
        self.stops.lock().unwrap().push(Instant::now());
    }

    fn on_period_reached(&self, position_frames: u64) {
        self.periods.lock().unwrap().push(position_frames);
    }
}
