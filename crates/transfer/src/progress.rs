use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Minimum spacing between two recorded speed samples.
pub const SPEED_UPDATE_INTERVAL: Duration = Duration::from_millis(1000);

/// Only samples younger than this feed the average.
pub const SPEED_WINDOW: Duration = Duration::from_secs(10);

/// Upper bound on retained samples.
pub const MAX_SPEED_SAMPLES: usize = 10;

/// Whole-number percentage of `done` over `total`. An empty total counts as done.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) as u128 * 100 / total as u128) as u8
}

/// Callback invoked with every estimator update.
pub type SpeedCallback = Box<dyn Fn(&SpeedReport) + Send + Sync>;

/// Estimated time to completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    /// Not enough data for a speed yet.
    Calculating,
    /// Nothing left to send.
    AboutToFinish,
    Remaining(Duration),
}

/// Output of one [`SpeedEstimator::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedReport {
    pub percent: u8,
    pub bytes_per_second: Option<f64>,
    pub eta: Eta,
    pub speed_label: String,
    pub eta_label: String,
}

/// Throughput observed between two consecutive recorded ticks.
struct SpeedSample {
    bytes_per_second: f64,
    timestamp: Instant,
}

/// Smooths progress ticks into a recency-weighted speed and an ETA.
pub struct SpeedEstimator {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window: Duration,
    /// Instant and byte count of the first tick of the attempt.
    started: Option<(Instant, u64)>,
    /// Instant and byte count of the last recorded sample.
    last: Option<(Instant, u64)>,
    last_percent: u8,
    callbacks: Vec<SpeedCallback>,
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::with_limits(SPEED_WINDOW, MAX_SPEED_SAMPLES)
    }

    /// Creates an estimator with a custom window and sample cap.
    pub fn with_limits(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.max(1),
            window,
            started: None,
            last: None,
            last_percent: 0,
            callbacks: Vec::new(),
        }
    }

    /// Registers a callback invoked after every update.
    pub fn on_update(&mut self, callback: SpeedCallback) {
        self.callbacks.push(callback);
    }

    /// Records a progress tick taken now.
    pub fn update(&mut self, bytes_uploaded: u64, total_bytes: u64) -> SpeedReport {
        self.update_at(bytes_uploaded, total_bytes, Instant::now())
    }

    /// Records a progress tick taken at `now`.
    pub fn update_at(&mut self, bytes_uploaded: u64, total_bytes: u64, now: Instant) -> SpeedReport {
        let (started_at, started_bytes) = *self.started.get_or_insert((now, bytes_uploaded));
        let (last_at, last_bytes) = *self.last.get_or_insert((now, bytes_uploaded));

        let since_last = now.saturating_duration_since(last_at);
        if since_last >= SPEED_UPDATE_INTERVAL && bytes_uploaded > last_bytes {
            self.samples.push_back(SpeedSample {
                bytes_per_second: (bytes_uploaded - last_bytes) as f64 / since_last.as_secs_f64(),
                timestamp: now,
            });
            self.last = Some((now, bytes_uploaded));
        }
        self.prune(now);

        let speed = self.weighted_speed().or_else(|| {
            let elapsed = now.saturating_duration_since(started_at).as_secs_f64();
            let sent = bytes_uploaded.saturating_sub(started_bytes);
            (elapsed > 0.0 && sent > 0).then(|| sent as f64 / elapsed)
        });

        let remaining = total_bytes.saturating_sub(bytes_uploaded);
        let eta = if remaining == 0 {
            Eta::AboutToFinish
        } else {
            match speed {
                Some(s) if s > 0.0 => Eta::Remaining(Duration::from_secs_f64(remaining as f64 / s)),
                _ => Eta::Calculating,
            }
        };

        self.last_percent = self.last_percent.max(percent_of(bytes_uploaded, total_bytes));

        let report = SpeedReport {
            percent: self.last_percent,
            bytes_per_second: speed,
            eta,
            speed_label: speed.map_or_else(|| "calculating".to_string(), format_speed),
            eta_label: format_eta(eta),
        };
        for cb in &self.callbacks {
            cb(&report);
        }
        report
    }

    /// Clears sample history, start time and the percent floor.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.started = None;
        self.last = None;
        self.last_percent = 0;
    }

    /// Number of samples currently in the window.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.timestamp) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average where the i-th oldest sample has weight i (newest weighs most).
    fn weighted_speed(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let (weighted, weights) = self
            .samples
            .iter()
            .zip(1u32..)
            .fold((0.0, 0.0), |(sum, total), (sample, weight)| {
                let w = f64::from(weight);
                (sum + sample.bytes_per_second * w, total + w)
            });
        Some(weighted / weights)
    }
}

/// Formats a throughput such as `1.5 MB/s`.
pub fn format_speed(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_second.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Formats an ETA such as `42s`, `3m 5s` or `1h 20m`.
pub fn format_eta(eta: Eta) -> String {
    match eta {
        Eta::Calculating => "calculating".into(),
        Eta::AboutToFinish => "about to finish".into(),
        Eta::Remaining(d) => {
            let secs = d.as_secs_f64().ceil() as u64;
            match secs {
                0..60 => format!("{secs}s"),
                60..3600 => format!("{}m {}s", secs / 60, secs % 60),
                _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
            }
        }
    }
}
