use std::time::Instant;

/// Stage progress reported through `tracing`, stamped with time since the request began.
pub struct Progress {
    label: &'static str,
    t0: Instant,
}

impl Progress {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        let elapsed = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        tracing::info!(stage = self.label, %elapsed, "{}", msg.as_ref());
    }

    pub fn progress(&self, current: usize, total: usize) {
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let elapsed = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        tracing::info!(stage = self.label, %elapsed, "{current}/{total} ({pct:5.1}%)");
    }

    pub fn elapsed(&self) -> String {
        fmt_elapsed(self.t0.elapsed().as_secs_f64())
    }
}

pub fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
