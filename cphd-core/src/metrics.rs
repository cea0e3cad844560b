use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

/// Счётчики ввода/вывода, обновляемые lock-free из рабочих потоков.
#[derive(Debug, Default)]
pub struct IoMetrics {
    pub channels_done: AtomicU64,
    pub frames: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub errors: AtomicU64,
}

/// Снимок метрик для вывода и тестов.
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub duration_secs: f64,
    pub channels_done: u64,
    pub frames: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub errors: u64,
    pub peak_scratch: u64,
    pub read_speed_mbps: f64,
    pub write_speed_mbps: f64,
}

impl IoMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(
        &self,
        bytes: usize,
    ) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_written(
        &self,
        bytes: usize,
    ) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_frames(
        &self,
        frames: usize,
    ) {
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn channel_done(&self) {
        self.channels_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn rate_mbps(
        bytes: u64,
        secs: f64,
    ) -> f64 {
        if secs < 1e-9 {
            return 0.0;
        }

        bytes as f64 / secs / 1_000_000.0
    }

    /// Итоговая сводка с момента `started`.
    pub fn summary(
        &self,
        started: &Instant,
        peak_scratch: usize,
    ) -> MetricsSummary {
        let secs = started.elapsed().as_secs_f64();
        let bytes_read = self.bytes_read.load(Ordering::Relaxed);
        let bytes_written = self.bytes_written.load(Ordering::Relaxed);

        MetricsSummary {
            duration_secs: secs,
            channels_done: self.channels_done.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            bytes_read,
            bytes_written,
            errors: self.errors.load(Ordering::Relaxed),
            peak_scratch: peak_scratch as u64,
            read_speed_mbps: Self::rate_mbps(bytes_read, secs),
            write_speed_mbps: Self::rate_mbps(bytes_written, secs),
        }
    }
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Duration      : {:.2}s", self.duration_secs)?;
        writeln!(f, "  Channels      : {}", self.channels_done)?;
        writeln!(f, "  Frames        : {}", self.frames)?;
        writeln!(
            f,
            "  Bytes read    : {:.1} MB ({:.1} MB/s)",
            self.bytes_read as f64 / 1e6,
            self.read_speed_mbps
        )?;
        writeln!(
            f,
            "  Bytes written : {:.1} MB ({:.1} MB/s)",
            self.bytes_written as f64 / 1e6,
            self.write_speed_mbps
        )?;
        writeln!(f, "  Peak scratch  : {} bytes", self.peak_scratch)?;
        writeln!(f, "  Errors        : {}", self.errors)?;
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}
