/// Receives progress of long operations as a fraction in `0.0..=1.0` plus a
/// short label, typically forwarded to the host's progress bar.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, fraction: f64, label: &str);
}

impl<F> ProgressReporter for F
where
    F: Fn(f64, &str) + Send + Sync,
{
    fn report(&self, fraction: f64, label: &str) {
        self(fraction, label)
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _fraction: f64, _label: &str) {}
}
