use crate::engine::xr::runtime::Duration;

/// Per-session frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub begun: u64,
    pub submitted: u64,
    pub not_ready: u64,
    pub failed: u64,
    pub layers_submitted: u64,
    pub last_display_period: Duration,
}

impl FrameStats {
    pub(crate) fn record_begun(&mut self, period: Duration) {
        self.begun += 1;
        self.last_display_period = period;
    }

    pub(crate) fn record_not_ready(&mut self) {
        self.not_ready += 1;
    }

    pub(crate) fn record_submitted(&mut self, layers: usize) {
        self.submitted += 1;
        self.layers_submitted += layers as u64;
    }

    pub(crate) fn record_failed(&mut self) {
        self.failed += 1;
    }

    /// Display rate implied by the last predicted period, if any.
    pub fn display_hz(&self) -> Option<f64> {
        let ns = self.last_display_period.as_nanos();
        (ns > 0).then(|| 1e9 / ns as f64)
    }

    pub fn summary(&self) -> String {
        let hz = self
            .display_hz()
            .map(|hz| format!("{hz:.1} Hz"))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "frames begun={} submitted={} failed={} not_ready={} layers={} display={}",
            self.begun, self.submitted, self.failed, self.not_ready, self.layers_submitted, hz
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_hz_from_period() {
        let mut stats = FrameStats::default();
        assert_eq!(stats.display_hz(), None);

        stats.record_begun(Duration::from_nanos(12_500_000));
        let hz = stats.display_hz().unwrap();
        assert!((hz - 80.0).abs() < 1e-6);
        assert!(stats.summary().contains("80.0 Hz"));
    }
}
