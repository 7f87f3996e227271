use log::debug;

use crate::config::AnalyzerConfig;
use crate::drivers::stats::WelfordStats;
use crate::types::{Sample, WindowResult};

/// Streams `(timestamp, value)` pairs into fixed-duration windows and
/// reports each window's statistics as it closes.
///
/// Windows sit on a fixed grid anchored at the first sample's timestamp: a
/// window closes once a sample arrives at or past `start + window_us`, and
/// the next one starts exactly one duration later. A gap spanning several
/// windows closes each of them in turn.
pub struct WindowAnalyzer {
    cfg: AnalyzerConfig,
    stats: WelfordStats,
    window_start_us: Option<u64>,
    prior_mean: Option<f64>,
    stable_streak: usize,
    finalized: u64,
}

impl WindowAnalyzer {
    pub fn new(cfg: AnalyzerConfig) -> Self {
        Self {
            cfg,
            stats: WelfordStats::new(),
            window_start_us: None,
            prior_mean: None,
            stable_streak: 0,
            finalized: 0,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.cfg
    }

    /// Windows closed since creation or the last reset.
    pub fn finalized_count(&self) -> u64 {
        self.finalized
    }

    /// Consecutive qualifying windows so far.
    pub fn stable_streak(&self) -> usize {
        self.stable_streak
    }

    pub fn reset(&mut self) {
        self.stats.reset();
        self.window_start_us = None;
        self.prior_mean = None;
        self.stable_streak = 0;
        self.finalized = 0;
    }

    /// Adds one value, returning the last window this call closed.
    pub fn analyze_sample(&mut self, timestamp_us: u64, value: f64) -> Option<WindowResult> {
        let mut last = None;
        self.advance(timestamp_us, value, |window| last = Some(window));
        last
    }

    /// Adds one value and hands every window it closes to `on_window`, in
    /// order.
    pub fn advance<F>(&mut self, timestamp_us: u64, value: f64, mut on_window: F)
    where
        F: FnMut(WindowResult),
    {
        let window_us = self.cfg.window_us;
        let mut start = *self.window_start_us.get_or_insert(timestamp_us);
        while timestamp_us.saturating_sub(start) >= window_us {
            on_window(self.finalize(start));
            start += window_us;
            self.window_start_us = Some(start);
            self.stats.reset();
        }
        self.stats.push(value);
    }

    /// Feeds a batch, returning the first stable window as soon as it
    /// closes (the rest of the batch is not consumed), otherwise the last
    /// window closed during the batch.
    pub fn analyze_batch<F>(&mut self, samples: &[Sample], value_of: F) -> Option<WindowResult>
    where
        F: Fn(&Sample) -> f64,
    {
        let mut last = None;
        for sample in samples {
            if let Some(window) = self.analyze_sample(sample.timestamp_us, value_of(sample)) {
                last = Some(window);
                if window.stable {
                    return last;
                }
            }
        }
        last
    }

    fn finalize(&mut self, start: u64) -> WindowResult {
        self.finalized += 1;
        let mut window = WindowResult {
            stable: false,
            mean: self.stats.mean,
            stddev: self.stats.stddev(),
            prior_mean: self.prior_mean,
            drift_per_sec: 0.0,
            window_start_us: start,
            window_end_us: start + self.cfg.window_us,
            sample_count: self.stats.count,
        };
        if self.stats.count < self.cfg.min_window_sample_size {
            // 数据不足，不计入稳定性
            self.stable_streak = 0;
            debug!(
                "window [{}..{}] short: {} of {} samples",
                window.window_start_us,
                window.window_end_us,
                self.stats.count,
                self.cfg.min_window_sample_size
            );
            return window;
        }
        if let Some(prior) = self.prior_mean {
            window.drift_per_sec = (window.mean - prior).abs() / self.cfg.window_seconds();
        }
        let qualifies = window.stddev <= self.cfg.stddev_max
            && (self.prior_mean.is_none() || window.drift_per_sec <= self.cfg.drift_per_sec_max);
        if qualifies {
            self.stable_streak += 1;
        } else {
            self.stable_streak = 0;
        }
        window.stable = self.stable_streak >= self.cfg.stable_consecutive_windows_req;
        debug!(
            "window [{}..{}] mean={:.6} prior={:.6} sd={:.6} drift={:.6}/s stable={}",
            window.window_start_us,
            window.window_end_us,
            window.mean,
            self.prior_mean.unwrap_or(f64::NAN),
            window.stddev,
            window.drift_per_sec,
            window.stable
        );
        self.prior_mean = Some(window.mean);
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    fn cfg(min_samples: usize, consecutive: usize) -> AnalyzerConfig {
        AnalyzerConfig {
            window_us: 1_000_000,
            min_window_sample_size: min_samples,
            stddev_max: 0.002,
            drift_per_sec_max: 0.001,
            stable_consecutive_windows_req: consecutive,
        }
    }
    /// Ten evenly spaced samples per second at `level`, starting at `from_s`.
    fn feed_second(analyzer: &mut WindowAnalyzer, from_s: u64, level: f64) -> Vec<WindowResult> {
        let mut closed = Vec::new();
        for i in 0..10u64 {
            let t = from_s * 1_000_000 + i * 100_000;
            analyzer.advance(t, level, |w| closed.push(w));
        }
        closed
    }
    #[test]
    fn window_closes_on_the_boundary_sample() {
        let mut analyzer = WindowAnalyzer::new(cfg(1, 1));
        assert_eq!(analyzer.analyze_sample(0, 1.0), None);
        assert_eq!(analyzer.analyze_sample(999_999, 1.0), None);
        let window = analyzer.analyze_sample(1_000_000, 1.0).unwrap();
        assert_eq!((window.window_start_us, window.window_end_us), (0, 1_000_000));
        assert_eq!(analyzer.finalized_count(), 1);
        assert_approx_eq!(window.mean, 1.0);
    }
    #[test]
    fn gap_closes_every_spanned_window_on_the_grid() {
        let mut analyzer = WindowAnalyzer::new(cfg(1, 1));
        analyzer.analyze_sample(0, 1.0);
        let mut closed = Vec::new();
        analyzer.advance(3_500_000, 2.0, |w| closed.push(w));
        let bounds: Vec<(u64, u64)> = closed
            .iter()
            .map(|w| (w.window_start_us, w.window_end_us))
            .collect();
        assert_eq!(
            bounds,
            vec![(0, 1_000_000), (1_000_000, 2_000_000), (2_000_000, 3_000_000)]
        );
        let counts: Vec<usize> = closed.iter().map(|w| w.sample_count).collect();
        assert_eq!(counts, vec![1, 0, 0]);
        // The new sample opens the fourth window at 3s.
        let fourth = analyzer.analyze_sample(4_000_000, 2.0).unwrap();
        assert_eq!(fourth.window_start_us, 3_000_000);
        assert_approx_eq!(fourth.mean, 2.0);
        assert_eq!(analyzer.finalized_count(), 4);
    }
    #[test]
    fn analyze_sample_reports_the_last_window_of_a_gap() {
        let mut analyzer = WindowAnalyzer::new(cfg(1, 1));
        analyzer.analyze_sample(0, 1.0);
        let last = analyzer.analyze_sample(3_500_000, 1.0).unwrap();
        assert_eq!(last.window_start_us, 2_000_000);
        assert_eq!(analyzer.finalized_count(), 3);
    }
    #[test]
    fn stability_needs_consecutive_windows() {
        let mut analyzer = WindowAnalyzer::new(cfg(5, 3));
        let mut flags = Vec::new();
        for second in 0..4 {
            flags.extend(feed_second(&mut analyzer, second, 1.0).iter().map(|w| w.stable));
        }
        assert_eq!(flags, vec![false, false, true]);
        assert_eq!(analyzer.stable_streak(), 3);
    }
    #[test]
    fn one_noisy_window_restarts_the_streak() {
        let mut analyzer = WindowAnalyzer::new(cfg(5, 3));
        let mut flags = Vec::new();
        flags.extend(feed_second(&mut analyzer, 0, 1.0).iter().map(|w| w.stable));
        flags.extend(feed_second(&mut analyzer, 1, 1.0).iter().map(|w| w.stable));
        // Alternate between two levels so the stddev blows past the limit.
        for i in 0..10u64 {
            let level = if i % 2 == 0 { 1.0 } else { 1.1 };
            analyzer.advance(2_000_000 + i * 100_000, level, |w| flags.push(w.stable));
        }
        assert_eq!(analyzer.stable_streak(), 2);
        // The noisy window fails on spread, the one after it on drift back
        // down, then three clean windows are needed again.
        for second in 3..8 {
            flags.extend(feed_second(&mut analyzer, second, 1.0).iter().map(|w| w.stable));
        }
        assert_eq!(
            flags,
            vec![false, false, false, false, false, false, true]
        );
    }
    #[test]
    fn drift_blocks_stability() {
        let mut analyzer = WindowAnalyzer::new(cfg(5, 1));
        let first = feed_second(&mut analyzer, 0, 1.0);
        assert!(first.is_empty());
        let closed = feed_second(&mut analyzer, 1, 1.01);
        assert!(closed[0].stable);
        assert_eq!(closed[0].prior_mean, None);
        let closed = feed_second(&mut analyzer, 2, 1.01);
        assert!(!closed[0].stable);
        assert_approx_eq!(closed[0].drift_per_sec, 0.01);
        assert_eq!(closed[0].prior_mean, Some(1.0));
    }
    #[test]
    fn short_window_is_unstable_and_keeps_prior_mean() {
        let mut analyzer = WindowAnalyzer::new(cfg(5, 1));
        feed_second(&mut analyzer, 0, 1.0);
        // One sample in the second window, then a jump.
        analyzer.analyze_sample(1_000_000, 1.0);
        let short = analyzer.analyze_sample(2_000_000, 1.0).unwrap();
        assert!(!short.stable);
        assert_eq!(short.drift_per_sec, 0.0);
        assert_eq!(short.prior_mean, Some(1.0));
        assert_eq!(analyzer.stable_streak(), 0);
    }
    #[test]
    fn batch_stops_at_first_stable_window() {
        let mut analyzer = WindowAnalyzer::new(cfg(5, 1));
        let samples: Vec<Sample> = (0..40u64)
            .map(|i| Sample::new(i * 100_000, 0, 1.0))
            .collect();
        let window = analyzer.analyze_batch(&samples, |s| s.value).unwrap();
        assert!(window.stable);
        assert_eq!(window.window_start_us, 0);
        assert_eq!(analyzer.finalized_count(), 1);
    }
    #[test]
    fn batch_without_stability_returns_last_window() {
        let mut analyzer = WindowAnalyzer::new(cfg(50, 1));
        let samples: Vec<Sample> = (0..35u64)
            .map(|i| Sample::new(i * 100_000, 0, 1.0))
            .collect();
        let window = analyzer.analyze_batch(&samples, |s| s.value).unwrap();
        assert!(!window.stable);
        assert_eq!(window.window_start_us, 2_000_000);
        assert_eq!(analyzer.analyze_batch(&[], |s| s.value), None);
    }
    #[test]
    fn reset_reanchors_the_grid() {
        let mut analyzer = WindowAnalyzer::new(cfg(1, 1));
        analyzer.analyze_sample(0, 1.0);
        analyzer.analyze_sample(1_000_000, 1.0);
        analyzer.reset();
        assert_eq!(analyzer.finalized_count(), 0);
        assert_eq!(analyzer.analyze_sample(1_500_000, 1.0), None);
        let window = analyzer.analyze_sample(2_500_000, 1.0).unwrap();
        assert_eq!(window.window_start_us, 1_500_000);
        assert_eq!(window.prior_mean, None);
    }
}
