//! # Batch execution over a target set
//!
//! [`BatchFit`] extends [`TargetSet`] with bulk fitting: run the iterative
//! multi-component driver on every stored spectrum and collect per-target
//! outcomes into a [`FullFitResult`]. One target failing hard (bad spectrum,
//! coordinate outside the grid) never aborts the batch; its error is stored
//! under its identifier like any other outcome.
//!
//! Sequential runs poll an optional cancellation flag between targets, rate
//! limited to roughly every 20 ms of wall clock so tight loops over tiny
//! spectra do not spend their time reading an atomic. [`BatchFit::par_fit_all`]
//! distributes the targets over the rayon thread pool instead.

use std::time::{Duration, Instant};

use ahash::RandomState;
use rayon::prelude::*;
use std::collections::HashMap;

use crate::constants::{TargetId, TargetSet};
use crate::fit::multi::{Component, MultiFit, MultiFitResult};
use crate::fit::FitParams;
use crate::interpolate::GridInterpolator;
use crate::specfit_errors::SpecfitError;

/// Per-target outcome map of a batch run.
pub type FullFitResult = HashMap<TargetId, Result<MultiFitResult, SpecfitError>, RandomState>;

/// Wall-clock rate limiter for cancellation polling.
struct CancelPoll {
    last: Instant,
    interval: Duration,
}

impl CancelPoll {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            interval: Duration::from_millis(20),
        }
    }

    fn due(&mut self) -> bool {
        if self.last.elapsed() >= self.interval {
            self.last = Instant::now();
            return true;
        }
        false
    }
}

/// Summary statistics over the valid-pixel counts of a target set.
///
/// `Display` prints a compact one-liner; the alternate form (`{:#}`) a small
/// multi-line table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCountStats {
    pub min: usize,
    pub p25: usize,
    pub median: usize,
    pub p95: usize,
    pub max: usize,
}

/// Nearest-rank index for quantile `q` over `n` sorted entries.
fn q_index(n: usize, q: f64) -> usize {
    ((n as f64 * q).ceil() as usize).clamp(1, n) - 1
}

impl std::fmt::Display for PixelCountStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            writeln!(f, "valid pixels per target")?;
            writeln!(f, "  min    : {}", self.min)?;
            writeln!(f, "  p25    : {}", self.p25)?;
            writeln!(f, "  median : {}", self.median)?;
            writeln!(f, "  p95    : {}", self.p95)?;
            write!(f, "  max    : {}", self.max)
        } else {
            write!(
                f,
                "pixels[min={} p25={} med={} p95={} max={}]",
                self.min, self.p25, self.median, self.p95, self.max
            )
        }
    }
}

/// Bulk fitting over every spectrum of a [`TargetSet`].
pub trait BatchFit {
    /// Fit every target sequentially with the same initial components.
    ///
    /// Per-target failures land in the result map; the batch always runs to
    /// the end.
    fn fit_all(
        &self,
        interpolator: &GridInterpolator,
        params: &FitParams,
        components: &[Component],
    ) -> FullFitResult;

    /// Like [`BatchFit::fit_all`], polling `should_cancel` between passes and
    /// between targets. Targets not reached before cancellation are absent
    /// from the result map.
    fn fit_all_with_cancel<F>(
        &self,
        interpolator: &GridInterpolator,
        params: &FitParams,
        components: &[Component],
        should_cancel: F,
    ) -> FullFitResult
    where
        F: Fn() -> bool;

    /// Fit every target on the rayon thread pool.
    fn par_fit_all(
        &self,
        interpolator: &GridInterpolator,
        params: &FitParams,
        components: &[Component],
    ) -> FullFitResult;

    /// Like [`BatchFit::fit_all`], drawing a progress bar on stderr.
    #[cfg(feature = "progress")]
    fn fit_all_with_progress(
        &self,
        interpolator: &GridInterpolator,
        params: &FitParams,
        components: &[Component],
    ) -> FullFitResult;

    /// Number of stored targets.
    fn number_of_targets(&self) -> usize;

    /// Total count of valid pixels across all targets.
    fn total_valid_pixels(&self) -> usize;

    /// Distribution of per-target valid-pixel counts, `None` when empty.
    fn pixel_count_stats(&self) -> Option<PixelCountStats>;
}

impl BatchFit for TargetSet {
    fn fit_all(
        &self,
        interpolator: &GridInterpolator,
        params: &FitParams,
        components: &[Component],
    ) -> FullFitResult {
        self.fit_all_with_cancel(interpolator, params, components, || false)
    }

    fn fit_all_with_cancel<F>(
        &self,
        interpolator: &GridInterpolator,
        params: &FitParams,
        components: &[Component],
        should_cancel: F,
    ) -> FullFitResult
    where
        F: Fn() -> bool,
    {
        let driver = MultiFit::new(interpolator, params);
        let mut poll = CancelPoll::new();
        let mut results = FullFitResult::with_capacity_and_hasher(self.len(), RandomState::new());

        for (id, spectrum) in self {
            if poll.due() && should_cancel() {
                log::info!(
                    "batch cancelled after {} of {} targets",
                    results.len(),
                    self.len()
                );
                break;
            }
            let outcome = driver.fit_with_cancel(spectrum, components, || {
                poll.due() && should_cancel()
            });
            results.insert(id.clone(), outcome);
        }
        results
    }

    fn par_fit_all(
        &self,
        interpolator: &GridInterpolator,
        params: &FitParams,
        components: &[Component],
    ) -> FullFitResult {
        self.par_iter()
            .map(|(id, spectrum)| {
                let driver = MultiFit::new(interpolator, params);
                (id.clone(), driver.fit(spectrum, components))
            })
            .collect()
    }

    #[cfg(feature = "progress")]
    fn fit_all_with_progress(
        &self,
        interpolator: &GridInterpolator,
        params: &FitParams,
        components: &[Component],
    ) -> FullFitResult {
        use indicatif::{ProgressBar, ProgressStyle};

        let bar = ProgressBar::new(self.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} targets ({eta})")
        {
            bar.set_style(style);
        }

        let driver = MultiFit::new(interpolator, params);
        let mut results = FullFitResult::with_capacity_and_hasher(self.len(), RandomState::new());
        for (id, spectrum) in self {
            results.insert(id.clone(), driver.fit(spectrum, components));
            bar.inc(1);
        }
        bar.finish();
        results
    }

    fn number_of_targets(&self) -> usize {
        self.len()
    }

    fn total_valid_pixels(&self) -> usize {
        self.values().map(|s| s.valid_pixels()).sum()
    }

    fn pixel_count_stats(&self) -> Option<PixelCountStats> {
        if self.is_empty() {
            return None;
        }
        let mut counts: Vec<usize> = self.values().map(|s| s.valid_pixels()).collect();
        counts.sort_unstable();
        let n = counts.len();
        Some(PixelCountStats {
            min: counts[0],
            p25: counts[q_index(n, 0.25)],
            median: counts[q_index(n, 0.50)],
            p95: counts[q_index(n, 0.95)],
            max: counts[n - 1],
        })
    }
}
