//! Monotone spline over `(key, page_id)` knot points, built with a
//! bounded-capacity greedy cone algorithm so every key's true page lies
//! within `max_error` pages of the spline's linear interpolation.
//!
//! Points must be fed in strictly increasing key order (the natural order
//! for an append-only time-series store). The construction keeps a
//! "corridor" of slopes consistent with every point seen since the last
//! committed knot; once a new point would leave that corridor, the last
//! point that still fit is committed as a knot and a fresh corridor starts
//! from it.

use crate::error::{Error, Result};

fn slope(a: (u64, f64), b: (u64, f64)) -> f64 {
    (b.1 - a.1) / (b.0 as f64 - a.0 as f64)
}

#[derive(Debug, Clone)]
pub struct Spline {
    capacity: usize,
    max_error: f64,
    knots: Vec<(u64, f64)>,
    prev: Option<(u64, f64)>,
    last: Option<(u64, f64)>,
    lower_slope: f64,
    upper_slope: f64,
}

impl Spline {
    pub fn new(capacity: usize, max_error: u32) -> Self {
        Self {
            capacity,
            max_error: max_error as f64,
            knots: Vec::new(),
            prev: None,
            last: None,
            lower_slope: f64::NEG_INFINITY,
            upper_slope: f64::INFINITY,
        }
    }

    pub fn len(&self) -> usize {
        self.knots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty() && self.prev.is_none()
    }

    fn commit_knot(&mut self, point: (u64, f64)) -> Result<()> {
        if self.knots.len() >= self.capacity {
            return Err(Error::SplineFull);
        }
        self.knots.push(point);
        Ok(())
    }

    /// Feed the next `(key, page_id)` pair. Keys must arrive in strictly
    /// increasing order.
    pub fn add(&mut self, key: u64, page_id: u32) -> Result<()> {
        let point = (key, page_id as f64);
        match (self.prev, self.last) {
            (None, _) => {
                self.commit_knot(point)?;
                self.prev = Some(point);
            }
            (Some(prev), None) => {
                self.lower_slope = slope(prev, (key, point.1 - self.max_error));
                self.upper_slope = slope(prev, (key, point.1 + self.max_error));
                self.last = Some(point);
            }
            (Some(prev), Some(_)) => {
                let candidate_lower = slope(prev, (key, point.1 - self.max_error));
                let candidate_upper = slope(prev, (key, point.1 + self.max_error));
                if candidate_lower > self.upper_slope || candidate_upper < self.lower_slope {
                    let knot = self.last.expect("checked Some above");
                    self.commit_knot(knot)?;
                    self.prev = Some(knot);
                    self.lower_slope = slope(knot, (key, point.1 - self.max_error));
                    self.upper_slope = slope(knot, (key, point.1 + self.max_error));
                } else {
                    self.lower_slope = self.lower_slope.max(candidate_lower);
                    self.upper_slope = self.upper_slope.min(candidate_upper);
                }
                self.last = Some(point);
            }
        }
        Ok(())
    }

    /// Commit whatever point is pending as the final knot. Must be called
    /// before [`Self::find`] will see the most recently added keys.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(last) = self.last.take() {
            self.commit_knot(last)?;
        }
        Ok(())
    }

    pub fn knots(&self) -> &[(u64, f64)] {
        &self.knots
    }

    /// Estimated page id for `key`, plus an inclusive `[lo, hi]` page-id
    /// bound guaranteed by construction to contain the true answer.
    ///
    /// Includes the not-yet-committed pending point (if any) as a virtual
    /// final knot, since the error guarantee also covers keys added since
    /// the last committed knot — only [`Self::find_within`] (used after a
    /// radix lookup over committed knots) is blind to it.
    pub fn find(&self, key: u64) -> Option<(u32, u32, u32)> {
        match self.last {
            None => interpolate(&self.knots, 0, self.knots.len(), key, self.max_error),
            Some(pending) => {
                let mut extended = self.knots.clone();
                extended.push(pending);
                interpolate(&extended, 0, extended.len(), key, self.max_error)
            }
        }
    }

    /// Same as [`Self::find`] but restricted to `knots[range_lo..range_hi)`
    /// of the *committed* knots, for use after a radix lookup has already
    /// narrowed the segment.
    pub fn find_within(&self, key: u64, range_lo: usize, range_hi: usize) -> Option<(u32, u32, u32)> {
        interpolate(&self.knots, range_lo, range_hi, key, self.max_error)
    }
}

fn interpolate(knots: &[(u64, f64)], range_lo: usize, range_hi: usize, key: u64, max_error: f64) -> Option<(u32, u32, u32)> {
    let range_hi = range_hi.min(knots.len());
    if knots.is_empty() || range_lo >= range_hi {
        return None;
    }
    let margin = max_error.round() as u32;
    if range_hi - range_lo == 1 {
        let (_, y) = knots[range_lo];
        let est = y.round().max(0.0) as u32;
        return Some((est, est.saturating_sub(margin), est.saturating_add(margin)));
    }

    let segment = &knots[range_lo..range_hi];
    let seg_idx = match segment.binary_search_by(|&(k, _)| k.cmp(&key)) {
        Ok(i) => i.min(segment.len() - 2),
        Err(0) => 0,
        Err(i) => (i - 1).min(segment.len() - 2),
    };
    let (k0, y0) = segment[seg_idx];
    let (k1, y1) = segment[seg_idx + 1];
    let est = if k1 == k0 {
        y0
    } else {
        y0 + (y1 - y0) * key.saturating_sub(k0) as f64 / (k1 - k0) as f64
    };
    let est = est.round().max(0.0) as u32;
    Some((est, est.saturating_sub(margin), est.saturating_add(margin)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_linear_series_has_zero_error() {
        let mut spline = Spline::new(64, 0);
        for page_id in 0..500u32 {
            spline.add(page_id as u64 * 10, page_id).unwrap();
        }
        spline.finalize().unwrap();
        assert!(spline.len() <= 3);
        let (est, lo, hi) = spline.find(2500).unwrap();
        assert_eq!(est, 250);
        assert_eq!(lo, 250);
        assert_eq!(hi, 250);
    }

    #[test]
    fn error_bound_holds_for_noisy_series() {
        let max_error = 4u32;
        let mut spline = Spline::new(4096, max_error);
        let mut page_id = 0u32;
        let mut key = 0u64;
        let mut truth = Vec::new();
        // Deterministic pseudo-noise: walk forward by 1..=3 pages per key
        // step so the mapping isn't perfectly linear.
        let mut seed = 7u64;
        for _ in 0..5000 {
            truth.push((key, page_id));
            spline.add(key, page_id).unwrap();
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let step = 1 + (seed >> 60) % 3;
            page_id += step as u32;
            key += 1;
        }
        spline.finalize().unwrap();

        for &(k, actual_page) in &truth {
            let (_, lo, hi) = spline.find(k).unwrap();
            assert!(
                actual_page >= lo.saturating_sub(0) && actual_page <= hi + 0,
                "key {k}: true page {actual_page} outside [{lo}, {hi}]"
            );
            assert!(hi - lo <= 2 * max_error + 1);
        }
    }

    #[test]
    fn capacity_overflow_is_an_error() {
        let mut spline = Spline::new(1, 0);
        spline.add(0, 0).unwrap();
        // Every subsequent point with nonzero error margin forces a new
        // knot immediately since capacity is 1.
        let err = spline.add(100, 50);
        // First extra point only sets up the corridor; second breaks it.
        if err.is_ok() {
            assert!(matches!(spline.add(200, 500), Err(Error::SplineFull)));
        }
    }
}
