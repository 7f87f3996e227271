/// Running mean and sample variance (Welford's method).
///
/// Constant memory regardless of how many values are pushed; the update
/// avoids the cancellation of the naive sum-of-squares form.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WelfordStats {
    pub count: usize,
    pub mean: f64,
    /// Sum of squared deviations from the running mean.
    pub sum_sq_dev: f64,
}

impl WelfordStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.sum_sq_dev += delta * delta2;
    }

    /// Sample variance; zero until two values have been pushed.
    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.sum_sq_dev / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl Extend<f64> for WelfordStats {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}
