/// Exponential moving average
///
/// The first sample seeds the average. Missing samples leave it untouched
/// and produce no output, so smoothing never invents a value for a channel
/// that could not be read.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    /// `alpha` is clamped to `0..=1`; `0` passes samples through unchanged
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { alpha, value: None }
    }

    pub fn update(&mut self, sample: Option<f64>) -> Option<f64> {
        let x = sample.filter(|v| v.is_finite())?;
        let next = match self.value {
            Some(prev) if self.alpha > 0.0 => self.alpha * x + (1.0 - self.alpha) * prev,
            _ => x,
        };
        self.value = Some(next);
        Some(next)
    }

    pub fn current(&self) -> Option<f64> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds() {
        let mut ema = Ema::new(0.3);
        assert_eq!(ema.update(Some(1000.0)), Some(1000.0));
        let v = ema.update(Some(0.0)).unwrap();
        assert!((v - 700.0).abs() < 1e-9);
    }

    #[test]
    fn missing_samples_hold_average() {
        let mut ema = Ema::new(0.3);
        ema.update(Some(500.0));
        assert_eq!(ema.update(None), None);
        assert_eq!(ema.update(Some(f64::NAN)), None);
        assert_eq!(ema.current(), Some(500.0));
    }

    #[test]
    fn zero_alpha_disables() {
        let mut ema = Ema::new(0.0);
        ema.update(Some(100.0));
        assert_eq!(ema.update(Some(250.0)), Some(250.0));
    }

    #[test]
    fn constant_input_stays_constant() {
        let mut ema = Ema::new(0.3);
        for _ in 0..20 {
            let v = ema.update(Some(900.0)).unwrap();
            assert!((v - 900.0).abs() < 1e-9);
        }
    }
}
