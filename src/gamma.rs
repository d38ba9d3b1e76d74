//! Gamma lookup table used while resampling layer pixels.
//!
//! When a gamma value is supplied, color channels are linearized through the
//! forward table before interpolation and mapped back afterwards so that
//! filtering happens in a perceptually sensible space. Alpha and mask
//! channels are never gamma corrected.

/// Forward gamma table plus the exponent needed to map back to 8 bit.
#[derive(Debug, Clone)]
pub(crate) struct GammaTable {
    forward: [f32; 256],
    inv_gamma: f64,
}

impl GammaTable {
    /// Build the table for the given exponent. Returns `None` for a zero or
    /// non-finite gamma, which disables correction.
    pub(crate) fn new(gamma: f64) -> Option<GammaTable> {
        if gamma == 0.0 || !gamma.is_finite() {
            return None;
        }

        let mut forward = [0.0f32; 256];
        for (i, entry) in forward.iter_mut().enumerate() {
            *entry = (i as f64 / 255.0).powf(gamma) as f32;
        }

        Some(GammaTable {
            forward,
            inv_gamma: 1.0 / gamma,
        })
    }

    /// 8 bit value to its linearized form.
    pub(crate) fn linearize(&self, value: u8) -> f32 {
        self.forward[value as usize]
    }

    /// Linearized value back to 8 bit, clamped to the valid range.
    pub(crate) fn delinearize(&self, value: f32) -> u8 {
        let v = (value as f64).max(0.0).min(1.0).powf(self.inv_gamma);
        (v * 255.0 + 0.5) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_value() {
        let table = GammaTable::new(2.2).unwrap();
        for v in 0..=255u8 {
            assert_eq!(table.delinearize(table.linearize(v)), v);
        }
    }

    #[test]
    fn zero_gamma_disables_the_table() {
        assert!(GammaTable::new(0.0).is_none());
        assert!(GammaTable::new(f64::NAN).is_none());
    }
}
