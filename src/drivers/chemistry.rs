//! MQ-3 conversion helpers: converter voltage to sensor resistance, then
//! resistance ratio to an ethanol estimate.
//!
//! The sensor sits in a 5 V divider with load resistor `RL`; the converter
//! reads it through a 3.3 V divider, so readings are scaled by 1.5 first.
//!
//! - Rs (Ω) = RL * (Vcc / Vout - 1)
//! - mg/L from Rs/Ro, either the natural-log fit
//!   `exp((ln(ratio) + 0.29) / -0.268)` or the log10 fit
//!   `10^(-3.733 * log10(ratio) - 0.47)`
//! - ppm = mg/L * 530, BAC (%) = ppm * 0.000385505
use crate::config::CircuitConfig;

/// 3.3 V converter domain to the 5 V divider domain.
pub const VOLTAGE_FACTOR: f64 = 1.5;
/// Divider supply.
pub const VCC_VOLTS: f64 = 5.0;
pub const EXP_SLOPE: f64 = -0.268;
pub const EXP_INTERCEPT: f64 = 0.29;
pub const LOG10_SLOPE: f64 = -3.733;
pub const LOG10_INTERCEPT: f64 = -0.47;
/// mg/L to ppm (24.45 L/mol at 25 °C, 46.07 g/mol ethanol).
pub const ETHANOL_PPM_PER_MG_L: f64 = 530.0;
/// ppm to US BAC percent.
pub const PPM_TO_BAC: f64 = 0.000385505;

pub fn adc_to_vout(adc_volts: f64) -> f64 {
    adc_volts * VOLTAGE_FACTOR
}

/// Sensor resistance from the divider output.
///
/// Non-positive `vout` has no physical meaning and yields infinity.
pub fn vout_to_rs(vout: f64, load_ohms: f64, vcc: f64) -> f64 {
    if vout <= 0.0 {
        return f64::INFINITY;
    }
    load_ohms * (vcc / vout - 1.0)
}

pub fn adc_to_rs(adc_volts: f64, load_ohms: f64, vcc: f64) -> f64 {
    vout_to_rs(adc_to_vout(adc_volts), load_ohms, vcc)
}

pub fn rs_to_ratio(rs_ohms: f64, ro_air_ohms: f64) -> f64 {
    rs_ohms / ro_air_ohms
}

/// mg/L via the natural-log best fit.
pub fn concentration_exp(ratio: f64) -> f64 {
    ((ratio.ln() + EXP_INTERCEPT) / EXP_SLOPE).exp()
}

/// mg/L via the log10 best fit.
pub fn concentration_log10(ratio: f64) -> f64 {
    10f64.powf(LOG10_SLOPE * ratio.log10() + LOG10_INTERCEPT)
}

pub fn ppm(concentration_mg_l: f64) -> f64 {
    concentration_mg_l * ETHANOL_PPM_PER_MG_L
}

pub fn bac(ppm: f64) -> f64 {
    ppm * PPM_TO_BAC
}

/// Everything derived from one converter reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlcoholEstimate {
    pub rs_ohms: f64,
    pub ratio: f64,
    pub concentration_mg_l: f64,
    pub ppm: f64,
    pub bac: f64,
}

impl CircuitConfig {
    pub fn rs(&self, adc_volts: f64) -> f64 {
        adc_to_rs(adc_volts, self.load_resistance_ohms, self.supply_volts)
    }

    pub fn ratio(&self, adc_volts: f64) -> f64 {
        rs_to_ratio(self.rs(adc_volts), self.ro_air_ohms)
    }

    /// Full chain using the natural-log fit.
    pub fn estimate(&self, adc_volts: f64) -> AlcoholEstimate {
        let rs_ohms = self.rs(adc_volts);
        let ratio = rs_to_ratio(rs_ohms, self.ro_air_ohms);
        let concentration_mg_l = concentration_exp(ratio);
        let ppm = ppm(concentration_mg_l);
        AlcoholEstimate {
            rs_ohms,
            ratio,
            concentration_mg_l,
            ppm,
            bac: bac(ppm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    #[test]
    fn divider_math() {
        assert_approx_eq!(adc_to_vout(2.0), 3.0);
        // 2.5 V out of 5 V means Rs equals RL.
        assert_approx_eq!(vout_to_rs(2.5, 20_000.0, 5.0), 20_000.0);
        assert_approx_eq!(adc_to_rs(1.0, 20_000.0, 5.0), 20_000.0 * (5.0 / 1.5 - 1.0));
        assert!(vout_to_rs(0.0, 20_000.0, 5.0).is_infinite());
    }
    #[test]
    fn fits_agree_with_their_closed_forms() {
        // ratio = e^-0.29 puts the exponent at zero.
        assert_approx_eq!(concentration_exp((-EXP_INTERCEPT).exp()), 1.0);
        assert_approx_eq!(concentration_log10(1.0), 10f64.powf(-0.47));
        // Lower resistance ratio means more ethanol.
        assert!(concentration_exp(0.2) > concentration_exp(0.5));
        assert!(concentration_log10(0.2) > concentration_log10(0.5));
    }
    #[test]
    fn estimate_chains_every_step() {
        let circuit = CircuitConfig::default();
        let est = circuit.estimate(2.4);
        assert_approx_eq!(est.rs_ohms, circuit.load_resistance_ohms * (5.0 / 3.6 - 1.0));
        assert_approx_eq!(est.ratio, est.rs_ohms / circuit.ro_air_ohms);
        assert_approx_eq!(est.ppm, est.concentration_mg_l * 530.0);
        assert_approx_eq!(est.bac, est.ppm * 0.000385505, 1e-12);
        assert_approx_eq!(circuit.ratio(2.4), est.ratio);
    }
}
