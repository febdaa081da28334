//! Battery level conversions.
//!
//! ZCL `batteryPercentageRemaining` is reported in half-percent steps
//! (0-200). Coin cell devices that only expose `batteryVoltage` (in units of
//! 100 mV) are mapped through a CR2032 discharge curve instead.

/// Default low-battery threshold in percent.
pub const DEFAULT_LOW_THRESHOLD: u8 = 20;

/// CR2032 discharge curve as (volts, percent), highest voltage first.
const CR2032_CURVE: [(f64, f64); 10] = [
    (3.3, 100.0),
    (3.0, 95.0),
    (2.9, 85.0),
    (2.8, 70.0),
    (2.7, 50.0),
    (2.6, 30.0),
    (2.5, 20.0),
    (2.4, 10.0),
    (2.3, 5.0),
    (2.0, 0.0),
];

/// One `batteryPercentageRemaining` reading and the threshold it is judged
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryState {
    raw: i64,
    low_threshold: u8,
}

impl BatteryState {
    pub fn new(raw: i64) -> Self {
        Self {
            raw,
            low_threshold: DEFAULT_LOW_THRESHOLD,
        }
    }

    pub fn with_low_threshold(mut self, threshold: u8) -> Self {
        self.low_threshold = threshold;
        self
    }

    pub fn raw(&self) -> i64 {
        self.raw
    }

    /// Percentage in 0..=100.
    pub fn percentage(&self) -> u8 {
        percentage_from_raw(self.raw)
    }

    pub fn is_low(&self) -> bool {
        self.percentage() <= self.low_threshold
    }
}

/// `clamp(round(raw / 2), 0, 100)` for any integer raw value.
pub fn percentage_from_raw(raw: i64) -> u8 {
    let half = (raw as f64 / 2.0).round();
    half.clamp(0.0, 100.0) as u8
}

/// Percentage for a battery voltage given in decivolts (ZCL `batteryVoltage`).
pub fn percentage_from_decivolts(decivolts: i64) -> u8 {
    let volts = decivolts as f64 / 10.0;
    let (fresh, _) = CR2032_CURVE[0];
    let (dead, _) = CR2032_CURVE[CR2032_CURVE.len() - 1];
    if volts >= fresh {
        return 100;
    }
    if volts <= dead {
        return 0;
    }
    for pair in CR2032_CURVE.windows(2) {
        let (high_v, high_p) = pair[0];
        let (low_v, low_p) = pair[1];
        if volts <= high_v && volts >= low_v {
            let percent = low_p + (volts - low_v) / (high_v - low_v) * (high_p - low_p);
            return percent.round().clamp(0.0, 100.0) as u8;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_percent_conversion() {
        assert_eq!(BatteryState::new(0).percentage(), 0);
        assert_eq!(BatteryState::new(136).percentage(), 68);
        assert_eq!(BatteryState::new(200).percentage(), 100);
        assert_eq!(BatteryState::new(201).percentage(), 100);
        assert_eq!(BatteryState::new(255).percentage(), 100);
    }

    #[test]
    fn test_odd_raw_rounds_half_up() {
        assert_eq!(BatteryState::new(1).percentage(), 1);
        assert_eq!(BatteryState::new(3).percentage(), 2);
    }

    #[test]
    fn test_negative_raw_clamps_to_zero() {
        assert_eq!(percentage_from_raw(-10), 0);
        assert!(BatteryState::new(-10).is_low());
    }

    #[test]
    fn test_low_threshold() {
        assert!(BatteryState::new(40).is_low());
        assert!(!BatteryState::new(42).is_low());
        assert!(BatteryState::new(60).with_low_threshold(30).is_low());
    }

    #[test]
    fn test_cr2032_curve() {
        assert_eq!(percentage_from_decivolts(33), 100);
        assert_eq!(percentage_from_decivolts(30), 95);
        assert_eq!(percentage_from_decivolts(27), 50);
        assert_eq!(percentage_from_decivolts(20), 0);
        assert_eq!(percentage_from_decivolts(15), 0);
    }
}
