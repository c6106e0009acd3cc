//! Tariff parameters and the fare formula.
//!
//! All quantities are fixed-point integers: currency in cents, distance in
//! meters, calibration in pulses per kilometre. The metering step distance
//! is fixed by the MCU firmware.

use serde::{Deserialize, Serialize};

/// Distance of one fare step, fixed by the MCU firmware.
pub const STEP_DISTANCE_M: u32 = 200;

/// Accepted K-value range, pulses per kilometre.
pub const K_VALUE_MIN: u32 = 100;
pub const K_VALUE_MAX: u32 = 60_000;

/// Upper bound for any single price parameter, in cents.
pub const MAX_PRICE_CENTS: u32 = 1_000_000;

/// Upper bound for the flagfall distance threshold, in meters.
pub const MAX_THRESHOLD_M: u32 = 50_000;

/// Maximum license plate length on the wire, in bytes.
pub const MAX_PLATE_BYTES: usize = 16;

/// Peripheral configuration snapshot: calibration plus the price table.
/// Replaced wholesale whenever a fresh parameter enquiry response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterTariff {
    /// Calibration constant mapping raw pulses to distance, pulses per km.
    pub k_value: u32,
    /// Flagfall, covers the first `threshold_m` meters.
    pub start_cents: u32,
    /// Price per step within the first tier.
    pub step_cents: u32,
    /// Price per step once total distance exceeds `step2_change_m`.
    pub step2_cents: u32,
    /// Distance covered by the flagfall.
    pub threshold_m: u32,
    /// Total distance past which the second step rate applies.
    pub step2_change_m: u32,
}

impl Default for MeterTariff {
    fn default() -> Self {
        Self {
            k_value: 1000,
            start_cents: 2000,
            step_cents: 100,
            step2_cents: 150,
            threshold_m: STEP_DISTANCE_M,
            step2_change_m: 2000,
        }
    }
}

impl MeterTariff {
    /// Distance travelled for `pulses` raw pulses under this calibration.
    pub fn distance_m(&self, pulses: u32) -> u32 {
        if self.k_value == 0 {
            return 0;
        }
        let m = u64::from(pulses) * 1000 / u64::from(self.k_value);
        u32::try_from(m).unwrap_or(u32::MAX)
    }

    /// Fare for a trip of `distance_m` meters.
    ///
    /// The flagfall covers the first `threshold_m` meters. Beyond that, each
    /// completed 200 m step bills at `step_cents`, switching to `step2_cents`
    /// for steps past `step2_change_m` total distance.
    pub fn fare_cents(&self, distance_m: u32) -> u64 {
        let start = u64::from(self.start_cents);
        if distance_m <= self.threshold_m {
            return start;
        }
        let steps = u64::from((distance_m - self.threshold_m) / STEP_DISTANCE_M);
        let first_tier_steps = u64::from(
            self.step2_change_m.saturating_sub(self.threshold_m) / STEP_DISTANCE_M,
        );
        let first = steps.min(first_tier_steps);
        let second = steps - first;
        start + first * u64::from(self.step_cents) + second * u64::from(self.step2_cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_tariff() -> MeterTariff {
        // 1 pulse per meter, $20.00 flagfall over 200 m, $1.00 per 200 m,
        // $1.50 per 200 m past 2 km.
        MeterTariff {
            k_value: 1000,
            start_cents: 2000,
            step_cents: 100,
            step2_cents: 150,
            threshold_m: 200,
            step2_change_m: 2000,
        }
    }

    #[test]
    fn flagfall_covers_threshold() {
        let t = scenario_tariff();
        assert_eq!(t.fare_cents(0), 2000);
        assert_eq!(t.fare_cents(199), 2000);
        assert_eq!(t.fare_cents(200), 2000);
    }

    #[test]
    fn first_tier_steps() {
        let t = scenario_tariff();
        // No completed step until 400 m.
        assert_eq!(t.fare_cents(399), 2000);
        assert_eq!(t.fare_cents(400), 2100);
        // 1000 m: four completed 200 m steps past the threshold.
        assert_eq!(t.fare_cents(1000), 2400);
    }

    #[test]
    fn second_tier_rate_past_change_point() {
        let t = scenario_tariff();
        // 2 km total: nine first-tier steps.
        assert_eq!(t.fare_cents(2000), 2000 + 9 * 100);
        // 3 km: nine first-tier steps plus five second-tier steps.
        assert_eq!(t.fare_cents(3000), 2000 + 9 * 100 + 5 * 150);
    }

    #[test]
    fn distance_from_pulses() {
        let t = scenario_tariff();
        assert_eq!(t.distance_m(1000), 1000);
        let half = MeterTariff {
            k_value: 2000,
            ..scenario_tariff()
        };
        assert_eq!(half.distance_m(1000), 500);
    }

    #[test]
    fn zero_k_value_yields_no_distance() {
        let t = MeterTariff {
            k_value: 0,
            ..scenario_tariff()
        };
        assert_eq!(t.distance_m(12345), 0);
    }
}
