use crate::chain::types::{SimulationResult, Urgency};

pub const COMPUTE_UNIT_FLOOR: u64 = 50_000;
pub const COMPUTE_UNIT_CEILING: u64 = 1_400_000;
pub const DEFAULT_COMPUTE_UNITS: u64 = 200_000;
const COMPUTE_BUFFER_NUMERATOR: u64 = 120;
const PRIORITY_FEE_FLOOR_MICRO: u64 = 100;

/// Turns a simulation into a compute-unit budget: observed consumption plus a
/// 20% buffer, clamped to the platform's floor/ceiling. A failed or empty
/// simulation yields `(default, false)` so the caller can flag the estimate
/// as non-simulated.
pub fn estimate_compute_units(simulation: &SimulationResult, default_units: u64) -> (u64, bool) {
    match simulation {
        SimulationResult {
            units_consumed: Some(units),
            err: None,
        } => {
            let buffered = units.saturating_mul(COMPUTE_BUFFER_NUMERATOR) / 100;
            (buffered.clamp(COMPUTE_UNIT_FLOOR, COMPUTE_UNIT_CEILING), true)
        },
        _ => (default_units, false),
    }
}

/// Median of the recent prioritization fees scaled by urgency, floored at
/// 100 micro-units. An empty sample degrades to the floor.
pub fn estimate_priority_fee(recent_fees: &[u64], urgency: Urgency) -> u64 {
    if recent_fees.is_empty() {
        return PRIORITY_FEE_FLOOR_MICRO;
    }

    let mut sorted = recent_fees.to_vec();
    sorted.sort_unstable();
    let median = if sorted.len() % 2 == 0 {
        (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2
    } else {
        sorted[sorted.len() / 2]
    };

    let scaled = (median as f64 * urgency.factor()).round() as u64;
    scaled.max(PRIORITY_FEE_FLOOR_MICRO)
}
