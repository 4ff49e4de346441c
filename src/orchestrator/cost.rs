//! Cost-cap enforcement helpers (SPEC_FULL.md 4.1g, 8).

use rust_decimal::Decimal;

/// Whether cumulative `spent` has crossed `cap`, if one is configured.
/// `cap = 0` with any non-free model fails on the very first billable
/// call, per the boundary behavior in SPEC_FULL.md 8.
pub fn cap_exceeded(spent: Decimal, cap: Option<Decimal>) -> bool {
    match cap {
        Some(cap) => spent > cap,
        None => false,
    }
}
