use super::config::{Arm, Experiment};

/// Assigns `user_id` to an arm of `experiment`.
///
/// Bucketing is a pure function of `(user_id, experiment.id)`: no per-user
/// state is kept, and the same pair always lands in the same arm while the
/// traffic split is unchanged. Experiments that are not running always serve
/// `control`.
pub fn assign_variant(experiment: &Experiment, user_id: &str) -> Arm {
    if !experiment.is_running() {
        return Arm::Control;
    }
    let pct = bucket_percentage(user_id, &experiment.id);
    if pct <= u32::from(experiment.traffic_split) {
        Arm::Variant
    } else {
        Arm::Control
    }
}

/// Maps `(user_id, test_id)` onto a percentage in `[1, 100]`.
pub fn bucket_percentage(user_id: &str, test_id: &str) -> u32 {
    let hash = string_hash(user_id).wrapping_mul(pow31(test_id)).wrapping_add(string_hash(test_id));
    hash.unsigned_abs() % 100 + 1
}

/// Polynomial string hash (`h = h * 31 + unit`) over UTF-16 code units,
/// wrapped to a signed 32-bit integer.
pub(crate) fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// 31^n mod 2^32 where n is the UTF-16 length of `s`; lets the hash of a
/// concatenation be composed without allocating it.
fn pow31(s: &str) -> i32 {
    s.encode_utf16().fold(1i32, |p, _| p.wrapping_mul(31))
}
