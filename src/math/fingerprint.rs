use crate::data::breakdown::FeeRequest;

/// Stable fingerprint of one calculation's inputs and the cache generations
/// they were priced under.
///
/// Two requests share a fingerprint exactly when re-computation is known to
/// be redundant: identical inputs, and no invalidation of broker config or
/// market signals since the cached computation. Bumping either generation
/// changes every fingerprint, which retires the whole `calc` keyspace at
/// once without an explicit sweep.
pub fn calc_fingerprint(
    request: &FeeRequest,
    config_generation: u64,
    signal_generation: u64,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.ticker.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(request.position_value.normalize().to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(&request.loan_days.to_le_bytes());
    hasher.update(request.client_id.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(&config_generation.to_le_bytes());
    hasher.update(&signal_generation.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}
