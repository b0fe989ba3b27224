use chrono::Utc;
use rand::{Rng, distr::Alphanumeric};

/// Generate a session id of the form `{prefix}_{12 random alphanumerics}`, eg/ `cs_Xa81Pq0zLmNb`.
pub fn gen_session_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();

    format!("{prefix}_{suffix}")
}

/// Milliseconds since the unix epoch.
pub fn epoch_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
