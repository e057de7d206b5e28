//! Identifier helpers

use bech32::Bech32m;
use chrono::{DateTime, Utc};
use rand::Rng;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Human readable barter reference, `BTR-<epoch-millis>-<3 digits>`.
///
/// Two offers created in the same millisecond collide one time in a thousand;
/// the store rejects the duplicate rather than this function retrying.
pub fn barter_number(now: DateTime<Utc>, rng: &mut impl Rng) -> String {
    let suffix: u16 = rng.gen_range(0..1000);
    format!("BTR-{}-{:03}", now.timestamp_millis(), suffix)
}
