//! Serializes `u64` identifiers as strings so JavaScript readers never lose precision.

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sequence {
        Text(String),
        Number(u64),
    }

    match Sequence::deserialize(deserializer)? {
        Sequence::Number(value) => Ok(value),
        Sequence::Text(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|err| D::Error::custom(format!("invalid sequence {raw:?}: {err}"))),
    }
}
