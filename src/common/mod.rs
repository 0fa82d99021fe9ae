//! Shared error types and scheduling primitives.

pub mod error;
pub mod retry;

pub use error::SwapError;
pub use retry::{cancel_pair, retry_with_backoff, Backoff, CancelHandle, CancelToken, Ticker};

/// Serde adapter storing fixed-size byte arrays as lowercase hex strings.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(de: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(de)?;
        let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} hex bytes", N)))
    }
}

/// Serde adapter for `Option<[u8; N]>` hex fields.
pub(crate) mod opt_hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(
        bytes: &Option<[u8; N]>,
        ser: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => ser.serialize_some(&hex::encode(b)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, const N: usize>(de: D) -> Result<Option<[u8; N]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<String>::deserialize(de)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
                let arr = raw
                    .try_into()
                    .map_err(|_| serde::de::Error::custom(format!("expected {} hex bytes", N)))?;
                Ok(Some(arr))
            }
        }
    }
}

/// Current unix time in seconds.
pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
