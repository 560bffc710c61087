use std::time::{Duration, SystemTime};

use serde::{de, ser, Deserialize, Deserializer, Serializer};

/// Milliseconds between the Unix epoch and `t`, saturating at zero for earlier instants
pub fn from_system_time(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// The instant `ms` milliseconds after the Unix epoch
pub fn to_system_time(ms: u64) -> Option<SystemTime> {
    SystemTime::UNIX_EPOCH.checked_add(Duration::from_millis(ms))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    let ms: u64 = Deserialize::deserialize(deserializer)?;
    to_system_time(ms).ok_or_else(|| <D::Error as de::Error>::custom(format!("timestamp {} is out of range", ms)))
}

pub fn serialize<S>(t: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let since_epoch = t
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|_| <S::Error as ser::Error>::custom("timestamp is before the Unix epoch"))?;

    let ms = u64::try_from(since_epoch.as_millis()).map_err(<S::Error as ser::Error>::custom)?;

    serializer.serialize_u64(ms)
}
