/// CUDA device ordinal as exposed to workers via `CUDA_VISIBLE_DEVICES`.
pub type DeviceId = u32;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
