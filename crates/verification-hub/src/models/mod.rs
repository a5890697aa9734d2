//! 核验域数据模型
//!
//! 所有实体与枚举均支持数据库（sqlx）和 JSON（serde）序列化。

pub mod enums;
pub mod integration;
pub mod order;
pub mod verification;

pub use enums::{DeliveryStatus, PlatformType, ReplyAction, VerificationStatus};
pub use integration::Integration;
pub use order::{NormalizedOrder, Order};
pub use verification::{NewVerification, Verification};
