//! 数据库仓储层
//!
//! 封装订单、核验记录、集成三类实体的 SQL 访问。
//!
//! - 仓储只负责持久化，不含业务决策
//! - 事务边界由调用方控制（配额账本例外，见 `quota` 模块）
//! - trait 接口支持 mock 测试

mod integrations_repo;
mod orders_repo;
mod traits;
mod verifications_repo;

pub use integrations_repo::PgIntegrationRepository;
pub use orders_repo::PgOrderRepository;
pub use traits::*;
pub use verifications_repo::PgVerificationRepository;
