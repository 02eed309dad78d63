// src/repositories/postgres/mod.rs

pub mod batches;
pub mod codes;
pub mod redemption_events;

pub use batches::PostgresBatchRepository;
pub use codes::PostgresCodeRepository;
pub use redemption_events::PostgresRedemptionEventRepository;
