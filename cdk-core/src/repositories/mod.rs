// src/repositories/mod.rs

pub mod memory;
pub mod postgres;

pub use cdk_common::traits::repository_traits::{
    BatchRepository, CodeRepository, RedemptionEventRepository,
};

pub use memory::InMemoryStore;
pub use postgres::{
    PostgresBatchRepository, PostgresCodeRepository, PostgresRedemptionEventRepository,
};
