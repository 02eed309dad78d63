// src/lib.rs

pub mod db;
pub mod repositories;
pub mod auth;
pub mod rate_limit;
pub mod services;
pub mod test_utils;

pub use db::Database;
pub use cdk_common::error::Error;
pub use cdk_common::models;
