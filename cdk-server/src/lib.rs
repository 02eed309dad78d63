// src/lib.rs

pub mod config;
pub mod http;
