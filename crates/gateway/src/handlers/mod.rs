//! API handlers module

pub mod health;
pub mod models;
pub mod pipelines;
