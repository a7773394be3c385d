//! Rating Service - Usage pricing, lifetime usage tracking and progressive billing.

pub mod charges;
pub mod config;
pub mod current_usage;
pub mod daily_usage;
pub mod error;
pub mod lifetime_usage;
pub mod models;
pub mod services;
pub mod startup;
pub mod workers;
