//! Ratewindow - Sliding Window Rate Counters
//!
//! This crate approximates sliding-window event counts per scope by
//! splitting each window into fixed grains stored in a two-tier cache: a
//! fast process-local tier in front of a shared tier with atomic
//! increments. A feature-level limiter evaluates week/day/hour/minute/second
//! limits on top of the counters.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
