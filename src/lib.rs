//! Reelgate - Rate Limited Movie Metadata Gateway
//!
//! This crate implements an HTTP gateway in front of a third-party movie
//! metadata API. Inbound requests pass through tiered fixed-window rate
//! limits (global, per-country, per-IP), responses are served from a short
//! lived cache, and outbound calls are paced, bounded, and retried with
//! exponential backoff. Administrators can inspect and adjust the limits
//! at runtime without a restart.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod ratelimit;
pub mod upstream;
