//! Dexcom Share Glucose Client Library
//!
//! This library provides a session-managed client for the Dexcom Share
//! glucose-monitoring service: two-step authentication, polling with
//! re-authentication on session expiry, and normalization of raw vendor
//! readings into display-ready values with trend and delta annotations.

pub mod client;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod poller;
pub mod share_api;

// Re-export commonly used types for easier access
pub use client::GlucoseClient;
pub use config::{Config, Region, Thresholds, Unit};
pub use error::ShareError;
pub use normalizer::{NormalizedReading, ReadingNormalizer, Trend};
pub use poller::{DisplayState, GlucoseDisplay, GlucoseLevel, GlucosePoller};
pub use share_api::{RawReading, ShareApi, TrendToken};
