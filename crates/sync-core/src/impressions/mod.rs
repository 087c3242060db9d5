//! Impressions pipeline
//!
//! This module provides:
//! - The dedup observer over recently seen impressions
//! - Hour-bucketed counts per feature
//! - The tracker that decides what is queued for delivery

mod counter;
mod observer;
mod tracker;

pub use counter::ImpressionsCounter;
pub use observer::{hash_impression, ImpressionsObserver};
pub use tracker::{DefaultImpressionsTracker, ImpressionsStorages, ImpressionsTracker};
