//! # GeoKey Common Library
//!
//! Shared code for the GeoKey services including:
//! - Database schema, initialization and row models
//! - Mutation event types (ChangeEvent) and the EventBus
//! - Field definitions and contribution value validation
//! - User-group/subset filter compilation
//! - Search and display-field projections
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fields;
pub mod filters;
pub mod search;

pub use error::{Error, Result};
