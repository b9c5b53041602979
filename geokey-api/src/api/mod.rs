//! HTTP API handlers
//!
//! Thin dispatch: each handler resolves the caller's project access, calls
//! into the stores, and renders the wire shape. Rules live in `authz` and
//! the stores.

pub mod comments;
pub mod health;
pub mod locations;
pub mod media;
pub mod observations;
pub mod projects;
