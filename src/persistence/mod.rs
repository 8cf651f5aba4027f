//! # Persistence Module
//!
//! ## Why This Module Exists
//! Profiles are the user's work: every binding, curve and macro lives in them. This
//! module stores them as human-editable TOML documents and reads them back exactly,
//! so that `load(save(p)) == p` holds for every profile the engine accepts.
//!
//! ## Key Abstractions
//! - **Versioned documents**: every file carries `format_version`; documents from an
//!   unknown version are rejected up front instead of being half-understood
//! - **One file per profile**: [`ProfileStore`] maps profile names onto files in a
//!   directory and lists, loads, saves and deletes them
//! - **Async I/O**: file access uses `tokio::fs`, so it never blocks the control surface
//!
//! ## Error Handling Strategy
//! Everything surfaces as [`ProfileError`](crate::mapping::ProfileError). Parsing never
//! validates; validation happens when a profile is activated, so editors can still
//! open and repair broken documents.

pub mod profile_store;

pub use profile_store::{
    load_profile, parse_profile, save_profile, serialize_profile, ProfileStore,
};
