//! Offline mirror of the Casebook case-management backend.
//!
//! [`sync::engine::SyncEngine`] pulls every entity collection from the REST
//! API into a local SQLite [`mirror::MirrorStore`], one task per entity type,
//! strictly in order and never more than one run at a time.

pub mod daemon;
pub mod mirror;
pub mod sync;
