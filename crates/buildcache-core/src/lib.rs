//! Core types for the build cache
//!
//! This crate carries everything the store and engine layers share:
//! the digest engine, the persisted data model, the typed configuration
//! with its rule matching, the XML document layer, and the error space.
//!
//! # Overview
//!
//! A module's build is addressed by a [`hash::Fingerprint`] computed over
//! every input that affects its output. A successful build produces a
//! [`model::BuildRecord`] binding that fingerprint to the executed steps
//! and the artifact manifest; later builds with the same fingerprint
//! restore the artifacts instead of executing.

pub mod config;
pub mod error;
pub mod hash;
pub mod model;
pub mod xml;

pub use error::{Error, Result};
