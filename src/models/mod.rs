//! Core data models for the video upload service.
//!
//! `session` describes uploads in flight (sessions and their chunk parts);
//! `video` holds the probed metadata and the catalog row persisted once an
//! upload completes.

pub mod session;
pub mod video;
