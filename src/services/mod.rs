//! Upload pipeline: on-disk layout, chunk reassembly, ffprobe invocation
//! and report parsing, per-session locking, and the service tying them
//! together for the HTTP layer.

pub mod layout;
pub mod probe_parser;
pub mod prober;
pub mod reassembler;
pub mod session_lock;
pub mod video_service;
