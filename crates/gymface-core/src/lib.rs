//! gymface-core — face check-in engine.
//!
//! Detects a face with SCRFD, embeds it with ArcFace (both via ONNX Runtime),
//! matches the embedding against the enrolled gallery and records a debounced
//! attendance event for the matched member.

pub mod alignment;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod recorder;
pub mod service;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::CheckinError;
pub use pipeline::{FacePipeline, Probe};
pub use recorder::CheckinOutcome;
pub use service::CheckinService;
pub use store::{AttendanceStore, MemberStore, StoreError};
pub use types::{AttendanceEvent, BoundingBox, Embedding, Member, MemberId};
