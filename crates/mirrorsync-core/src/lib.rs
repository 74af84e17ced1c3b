//! Core types: changed events, classification, mirror decisions, body policy
//!
//! Everything in this crate is pure: no I/O, no clocks. The pipeline that
//! drives it lives in `mirrorsync-server`.
//!
//! ```text
//! ChangedEvent ──classify()──▶ Classification ──decide()──▶ MirrorDecision
//!                                                  ▲
//!                                    EventMapping ─┘
//! ```

pub mod classify;
pub mod decision;
pub mod event;
pub mod mirror;
pub mod time;
pub mod tracing;

pub use classify::{Category, Classification, classify};
pub use decision::{EventMapping, MirrorAction, MirrorDecision, SkipReason, decide};
pub use event::{ChangedEvent, EventStatus, EventType, ResponseStatus};
pub use mirror::{MirrorBody, MirrorPolicy, NO_COLOR_OVERRIDE};
pub use time::EventTime;
pub use crate::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
