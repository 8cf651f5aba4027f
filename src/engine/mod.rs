//! # Engine Module
//!
//! ## Why This Module Exists
//! Devices, evaluator and output sink only make sense when something drives them at a
//! steady rate and keeps them consistent while profiles and modes change underneath.
//! This module is that driver plus the async surface the rest of an application uses
//! to control it.
//!
//! ## Key Abstractions
//! - **[`Scheduler`]**: statum state machine (`Stopped → Starting → Running → Stopping`)
//!   owning all per-engine mutable state; one tick = hot-plug, poll, evaluate, apply
//! - **[`EngineHandle`]**: runs the scheduler on its own thread; requests carry oneshot
//!   replies so errors reach the awaiting caller
//! - **[`Publisher`]**: broadcast event stream plus watch channels for status, the
//!   active `Arc<Profile>`, devices and the mode stack
//!
//! ## Error Handling Strategy
//! Start, stop and profile switches report through [`EngineError`]. Failures inside a
//! tick never stop the loop: they are logged and published as
//! [`EngineEventKind::EngineError`].

pub mod error;
pub mod events;
pub mod handle;
pub mod scheduler;

pub use error::EngineError;
pub use events::{EngineEvent, EngineEventKind, EngineStatus, Publisher};
pub use handle::{BackendFactory, EngineHandle};
pub use scheduler::{Scheduler, SchedulerState};
