//! controlmapper - remaps physical game controllers onto virtual input devices
//!
//! The crate is organised as a fixed-rate pipeline that is driven by a single
//! engine thread:
//!
//! ```text
//!  Gamepads ──► DeviceManager ──► Evaluator ──► OutputSink ──► Virtual devices
//!               (InputState)     (Profile +     (diffs)        (uinput / D-Bus)
//!                                 slot state)
//!                    ▲                                  ▲
//!                    └──────────── Scheduler ───────────┘
//!                                      ▲
//!                               EngineHandle (async control surface)
//! ```
//!
//! - [`controller`] - device enumeration, hot-plug and polling
//! - [`mapping`] - profile model and the action graph evaluator
//! - [`output`] - virtual device contract and the diffing output sink
//! - [`engine`] - scheduler state machine and the public engine handle
//! - [`persistence`] - versioned TOML profile documents
//! - [`config`] - engine settings

pub mod config;
pub mod controller;
pub mod engine;
pub mod mapping;
pub mod output;
pub mod persistence;

pub use config::EngineConfig;
pub use engine::{EngineEvent, EngineEventKind, EngineHandle, EngineStatus};
pub use mapping::Profile;
