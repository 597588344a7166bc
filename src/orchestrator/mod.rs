//! Transition orchestration.
//!
//! This module owns the ordering of dispatch waves for every transition command, the
//! run-boundary wait before stop, and writing generated configurations to disk. The CLI
//! layer calls into this module and only renders the events it emits.

mod controller;
mod serialize;

pub(crate) use controller::RunControl;
