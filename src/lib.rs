//! pagewatch: poll web pages on an interval and notify when their content
//! changes.
//!
//! Layers, inner to outer: `domain` (watch model, fingerprinting, state
//! transitions), `application` (ports, the per-watch check loop and the
//! supervisor that owns the loops), `infrastructure` (HTTP fetcher,
//! repositories, notifiers) and `interfaces` (config, CLI, control API).

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
