//! # Fibrant
//!
//! A structured-concurrency effect runtime: lazy, rerunnable effect values
//! executed on fibers that can be forked, joined and interrupted, with retry
//! schedules, a resource gauge and service injection.
//!
//! ## Usage
//!
//! ```bash
//! fibrant list [--parallelism N|unbounded] [--deadline 5s] [--json]
//! ```
//!
//! ## Modules
//!
//! - `effect` - Effect values, combinators and exits
//! - `runtime` - Fiber executor: run, fork, join and interrupt
//! - `schedule` - Retry schedules with configurable backoff
//! - `gauge` - Resource gauge reporting busy/idle transitions
//! - `context` - Service context for dependency injection
//! - `todos` - Todo list joined with users, over HTTP or scripted services
//! - `config` - Configuration management for the tool
//! - `testing` - Testing utilities and scripted services
pub mod config;
pub mod context;
pub mod effect;
pub mod error;
pub mod gauge;
pub mod runtime;
pub mod schedule;
pub mod todos;

pub mod testing;

#[cfg(test)]
mod property_tests;
