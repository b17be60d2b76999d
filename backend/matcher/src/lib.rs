//! Food-donation matching engine.
//!
//! Matches donations to recipient organizations by a weighted score,
//! reserves organization capacity atomically, escalates donations close to
//! their deadline, and reclaims the ones that run out of time.

pub mod allocation;
pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod emergency;
pub mod errors;
pub mod geo;
pub mod intake;
pub mod models;
pub mod reaper;
pub mod scheduler;
pub mod scoring;
pub mod urgency;
