//! Presence tracking and host election

pub mod participant;
pub mod tracker;

pub use participant::Participant;
pub use tracker::{PresenceChange, PresenceTracker};
