//! Realtime conversation session management: transcript reconciliation,
//! turn-taking, session lifecycle, history and titles. Network and device
//! access stay behind the traits in [`realtime_api`].

pub mod error;
pub mod generic_types;
pub mod history;
pub mod item;
pub mod lifecycle;
pub mod persona;
pub mod realtime_api;
pub mod session;
pub mod title;
pub mod transcript;
pub mod turn;

#[cfg(test)]
mod fakes;

pub use error::{HistoryError, PersonaError, SessionError};
pub use lifecycle::{SessionHandle, SessionManager};
