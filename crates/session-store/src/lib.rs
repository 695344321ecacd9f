//! Session store for the InstaClone client.
//!
//! Holds the single authoritative session, derived only from backend auth
//! events.
//!
//! # Design Principles
//!
//! - The auth listener is registered before the initial session read
//! - The initial read is applied first, then buffered events in emission order
//! - Sign-in, sign-up and sign-out never write the session directly
//! - Releasing the listener is synchronous
//! - A session past its expiry is refreshed through the backend or cleared

mod change;
mod store;

pub use change::{SessionChange, SessionTransition};
pub use store::{SessionListener, SessionStore};

#[cfg(test)]
mod tests;
