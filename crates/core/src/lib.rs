//! Hearth Core Library Crate
//!
//! This library contains the domain logic shared by the Hearth services:
//! the scheduling-backend client, the tool registry exposed to the voice
//! agent, and the change-notification broadcast that keeps independent
//! views in sync after a mutation.

pub mod notify;
pub mod schedule;
pub mod tools;
