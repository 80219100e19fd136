//! Aggregate layer for saga participants.
//!
//! - [`Aggregate`] and [`DomainEvent`] for event-sourced entities
//! - [`CommandHandler`], which appends command outcomes and embeds optional
//!   saga metadata into every produced event

pub mod aggregate;
pub mod command;
pub mod error;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{CommandHandler, CommandResult};
pub use error::DomainError;
