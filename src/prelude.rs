//! Prelude module for convenient imports.
//!
//! ```
//! use toeic_query::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`Application`] - The main application trait
//! - [`Command`] - For performing side effects
//! - [`Action`] - Actions that commands can perform
//! - [`Subscription`] - For binding to long-lived sources
//! - [`Runtime`] - The application runtime
//! - [`QueryClient`], [`Query`], [`Mutation`] and their results
//! - [`Tag`] - Invalidation tags

pub use crate::application::Application;
pub use crate::command::{Action, Command};
pub use crate::query::{
    Mutation, MutationResult, MutationState, Query, QueryClient, QueryError, QueryResult, QueryState, Tag,
};
pub use crate::runtime::Runtime;
pub use crate::subscription::Subscription;
