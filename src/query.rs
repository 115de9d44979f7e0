//! Typed remote-resource cache with tag-based invalidation.
//!
//! This module provides subscription-based queries and command-based
//! mutations over a shared cache, similar to SWR, TanStack Query or RTK Query.
//!
//! # Features
//!
//! - **Registry**: every remote operation is declared once, with the tags it
//!   provides (queries) or invalidates (mutations)
//! - **Queries**: subscription-based fetching with deduplication, stale data
//!   while refetching, and eviction once no binding uses an entry
//! - **Mutations**: command-based writes with synchronous validation and
//!   optional optimistic patches
//! - **Invalidation**: a successful mutation refetches every mounted query
//!   whose result carries one of the mutation's tags
//!
//! # Example
//!
//! ```rust,ignore
//! use toeic_query::prelude::*;
//! use toeic_query::query::{Mutation, Query, QueryClient, QueryResult};
//! use std::sync::Arc;
//!
//! struct App {
//!     client: Arc<QueryClient>,
//!     cards: QueryResult<Vec<Flashcard>>,
//! }
//!
//! impl Application for App {
//!     fn subscriptions(&self) -> Vec<Subscription<Message>> {
//!         vec![
//!             Subscription::new(Query::new(self.client.clone(), "getFlashcards", Value::Null))
//!                 .map(Message::Cards),
//!         ]
//!     }
//!
//!     fn update(&mut self, msg: Message) -> Command<Message> {
//!         match msg {
//!             Message::Cards(result) => {
//!                 self.cards = result;
//!                 Command::none()
//!             }
//!             Message::Delete(id) => Mutation::<Flashcard>::new(self.client.clone(), "deleteFlashcard")
//!                 .trigger(json!({ "id": id }))
//!                 .map_or_else(|_| Command::none(), |cmd| cmd.map(Message::Deleted)),
//!             // `getFlashcards` is refetched without any code here.
//!             Message::Deleted(_) => Command::none(),
//!         }
//!     }
//! }
//! ```

mod binding;
mod cache;
mod client;
mod config;
mod invalidation;
mod key;
mod mutation;
mod registry;
mod store;
mod tag;

pub use binding::{Query, QueryError, QueryResult, QueryState};
pub use cache::Status;
pub use client::QueryClient;
pub use config::QueryConfig;
pub use invalidation::InvalidationGraph;
pub use key::QueryKey;
pub use mutation::{Mutation, MutationResult, MutationState};
pub use registry::{Operation, OperationKind, Registry, RegistryError, ValidationError};
pub use store::{
    CacheEvent, CacheStore, Change, EntrySnapshot, FetchGuard, FetchTicket, Resolution, SubscriptionGuard,
};
pub use tag::{Tag, TagSet};
