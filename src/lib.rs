//! # toeic-query - typed remote-resource cache for the TOEIC study client
//!
//! Screens of the TOEIC client (flashcard boards, category lists, practice
//! tests, exam analysis) read remote data through named operations. This
//! crate caches the results per operation and arguments, shares one request
//! among every screen asking for the same thing, and refetches the right
//! screens when a write succeeds.
//!
//! ## Architecture
//!
//! Screens follow the Elm Architecture:
//!
//! 1. **Model**: your application state
//! 2. **Message**: events that can change the state (query results, mutation results)
//! 3. **Update**: processes messages and updates the model
//! 4. **Subscriptions**: the query bindings the screen is mounted on
//! 5. **Commands**: asynchronous operations that produce messages (mutations)
//!
//! Underneath, the query layer is made of:
//!
//! - [`Registry`](query::Registry): every remote operation, declared once with
//!   the tags it provides or invalidates
//! - [`CacheStore`](query::CacheStore): entries keyed by operation and
//!   arguments, with fetch deduplication and eviction of unused entries
//! - [`InvalidationGraph`](query::InvalidationGraph): which mutation dirties
//!   which entries
//! - [`Transport`](transport::Transport): turns requests into JSON or a
//!   classified [`TransportError`](transport::TransportError)
//! - [`Query`](query::Query) and [`Mutation`](query::Mutation): the bindings
//!   screens use
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::{Value, json};
//! use toeic_query::api::{self, Flashcard};
//! use toeic_query::prelude::*;
//! use toeic_query::query::{Mutation, MutationResult, Query, QueryClient, QueryResult};
//!
//! enum Message {
//!     Cards(QueryResult<Vec<Flashcard>>),
//!     Delete(u64),
//!     Deleted(MutationResult<Flashcard>),
//! }
//!
//! struct Board {
//!     client: Arc<QueryClient>,
//!     cards: Option<QueryResult<Vec<Flashcard>>>,
//! }
//!
//! impl Application for Board {
//!     type Message = Message;
//!     type Flags = Arc<QueryClient>;
//!
//!     fn new(client: Arc<QueryClient>) -> (Self, Command<Message>) {
//!         (Board { client, cards: None }, Command::none())
//!     }
//!
//!     fn update(&mut self, msg: Message) -> Command<Message> {
//!         match msg {
//!             Message::Cards(result) => {
//!                 self.cards = Some(result);
//!                 Command::none()
//!             }
//!             Message::Delete(id) => Mutation::new(self.client.clone(), api::ops::DELETE_FLASHCARD)
//!                 .trigger(json!({ "id": id }))
//!                 .map_or_else(|_| Command::none(), |cmd| cmd.map(Message::Deleted)),
//!             Message::Deleted(_) => Command::none(),
//!         }
//!     }
//!
//!     fn subscriptions(&self) -> Vec<Subscription<Message>> {
//!         vec![
//!             Subscription::new(Query::new(self.client.clone(), api::ops::GET_FLASHCARDS, Value::Null))
//!                 .map(Message::Cards),
//!         ]
//!     }
//! }
//!
//! # async fn run() -> color_eyre::Result<()> {
//! let client = Arc::new(QueryClient::new(api::catalog()?, api::sample_backend()));
//! let _board = Runtime::<Board>::new(client).run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Design Inspiration
//!
//! The runtime follows [iced](https://github.com/iced-rs/iced) 0.12; the
//! cache follows RTK Query and TanStack Query.

pub mod api;
pub mod application;
pub mod command;
pub mod config;
pub mod prelude;
pub mod query;
pub mod runtime;
pub mod subscription;
pub mod transport;

pub use futures::stream::BoxStream;
