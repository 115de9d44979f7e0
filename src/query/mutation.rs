//! Mutation bindings: one-off writes that invalidate cached reads.
//!
//! # Design Pattern: Transaction-based Operations
//!
//! Mutations use the **transaction-based** pattern. Triggering one returns a
//! `Command` because a write is a discrete side effect with a clear start and
//! end. Arguments are validated before the command exists, so a missing field
//! is reported synchronously and no request is ever sent.
//!
//! When the server accepts the write, every entry tagged with one of the
//! operation's invalidated tags is invalidated *before* the success message
//! is delivered, so mounted queries are already refetching when the
//! application sees the result.
//!
//! # Example
//!
//! ```rust,ignore
//! use toeic_query::prelude::*;
//! use toeic_query::query::{Mutation, MutationResult};
//!
//! fn update(&mut self, msg: Message) -> Command<Message> {
//!     match msg {
//!         Message::Delete(id) => match self.delete.trigger(json!({ "id": id })) {
//!             Ok(cmd) => cmd.map(Message::Deleted),
//!             Err(e) => {
//!                 self.form_error = Some(e.to_string());
//!                 Command::none()
//!             }
//!         },
//!         Message::Deleted(result) => {
//!             self.deleting = result.is_loading();
//!             Command::none()
//!         }
//!     }
//! }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::transport::Request;

use super::binding::QueryError;
use super::cache::Patch;
use super::client::QueryClient;
use super::key::QueryKey;
use super::registry::{OperationKind, ValidationError};
use super::store::CacheStore;

/// The state of a mutation result.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    /// Mutation is idle (not yet started).
    Idle,
    /// Mutation is in progress.
    Loading,
    /// Mutation succeeded with a result.
    Success(T),
    /// Mutation failed with an error.
    Error(QueryError),
}

/// A mutation result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult<T> {
    /// The current state of the mutation.
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    pub const fn idle() -> Self {
        Self {
            state: MutationState::Idle,
        }
    }

    const fn loading() -> Self {
        Self {
            state: MutationState::Loading,
        }
    }

    fn settled(result: Result<T, QueryError>) -> Self {
        let state = match result {
            Ok(data) => MutationState::Success(data),
            Err(error) => MutationState::Error(error),
        };
        Self { state }
    }

    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    pub const fn error(&self) -> Option<&QueryError> {
        match &self.state {
            MutationState::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if the mutation is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, MutationState::Loading)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }
}

impl<T> Default for MutationResult<T> {
    fn default() -> Self {
        Self::idle()
    }
}

/// A trigger for one registered mutation operation.
///
/// # Example
///
/// ```rust,ignore
/// let create = Mutation::<Flashcard>::new(client.clone(), "createFlashcard");
/// let card = create.run(json!({ "word": "ledger", "categoryId": 2 })).await?;
/// ```
pub struct Mutation<T> {
    client: Arc<QueryClient>,
    operation: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Mutation<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            operation: self.operation.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Mutation<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(client: Arc<QueryClient>, operation: &str) -> Self {
        Self {
            client,
            operation: operation.to_string(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Validates `args` and builds the request without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Missing`] for the first required field that
    /// is absent, null or blank, or [`ValidationError::Registry`] if the
    /// operation is unknown, is not a mutation, or its path cannot be filled.
    pub fn prepare(&self, args: &Value) -> Result<Request, ValidationError> {
        let operation = self
            .client
            .registry()
            .get_kind(&self.operation, OperationKind::Mutation)?;
        operation.validate(args)?;
        Ok(operation.request(args)?)
    }

    /// Starts the mutation.
    ///
    /// The returned command emits `Loading`, then `Success` or `Error`.
    ///
    /// # Errors
    ///
    /// Validation failures are returned here, before any request is made.
    pub fn trigger(&self, args: Value) -> Result<Command<MutationResult<T>>, ValidationError> {
        let request = self.prepare(&args)?;
        Ok(self.command(request, None))
    }

    /// Starts the mutation with an optimistic patch over `target`.
    ///
    /// Bindings on `target` see `patch` applied immediately. If the server
    /// accepts the write, the patched value is kept (marked stale) until the
    /// invalidation refetch replaces it; if it fails, or the command is
    /// dropped, the patch is rolled back. When `target` is not cached the
    /// mutation runs without a patch.
    ///
    /// # Errors
    ///
    /// Validation failures are returned here; the patch is never applied.
    pub fn trigger_optimistic<F>(
        &self,
        args: Value,
        target: &QueryKey,
        patch: F,
    ) -> Result<Command<MutationResult<T>>, ValidationError>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let request = self.prepare(&args)?;
        let overlay = OverlayGuard::push(self.client.store(), target, Arc::new(patch));
        Ok(self.command(request, overlay))
    }

    /// Runs the mutation to completion outside the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] before any request is made, or the
    /// transport or decode failure of the request itself.
    pub async fn run(&self, args: Value) -> Result<T, QueryError> {
        let request = self.prepare(&args)?;
        let result = send(&self.client, &self.operation, request).await;
        settle(&self.client, &self.operation, result)
    }

    fn command(&self, request: Request, overlay: Option<OverlayGuard>) -> Command<MutationResult<T>> {
        let client = self.client.clone();
        let operation = self.operation.clone();

        let outcome = async move {
            let result = send(&client, &operation, request).await;
            // Commit before invalidating so a refetch never lands under a
            // still-pending patch.
            if let Some(overlay) = overlay {
                if result.is_ok() {
                    overlay.commit();
                } else {
                    drop(overlay);
                }
            }
            MutationResult::settled(settle(&client, &operation, result))
        };

        Command::stream(stream::once(async { MutationResult::loading() }).chain(stream::once(outcome)))
    }
}

async fn send(client: &QueryClient, operation: &str, request: Request) -> Result<Value, QueryError> {
    tracing::debug!(operation, %request, "Mutation started");
    client.execute(request, CancellationToken::new()).await.map_err(|e| {
        tracing::debug!(operation, status = e.status, message = %e.message, "Mutation failed");
        QueryError::from(e)
    })
}

/// Invalidates on success, then decodes the payload.
fn settle<T: DeserializeOwned>(client: &QueryClient, operation: &str, result: Result<Value, QueryError>) -> Result<T, QueryError> {
    let value = result?;
    client.graph().on_mutation_success(client.store(), operation);
    serde_json::from_value(value).map_err(|e| QueryError::Decode(e.to_string()))
}

/// An optimistic patch that is rolled back unless committed.
struct OverlayGuard {
    store: CacheStore,
    key: QueryKey,
    id: Option<u64>,
}

impl OverlayGuard {
    fn push(store: &CacheStore, key: &QueryKey, patch: Patch) -> Option<Self> {
        let id = store.push_overlay(key, patch)?;
        Some(Self {
            store: store.clone(),
            key: key.clone(),
            id: Some(id),
        })
    }

    fn commit(mut self) {
        if let Some(id) = self.id.take() {
            self.store.commit_overlay(&self.key, id);
        }
    }
}

impl Drop for OverlayGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.store.remove_overlay(&self.key, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Action;
    use crate::query::{FetchTicket, Operation, Registry, Tag, TagSet};
    use crate::transport::Method;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    fn client(mock: &MockTransport) -> Arc<QueryClient> {
        let mut registry = Registry::new();
        for op in [
            Operation::query("getFlashcards", "/flashcards").provides([Tag::Flashcard]),
            Operation::mutation("createFlashcard", Method::Post, "/flashcards")
                .invalidates([Tag::Flashcard])
                .require("word"),
            Operation::mutation("deleteFlashcard", Method::Delete, "/flashcards/{id}")
                .invalidates([Tag::Flashcard]),
        ] {
            registry.register(op).expect("valid operation");
        }
        Arc::new(QueryClient::new(registry, mock.clone()))
    }

    async fn collect<T: Send + 'static>(cmd: Command<MutationResult<T>>) -> Vec<MutationResult<T>> {
        let stream = cmd.stream.expect("mutation produces a stream");
        stream
            .filter_map(|action| async move {
                match action {
                    Action::Message(msg) => Some(msg),
                    Action::Quit => None,
                }
            })
            .collect()
            .await
    }

    fn fill(client: &QueryClient, key: &QueryKey, value: Value) {
        let FetchTicket::Perform(guard) = client.store().begin_fetch(key) else {
            panic!("expected to own the fetch");
        };
        guard.complete(Ok(value), &TagSet::from([Tag::Flashcard]));
    }

    #[test]
    fn test_mutation_result_predicates() {
        let result: MutationResult<i32> = MutationResult::default();
        assert!(!result.is_loading() && !result.is_success() && !result.is_error());
        assert!(MutationResult::<i32>::loading().is_loading());
        assert_eq!(MutationResult::settled(Ok(42)).data(), Some(&42));
        assert!(MutationResult::<i32>::settled(Err(QueryError::Decode("bad".to_string()))).is_error());
    }

    #[tokio::test]
    async fn test_validation_fails_before_any_request() {
        let mock = MockTransport::new();
        let mutation = Mutation::<Value>::new(client(&mock), "createFlashcard");

        let err = mutation.trigger(json!({ "word": "" })).err();
        assert_eq!(
            err,
            Some(ValidationError::Missing {
                field: "word".to_string()
            })
        );
        assert_eq!(err.map(|e| e.to_string()), Some("word is required".to_string()));
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_trigger_on_query_operation_is_rejected() {
        let mock = MockTransport::new();
        let mutation = Mutation::<Value>::new(client(&mock), "getFlashcards");
        assert!(matches!(
            mutation.trigger(Value::Null),
            Err(ValidationError::Registry(_))
        ));
    }

    #[tokio::test]
    async fn test_trigger_emits_loading_then_success() {
        let mock = MockTransport::new().with_collection("flashcards", vec![]);
        let mutation = Mutation::<Value>::new(client(&mock), "createFlashcard");

        let cmd = mutation.trigger(json!({ "word": "ledger" })).expect("valid args");
        let results = collect(cmd).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_loading());
        assert_eq!(results[1].data(), Some(&json!({ "id": 1, "word": "ledger" })));
        assert_eq!(mock.calls(Method::Post, "/flashcards"), 1);
    }

    #[tokio::test]
    async fn test_success_invalidates_before_delivery() {
        let mock = MockTransport::new().with_collection("flashcards", vec![json!({"id": 1})]);
        let client = client(&mock);
        let key = client.key("getFlashcards", &Value::Null);
        fill(&client, &key, json!([{"id": 1}]));

        let result = Mutation::<Value>::new(client.clone(), "deleteFlashcard")
            .run(json!({ "id": 1 }))
            .await;
        assert_eq!(result, Ok(json!({"id": 1})));

        // Unsubscribed entries drop their value on invalidation.
        let snapshot = client.store().snapshot(&key).expect("entry exists");
        assert!(snapshot.value.is_none());
    }

    #[tokio::test]
    async fn test_failure_does_not_invalidate() {
        let mock = MockTransport::new();
        mock.fail_next(Method::Delete, "/flashcards/1", 500, json!({"message": "boom"}));
        let client = client(&mock);
        let key = client.key("getFlashcards", &Value::Null);
        fill(&client, &key, json!([{"id": 1}]));

        let err = Mutation::<Value>::new(client.clone(), "deleteFlashcard")
            .run(json!({ "id": 1 }))
            .await
            .err();
        assert_eq!(err.as_ref().and_then(QueryError::status), Some(500));
        assert_eq!(err.map(|e| e.to_string()), Some("boom".to_string()));
        assert_eq!(
            client.store().snapshot(&key).and_then(|s| s.value),
            Some(json!([{"id": 1}]))
        );
    }

    #[tokio::test]
    async fn test_optimistic_patch_rolls_back_on_failure() {
        let mock = MockTransport::new();
        mock.fail_next(Method::Delete, "/flashcards/1", 404, json!({"message": "Not found"}));
        let client = client(&mock);
        let key = client.key("getFlashcards", &Value::Null);
        let _sub = client.store().acquire(&key);
        fill(&client, &key, json!([{"id": 1}, {"id": 2}]));

        let cmd = Mutation::<Value>::new(client.clone(), "deleteFlashcard")
            .trigger_optimistic(json!({ "id": 1 }), &key, |cards| {
                json!(
                    cards
                        .as_array()
                        .map(|items| items.iter().filter(|c| c["id"] != 1).cloned().collect::<Vec<_>>())
                        .unwrap_or_default()
                )
            })
            .expect("valid args");

        assert_eq!(client.store().snapshot(&key).and_then(|s| s.value), Some(json!([{"id": 2}])));

        let results = collect(cmd).await;
        assert!(results[1].is_error());
        assert_eq!(
            client.store().snapshot(&key).and_then(|s| s.value),
            Some(json!([{"id": 1}, {"id": 2}]))
        );
    }

    #[tokio::test]
    async fn test_optimistic_patch_is_kept_on_success() {
        let mock = MockTransport::new().with_collection("flashcards", vec![json!({"id": 1}), json!({"id": 2})]);
        let client = client(&mock);
        let key = client.key("getFlashcards", &Value::Null);
        let _sub = client.store().acquire(&key);
        fill(&client, &key, json!([{"id": 1}, {"id": 2}]));

        let cmd = Mutation::<Value>::new(client.clone(), "deleteFlashcard")
            .trigger_optimistic(json!({ "id": 1 }), &key, |_| json!([{"id": 2}]))
            .expect("valid args");
        let results = collect(cmd).await;
        assert!(results[1].is_success());

        let snapshot = client.store().snapshot(&key).expect("entry exists");
        assert_eq!(snapshot.value, Some(json!([{"id": 2}])));
        assert!(snapshot.is_stale, "the refetch replaces the patched value");
        assert!(client.store().should_fetch(&key));
    }

    #[tokio::test]
    async fn test_dropped_command_rolls_back() {
        let mock = MockTransport::new();
        let client = client(&mock);
        let key = client.key("getFlashcards", &Value::Null);
        fill(&client, &key, json!([1]));

        let cmd = Mutation::<Value>::new(client.clone(), "deleteFlashcard")
            .trigger_optimistic(json!({ "id": 1 }), &key, |_| json!([]))
            .expect("valid args");
        assert_eq!(client.store().snapshot(&key).and_then(|s| s.value), Some(json!([])));

        drop(cmd);
        assert_eq!(client.store().snapshot(&key).and_then(|s| s.value), Some(json!([1])));
        assert_eq!(mock.total_calls(), 0);
    }
}
