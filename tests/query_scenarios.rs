// Stream-level tests of query bindings against the in-memory backend.
// Each test drives `Query::stream()` directly, without a runtime, so the
// exact sequence of emitted results can be asserted.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Value, json};
use toeic_query::{
    api::{self, Category, Flashcard, ops},
    query::{Mutation, Query, QueryClient, QueryConfig, QueryError, QueryResult, Tag},
    subscription::SubscriptionSource,
    transport::{Method, SERVER_DISCONNECTED, mock::MockTransport},
};
use tokio::time::{Duration, sleep, timeout};

fn client(backend: &MockTransport) -> Arc<QueryClient> {
    Arc::new(QueryClient::new(api::catalog().expect("catalog"), backend.clone()))
}

fn flashcards(client: &Arc<QueryClient>) -> BoxStream<'static, QueryResult<Vec<Flashcard>>> {
    Query::new(client.clone(), ops::GET_FLASHCARDS, Value::Null).stream()
}

async fn next<T>(stream: &mut BoxStream<'static, QueryResult<T>>) -> QueryResult<T> {
    timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("binding emits in time")
        .expect("binding is still open")
}

fn len(result: &QueryResult<Vec<Flashcard>>) -> Option<usize> {
    result.data().map(Vec::len)
}

#[tokio::test]
async fn test_offline_backend_reports_disconnected() {
    let backend = api::sample_backend();
    backend.set_offline(true);
    let client = client(&backend);
    let mut categories = Query::<Vec<Category>>::new(client, ops::GET_CATEGORIES, Value::Null).stream();

    assert!(next(&mut categories).await.is_loading());

    let failed = next(&mut categories).await;
    assert!(failed.is_disconnected());
    assert_eq!(failed.error().and_then(QueryError::status), Some(0));
    assert_eq!(failed.error().map(ToString::to_string).as_deref(), Some(SERVER_DISCONNECTED));
    assert!(failed.data().is_none());
}

#[tokio::test]
async fn test_untyped_query_shows_payload_unmodified() {
    let backend = api::sample_backend();
    let client = client(&backend);
    let mut categories = Query::<Value>::new(client, ops::GET_CATEGORIES, Value::Null).stream();

    assert!(next(&mut categories).await.is_loading());
    let loaded = next(&mut categories).await;
    assert_eq!(loaded.data(), Some(&Value::Array(backend.collection("categories"))));
}

#[tokio::test]
async fn test_invalid_mutation_never_reaches_transport() {
    let backend = api::sample_backend();
    let client = client(&backend);

    let result = Mutation::<Flashcard>::new(client, ops::CREATE_FLASHCARD)
        .run(json!({ "word": "  ", "definition": "an inspection of accounts" }))
        .await;

    assert!(matches!(result, Err(QueryError::Validation(_))));
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test]
async fn test_stale_data_shown_while_refetching_and_kept_on_failure() {
    let backend = api::sample_backend();
    let client = client(&backend);
    let mut cards = flashcards(&client);

    assert!(next(&mut cards).await.is_loading());
    let loaded = next(&mut cards).await;
    assert!(loaded.is_success() && !loaded.is_stale());
    assert_eq!(len(&loaded), Some(3));

    backend.fail_next(Method::Get, "/flashcards", 500, json!({ "message": "boom" }));
    client.invalidate_now([Tag::Flashcard]);

    let refetching = next(&mut cards).await;
    assert!(refetching.is_stale(), "cached data stays visible during the refetch");
    assert_eq!(len(&refetching), Some(3));

    let failed = next(&mut cards).await;
    assert!(failed.is_error());
    assert_eq!(failed.error().and_then(QueryError::status), Some(500));
    assert_eq!(failed.error().map(ToString::to_string).as_deref(), Some("boom"));
    assert_eq!(len(&failed), Some(3), "the last good data survives the failure");
}

#[tokio::test]
async fn test_repeated_invalidation_refetches_once() {
    let backend = api::sample_backend();
    let client = client(&backend);
    let key = client.key(ops::GET_FLASHCARDS, &Value::Null);
    let mut cards = flashcards(&client);

    assert!(next(&mut cards).await.is_loading());
    assert!(next(&mut cards).await.is_success());

    assert_eq!(client.store().invalidate([&key]), 1);
    assert_eq!(client.store().invalidate([&key]), 0, "already pending");

    assert!(next(&mut cards).await.is_stale());
    let refreshed = next(&mut cards).await;
    assert!(refreshed.is_success() && !refreshed.is_stale());

    assert!(timeout(Duration::from_millis(100), cards.next()).await.is_err(), "nothing else happens");
    assert_eq!(backend.calls(Method::Get, "/flashcards"), 2);
}

#[tokio::test]
async fn test_invalidation_during_flight_refetches_after_resolve() {
    let backend = api::sample_backend();
    backend.set_latency(Duration::from_millis(50));
    let client = client(&backend);
    let key = client.key(ops::GET_FLASHCARDS, &Value::Null);
    let mut cards = flashcards(&client);

    assert!(next(&mut cards).await.is_loading());

    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(result) = cards.next().await {
            let fresh = result.is_success() && !result.is_stale();
            let refetched = seen.iter().any(QueryResult::is_stale);
            seen.push(result);
            if fresh && refetched {
                break;
            }
        }
        seen
    });

    sleep(Duration::from_millis(10)).await;
    assert!(client.store().snapshot(&key).is_some_and(|s| s.is_fetching));
    client.store().invalidate([&key]);

    let seen = timeout(Duration::from_secs(2), collector)
        .await
        .expect("refetch completes")
        .expect("collector did not panic");

    assert!(seen[0].is_stale(), "the first result lands already stale");
    assert!(seen.last().is_some_and(|r| r.is_success() && !r.is_stale()));
    assert_eq!(backend.calls(Method::Get, "/flashcards"), 2);
}

#[tokio::test]
async fn test_create_refetches_mounted_list() {
    let backend = api::sample_backend();
    let client = client(&backend);
    let mut cards = flashcards(&client);

    assert!(next(&mut cards).await.is_loading());
    assert_eq!(len(&next(&mut cards).await), Some(3));

    let created = Mutation::<Flashcard>::new(client.clone(), ops::CREATE_FLASHCARD)
        .run(json!({ "word": "audit", "definition": "an inspection of accounts", "categoryId": 1 }))
        .await
        .expect("created");
    assert_eq!(created.id, 4);

    let stale = next(&mut cards).await;
    assert!(stale.is_stale());
    assert_eq!(len(&stale), Some(3));

    let refreshed = next(&mut cards).await;
    assert!(!refreshed.is_stale());
    assert_eq!(len(&refreshed), Some(4));
    assert!(
        refreshed
            .data()
            .is_some_and(|cards| cards.iter().any(|card| card.word == "audit"))
    );
}

#[tokio::test]
async fn test_mutation_failure_leaves_queries_alone() {
    let backend = api::sample_backend();
    let client = client(&backend);
    let mut cards = flashcards(&client);

    assert!(next(&mut cards).await.is_loading());
    assert!(next(&mut cards).await.is_success());

    backend.fail_next(Method::Delete, "/flashcards/2", 404, json!({ "message": "Flashcard not found" }));
    let result = Mutation::<Flashcard>::new(client.clone(), ops::DELETE_FLASHCARD)
        .run(json!({ "id": 2 }))
        .await;

    assert_eq!(result.as_ref().err().and_then(QueryError::status), Some(404));
    assert!(timeout(Duration::from_millis(100), cards.next()).await.is_err());
    assert_eq!(backend.calls(Method::Get, "/flashcards"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unused_entry_evicted_after_cache_time() {
    let backend = api::sample_backend();
    let config = QueryConfig::new(Duration::from_secs(60), Duration::from_secs(5));
    let client = Arc::new(QueryClient::with_config(
        api::catalog().expect("catalog"),
        backend.clone(),
        config,
    ));
    let key = client.key(ops::GET_FLASHCARDS, &Value::Null);

    let mut cards = flashcards(&client);
    assert!(next(&mut cards).await.is_loading());
    assert!(next(&mut cards).await.is_success());
    drop(cards);

    // Re-mounting within the grace period reuses the fresh entry.
    sleep(Duration::from_secs(2)).await;
    let mut cards = flashcards(&client);
    let cached = next(&mut cards).await;
    assert!(cached.is_success() && !cached.is_stale());
    assert_eq!(backend.calls(Method::Get, "/flashcards"), 1);

    // The earlier release timer fires while the entry is in use again.
    sleep(Duration::from_secs(4)).await;
    assert!(client.store().snapshot(&key).is_some());
    drop(cards);

    sleep(Duration::from_secs(6)).await;
    assert!(client.store().snapshot(&key).is_none(), "evicted once unused");

    let mut cards = flashcards(&client);
    assert!(next(&mut cards).await.is_loading(), "an evicted entry starts from scratch");
    assert!(next(&mut cards).await.is_success());
    assert_eq!(backend.calls(Method::Get, "/flashcards"), 2);
}
