//! Flashcard board driven by the query layer.
//!
//! This demo shows:
//! - Query bindings for categories and flashcards, sharing the cache
//! - An optimistic create: the new card is listed before the server answers
//! - The flashcard list refetching on its own once the create succeeds
//! - The "server unavailable" state when the backend cannot be reached
//!
//! Settings come from `toeic.toml` and `TOEIC_*` environment variables. Set
//! `TOEIC_API_MOCK=true` to run against the in-memory sample backend.
//!
//! Run with: `RUST_LOG=info cargo run --example flashcards`

use std::sync::Arc;

use color_eyre::eyre::Result;
use serde_json::Value;
use toeic_query::api::list::{self, ListQuery, SortKey};
use toeic_query::api::{self, Category, Flashcard, NewFlashcard, ops};
use toeic_query::config::Settings;
use toeic_query::prelude::*;
use toeic_query::transport::Transport;
use toeic_query::transport::http::HttpTransport;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const NEW_WORD: &str = "audit";

#[derive(Debug)]
enum Message {
    Categories(QueryResult<Vec<Category>>),
    Cards(QueryResult<Vec<Flashcard>>),
    Created(MutationResult<Flashcard>),
}

struct Board {
    client: Arc<QueryClient>,
    categories: Vec<Category>,
    created: bool,
}

impl Board {
    fn create_card(&mut self) -> Command<Message> {
        self.created = true;
        let card = NewFlashcard {
            word: NEW_WORD.to_string(),
            definition: "an official inspection of accounts".to_string(),
            example: Some("The auditors arrive on Monday.".to_string()),
            category_id: self.categories.first().map(|category| category.id),
        };

        // Listed right away under a placeholder id until the refetch lands.
        let mut placeholder = card.to_args();
        placeholder["id"] = Value::from(0);
        let target = self.client.key(ops::GET_FLASHCARDS, &Value::Null);

        Mutation::new(self.client.clone(), ops::CREATE_FLASHCARD)
            .trigger_optimistic(card.to_args(), &target, move |cards| {
                let mut cards = cards.as_array().cloned().unwrap_or_default();
                cards.push(placeholder.clone());
                Value::Array(cards)
            })
            .map_or_else(
                |e| {
                    warn!("Cannot create flashcard: {e}");
                    Command::effect(Action::Quit)
                },
                |cmd| cmd.map(Message::Created),
            )
    }

    fn show(cards: &[Flashcard], is_stale: bool) {
        let query = ListQuery {
            sort: SortKey::Word,
            per_page: 0,
            ..ListQuery::default()
        };
        let page = list::apply(cards, &query);
        info!(total = page.total_items, is_stale, "Flashcards");
        for card in &page.items {
            info!("  #{:<3} {:<12} {}", card.id, card.word, card.definition);
        }
    }
}

impl Application for Board {
    type Message = Message;
    type Flags = Arc<QueryClient>;

    fn new(client: Arc<QueryClient>) -> (Self, Command<Message>) {
        let board = Self {
            client,
            categories: Vec::new(),
            created: false,
        };
        (board, Command::none())
    }

    fn update(&mut self, msg: Message) -> Command<Message> {
        match msg {
            Message::Categories(result) => {
                if let Some(categories) = result.data() {
                    info!(count = categories.len(), "Categories loaded");
                    self.categories.clone_from(categories);
                }
                Command::none()
            }
            Message::Cards(result) => {
                if result.is_disconnected() {
                    warn!("Server unavailable; is the backend running?");
                    return Command::effect(Action::Quit);
                }
                if let Some(error) = result.error() {
                    warn!("Cannot load flashcards: {error}");
                }
                let Some(cards) = result.data() else {
                    info!("Loading flashcards...");
                    return Command::none();
                };
                Self::show(cards, result.is_stale());

                let listed = cards.iter().any(|card| card.word == NEW_WORD && card.id != 0);
                match (self.created, result.is_stale()) {
                    (false, false) => self.create_card(),
                    (true, false) if listed => Command::effect(Action::Quit),
                    _ => Command::none(),
                }
            }
            Message::Created(result) => {
                if let Some(card) = result.data() {
                    info!(id = card.id, "Flashcard created");
                } else if let Some(error) = result.error() {
                    warn!("Create failed: {error}");
                    return Command::effect(Action::Quit);
                }
                Command::none()
            }
        }
    }

    fn subscriptions(&self) -> Vec<Subscription<Message>> {
        vec![
            Subscription::new(Query::new(self.client.clone(), ops::GET_CATEGORIES, Value::Null))
                .map(Message::Categories),
            Subscription::new(Query::new(self.client.clone(), ops::GET_FLASHCARDS, Value::Null)).map(Message::Cards),
        ]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "toeic_query=info,flashcards=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    let transport: Arc<dyn Transport> = if settings.api.mock {
        info!("Using the in-memory sample backend");
        Arc::new(api::sample_backend())
    } else {
        info!(base_url = %settings.api.base_url, "Using the HTTP backend");
        Arc::new(HttpTransport::from_settings(&settings.api)?)
    };

    let client = Arc::new(QueryClient::from_parts(api::catalog()?, transport, settings.query_config()));
    let board = Runtime::<Board>::new(client.clone()).run().await?;

    info!(
        categories = board.categories.len(),
        cached_entries = client.store().len(),
        "Done"
    );
    Ok(())
}
