use crate::{command::Command, subscription::Subscription};

/// A rendering unit following the Elm Architecture.
///
/// The application owns its state, changes it only in [`update`], and
/// declares in [`subscriptions`] which long-lived sources (query bindings,
/// mostly) it is bound to right now. The runtime re-reads the subscriptions
/// after every update: a binding that appears is mounted, one that
/// disappears is unmounted. Drawing is left to the embedding program.
///
/// [`update`]: Application::update
/// [`subscriptions`]: Application::subscriptions
///
/// # Type Parameters
///
/// * `Message` - The type of messages that your application handles. Must be `Send + 'static`.
/// * `Flags` - Configuration data passed at initialization. Must be `Clone + Send`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use serde_json::Value;
/// use toeic_query::api::{self, Category};
/// use toeic_query::prelude::*;
/// use toeic_query::query::{Query, QueryClient, QueryResult};
///
/// enum Message {
///     Categories(QueryResult<Vec<Category>>),
/// }
///
/// struct CategoryList {
///     client: Arc<QueryClient>,
///     categories: Option<QueryResult<Vec<Category>>>,
/// }
///
/// impl Application for CategoryList {
///     type Message = Message;
///     type Flags = Arc<QueryClient>;
///
///     fn new(client: Arc<QueryClient>) -> (Self, Command<Message>) {
///         (Self { client, categories: None }, Command::none())
///     }
///
///     fn update(&mut self, msg: Message) -> Command<Message> {
///         match msg {
///             Message::Categories(result) => self.categories = Some(result),
///         }
///         Command::none()
///     }
///
///     fn subscriptions(&self) -> Vec<Subscription<Message>> {
///         vec![
///             Subscription::new(Query::new(
///                 self.client.clone(),
///                 api::ops::GET_CATEGORIES,
///                 Value::Null,
///             ))
///             .map(Message::Categories),
///         ]
///     }
/// }
/// ```
pub trait Application: Sized {
    /// The type of messages your application processes.
    ///
    /// Messages represent all possible events that can occur in your application.
    /// They are produced by subscriptions (query results) and commands
    /// (mutation results).
    type Message: Send + 'static;

    /// Configuration data for initializing your application.
    ///
    /// Usually the shared `Arc<QueryClient>`. Use `()` if no configuration is
    /// needed.
    type Flags: Clone + Send;

    /// Initialize the application with the given flags.
    ///
    /// This method is called once when the application starts. It returns
    /// the initial state and an optional command to run at startup.
    fn new(flags: Self::Flags) -> (Self, Command<Self::Message>);

    /// Process a message and update the application state.
    ///
    /// All state changes happen here in response to messages. The method can
    /// return a command to perform asynchronous operations.
    ///
    /// # Examples
    ///
    /// ```
    /// # use toeic_query::{application::Application, command::{Command, Action}};
    /// # use toeic_query::subscription::Subscription;
    /// # struct MyApp;
    /// # enum Message { Save, Quit }
    /// # impl Application for MyApp {
    /// #     type Message = Message;
    /// #     type Flags = ();
    /// #     fn new(_: ()) -> (Self, Command<Message>) { (MyApp, Command::none()) }
    /// fn update(&mut self, msg: Message) -> Command<Message> {
    ///     match msg {
    ///         Message::Save => {
    ///             Command::perform(async { /* save */ }, |_| Message::Quit)
    ///         }
    ///         Message::Quit => Command::effect(Action::Quit),
    ///     }
    /// }
    /// #     fn subscriptions(&self) -> Vec<Subscription<Message>> { vec![] }
    /// # }
    /// ```
    fn update(&mut self, msg: Self::Message) -> Command<Self::Message>;

    /// The subscriptions the application is bound to in its current state.
    ///
    /// Called after initialization and after every update. Returning the
    /// same subscription (same id) again keeps it running; leaving it out
    /// cancels it.
    fn subscriptions(&self) -> Vec<Subscription<Self::Message>>;
}
