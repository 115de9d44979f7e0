use futures::{
    FutureExt, Stream, StreamExt,
    stream::{self, BoxStream, select_all},
};

/// An action that can be performed by a command.
///
/// Actions are emitted by command streams and processed by the runtime.
pub enum Action<Msg> {
    /// Send a message to the application's update function.
    ///
    /// Mutation results, cache notifications and any other asynchronous
    /// outcome reach the application this way.
    Message(Msg),

    /// Request the application to quit.
    ///
    /// The runtime stops its loop, cancels every running subscription
    /// (releasing the cache entries they hold) and returns the application.
    Quit,
}

/// A command that can be executed to perform side effects.
///
/// Commands are returned from `Application::new` and `Application::update`
/// and are executed by the runtime. Mutations and manual cache
/// invalidations are expressed as commands so that `update` stays free of
/// direct I/O.
///
/// # Examples
///
/// ```
/// use toeic_query::command::Command;
///
/// enum Message {
///     Saved(u64),
/// }
///
/// let cmd = Command::perform(async { 7 }, Message::Saved);
/// ```
pub struct Command<Msg: Send + 'static> {
    pub(crate) stream: Option<BoxStream<'static, Action<Msg>>>,
}

impl<Msg: Send + 'static> Command<Msg> {
    /// Create a command that does nothing.
    ///
    /// ```
    /// use toeic_query::command::Command;
    ///
    /// let cmd: Command<i32> = Command::none();
    /// assert!(cmd.is_none());
    /// ```
    #[must_use]
    pub fn none() -> Self {
        Self { stream: None }
    }

    /// Returns `true` if the command performs no work.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.stream.is_none()
    }

    /// Perform an asynchronous operation and convert its result to a message.
    pub fn perform<A>(
        future: impl Future<Output = A> + Send + 'static,
        f: impl FnOnce(A) -> Msg + Send + 'static,
    ) -> Self {
        Self::future(future.map(f))
    }

    /// Create a command from a future that produces a message.
    pub fn future(future: impl Future<Output = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(future.into_stream().map(Action::Message).boxed()),
        }
    }

    /// Create a command that delivers `msg` on the next turn of the runtime.
    pub fn message(msg: Msg) -> Self {
        Self::effect(Action::Message(msg))
    }

    /// Create a command that performs a single action immediately.
    ///
    /// ```
    /// use toeic_query::command::{Action, Command};
    ///
    /// let cmd: Command<i32> = Command::effect(Action::Quit);
    /// ```
    pub fn effect(action: Action<Msg>) -> Self {
        Self {
            stream: Some(stream::once(async move { action }).boxed()),
        }
    }

    /// Batch multiple commands into a single command.
    ///
    /// All commands run concurrently, so message order across them is not
    /// guaranteed. `Command::none()` entries are filtered out.
    pub fn batch(commands: impl IntoIterator<Item = Command<Msg>>) -> Self {
        let streams: Vec<_> = commands.into_iter().filter_map(|cmd| cmd.stream).collect();

        if streams.is_empty() {
            Self::none()
        } else {
            Self {
                stream: Some(select_all(streams).boxed()),
            }
        }
    }

    /// Create a command from a stream of messages.
    pub fn stream(stream: impl Stream<Item = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(stream.map(Action::Message).boxed()),
        }
    }

    /// Convert every message produced by this command.
    ///
    /// ```
    /// use toeic_query::command::Command;
    ///
    /// enum Message {
    ///     Count(usize),
    /// }
    ///
    /// let cmd = Command::future(async { 3_usize }).map(Message::Count);
    /// ```
    pub fn map<NewMsg>(self, f: impl Fn(Msg) -> NewMsg + Send + Sync + 'static) -> Command<NewMsg>
    where
        NewMsg: Send + 'static,
    {
        Command {
            stream: self.stream.map(move |stream| {
                stream
                    .map(move |action| match action {
                        Action::Message(msg) => Action::Message(f(msg)),
                        Action::Quit => Action::Quit,
                    })
                    .boxed()
            }),
        }
    }
}
