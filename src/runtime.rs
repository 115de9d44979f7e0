use color_eyre::eyre::Result;
use futures::stream::StreamExt;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    application::Application,
    command::{Action, Command},
    subscription::SubscriptionManager,
};

/// Drives an [`Application`]: delivers messages to `update`, executes the
/// commands it returns and keeps its subscriptions in sync.
///
/// # Example
///
/// ```rust,ignore
/// let client = Arc::new(QueryClient::new(api::catalog()?, api::sample_backend()));
/// let app = Runtime::<FlashcardBoard>::new(client).run().await?;
/// ```
pub struct Runtime<A: Application> {
    app: A,
    init: Option<Command<A::Message>>,
    tx: mpsc::UnboundedSender<A::Message>,
    rx: mpsc::UnboundedReceiver<A::Message>,
    quit: CancellationToken,
    commands: JoinSet<()>,
    subscription_manager: SubscriptionManager<A::Message>,
}

impl<A: Application> Runtime<A> {
    pub fn new(flags: A::Flags) -> Self {
        let (app, init) = A::new(flags);
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription_manager = SubscriptionManager::new(tx.clone());

        Self {
            app,
            init: Some(init),
            tx,
            rx,
            quit: CancellationToken::new(),
            commands: JoinSet::new(),
            subscription_manager,
        }
    }

    pub const fn app(&self) -> &A {
        &self.app
    }

    /// A token that stops the runtime when cancelled, like [`Action::Quit`].
    #[must_use]
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }

    fn spawn(&mut self, cmd: Command<A::Message>) {
        let Some(mut stream) = cmd.stream else {
            return;
        };
        let tx = self.tx.clone();
        let quit = self.quit.clone();

        self.commands.spawn(async move {
            while let Some(action) = stream.next().await {
                match action {
                    Action::Message(msg) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Action::Quit => {
                        quit.cancel();
                        break;
                    }
                }
            }
        });
    }

    fn process_message(&mut self, msg: A::Message) {
        let cmd = self.app.update(msg);
        self.spawn(cmd);

        // Restart subscriptions if needed
        self.subscription_manager.update(self.app.subscriptions());

        // Reap finished commands
        while self.commands.try_join_next().is_some() {}
    }

    /// Runs until a command emits [`Action::Quit`] (or the quit token is
    /// cancelled), then unmounts every subscription, aborts pending
    /// commands and returns the application.
    ///
    /// # Errors
    ///
    /// Returns an error if a command or subscription task panicked.
    pub async fn run(mut self) -> Result<A> {
        if let Some(init) = self.init.take() {
            self.spawn(init);
        }
        self.subscription_manager.update(self.app.subscriptions());
        tracing::debug!(subscriptions = self.subscription_manager.len(), "Runtime started");

        loop {
            tokio::select! {
                biased;
                () = self.quit.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.process_message(msg),
                    None => break,
                },
            }
        }

        tracing::debug!("Runtime stopping");
        self.subscription_manager.shutdown().await;
        self.commands.abort_all();
        while let Some(joined) = self.commands.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                return Err(e.into());
            }
        }

        Ok(self.app)
    }
}
