//! TUI application state and main event loop

use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::DefaultTerminal;
use tokio_stream::wrappers::WatchStream;

use super::backend::{Backend, BackendCommand, BackendResponse};
use super::compose::ComposeState;
use super::messages::MessagesState;
use super::sidebar::SidebarState;
use super::ui;
use crate::api::client::ApiClient;
use crate::chat::thread::outgoing_text;
use crate::chat::{ChatThread, ConversationDirectory, PushOutcome};
use crate::config::Config;
use crate::error::ChatError;
use crate::models::{ListingFilter, Message};
use crate::realtime::{ConnectionState, RealtimeChannel, Subscription};

/// Active pane in the TUI
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    #[default]
    Sidebar,
    Messages,
    Compose,
}

impl Pane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pane::Sidebar => "conversations",
            Pane::Messages => "messages",
            Pane::Compose => "compose",
        }
    }

    fn next(self) -> Self {
        match self {
            Pane::Sidebar => Pane::Messages,
            Pane::Messages => Pane::Compose,
            Pane::Compose => Pane::Sidebar,
        }
    }

    fn previous(self) -> Self {
        match self {
            Pane::Sidebar => Pane::Compose,
            Pane::Messages => Pane::Sidebar,
            Pane::Compose => Pane::Messages,
        }
    }
}

/// Work requested by key handling, carried out by the event loop.
#[derive(Debug, PartialEq)]
pub enum Effect {
    Command(BackendCommand),
    /// Subscribe to the thread's pushes, then fetch its contents.
    OpenThread {
        conversation_id: String,
        command: BackendCommand,
    },
}

/// Application state
pub struct App {
    /// Whether the app should exit
    pub should_exit: bool,
    pub user_id: String,
    history_limit: usize,
    pub connection: ConnectionState,
    pub active_pane: Pane,
    pub directory: ConversationDirectory,
    /// Filter of the most recent directory request.
    requested_filter: ListingFilter,
    pub sidebar: SidebarState,
    /// The open thread, if any. Unseeded until its history arrives.
    pub thread: Option<ChatThread>,
    /// Bumped on every thread open; results tagged with an older value
    /// are dropped.
    generation: u64,
    pub messages: MessagesState,
    pub compose: ComposeState,
    /// Id of the message whose text the compose box currently edits.
    pub editing: Option<String>,
    /// Message awaiting a second `d` to confirm deletion.
    pending_delete: Option<String>,
    /// A send is awaiting its acknowledgement.
    pub sending: bool,
    /// The open thread's read receipt went through.
    receipt_sent: bool,
    pub status_message: Option<String>,
    pub status_is_error: bool,
}

impl App {
    pub fn new(user_id: &str, history_limit: usize) -> Self {
        Self {
            should_exit: false,
            user_id: user_id.to_string(),
            history_limit,
            connection: ConnectionState::default(),
            active_pane: Pane::default(),
            directory: ConversationDirectory::new(),
            requested_filter: ListingFilter::default(),
            sidebar: SidebarState::default(),
            thread: None,
            generation: 0,
            messages: MessagesState::default(),
            compose: ComposeState::default(),
            editing: None,
            pending_delete: None,
            sending: false,
            receipt_sent: false,
            status_message: None,
            status_is_error: false,
        }
    }

    /// Request the initial directory.
    pub fn start(&mut self) -> Effect {
        self.load_conversations(self.requested_filter)
    }

    pub fn open_thread_id(&self) -> Option<&str> {
        self.thread.as_ref().map(|t| t.conversation_id())
    }

    /// Whether pushes for the open thread may be applied yet.
    pub fn thread_ready(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| t.is_seeded())
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_is_error = false;
    }

    fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.status_message = Some(message);
        self.status_is_error = true;
    }

    fn load_conversations(&mut self, filter: ListingFilter) -> Effect {
        self.requested_filter = filter;
        self.sidebar.loading = true;
        Effect::Command(BackendCommand::LoadConversations { filter })
    }

    /// Switch to `conversation_id`. Anything still in flight for the
    /// previous thread becomes stale.
    pub fn open_thread(&mut self, conversation_id: &str) -> Effect {
        self.generation += 1;
        self.thread = Some(ChatThread::new(conversation_id, &self.user_id));
        self.messages.reset();
        self.pending_delete = None;
        // Edit text and in-flight drafts belong to the old thread.
        let editing = self.editing.take().is_some();
        if std::mem::take(&mut self.sending) || editing {
            self.compose.clear();
        }
        self.receipt_sent = false;
        tracing::info!(
            "Opening thread {} (generation {})",
            conversation_id,
            self.generation
        );

        Effect::OpenThread {
            conversation_id: conversation_id.to_string(),
            command: BackendCommand::OpenThread {
                generation: self.generation,
                conversation_id: conversation_id.to_string(),
                limit: self.history_limit,
            },
        }
    }

    // -- Keyboard --

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Effect> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_exit = true;
            return None;
        }
        self.status_message = None;

        if self.sidebar.searching {
            self.handle_search_key(key);
            return None;
        }

        let confirm_delete = self.pending_delete.take();

        match key.code {
            KeyCode::Tab => {
                self.active_pane = self.active_pane.next();
                return None;
            }
            KeyCode::BackTab => {
                self.active_pane = self.active_pane.previous();
                return None;
            }
            _ => {}
        }

        match self.active_pane {
            Pane::Sidebar => self.handle_sidebar_key(key),
            Pane::Messages => self.handle_messages_key(key, confirm_delete),
            Pane::Compose => self.handle_compose_key(key),
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => self.sidebar.end_search(true),
            KeyCode::Esc => self.sidebar.end_search(false),
            KeyCode::Backspace => self.sidebar.pop_query(),
            KeyCode::Char(c) => self.sidebar.push_query(c),
            _ => {}
        }
    }

    fn handle_sidebar_key(&mut self, key: KeyEvent) -> Option<Effect> {
        let row_count = self.sidebar.rows(&self.directory, &self.user_id).len();
        match key.code {
            KeyCode::Char('q') => self.should_exit = true,
            KeyCode::Up | KeyCode::Char('k') => self.sidebar.move_up(),
            KeyCode::Down | KeyCode::Char('j') => self.sidebar.move_down(row_count),
            KeyCode::Char('/') => {
                self.sidebar.searching = true;
            }
            KeyCode::Esc if !self.sidebar.query.is_empty() => {
                self.sidebar.end_search(false);
            }
            KeyCode::Char('t') => {
                let filter = self.requested_filter.cycle();
                self.sidebar.selected = 0;
                return Some(self.load_conversations(filter));
            }
            KeyCode::Char('r') => {
                return Some(self.load_conversations(self.requested_filter));
            }
            KeyCode::Enter | KeyCode::Right => {
                let id = self.sidebar.selected_id(&self.directory, &self.user_id)?;
                self.active_pane = Pane::Compose;
                if self.open_thread_id() == Some(id.as_str()) {
                    return None;
                }
                return Some(self.open_thread(&id));
            }
            _ => {}
        }
        None
    }

    fn handle_messages_key(
        &mut self,
        key: KeyEvent,
        confirm_delete: Option<String>,
    ) -> Option<Effect> {
        let count = self.thread.as_ref().map_or(0, |t| t.messages().len());
        match key.code {
            KeyCode::Char('q') => self.should_exit = true,
            KeyCode::Up | KeyCode::Char('k') => self.messages.select_previous(),
            KeyCode::Down | KeyCode::Char('j') => self.messages.select_next(count),
            KeyCode::Esc | KeyCode::Left => self.active_pane = Pane::Sidebar,
            KeyCode::Enter | KeyCode::Char('i') => self.active_pane = Pane::Compose,
            KeyCode::Char('e') => self.start_edit(),
            KeyCode::Char('d') => return self.request_delete(confirm_delete),
            _ => {}
        }
        None
    }

    fn handle_compose_key(&mut self, key: KeyEvent) -> Option<Effect> {
        match key.code {
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::ALT) => {
                self.compose.insert_newline()
            }
            KeyCode::Enter => return self.submit(),
            KeyCode::Esc => {
                if self.editing.take().is_some() {
                    self.compose.clear();
                    self.set_status("Edit cancelled");
                } else {
                    self.active_pane = Pane::Messages;
                }
            }
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.compose.clear()
            }
            KeyCode::Char(c) => self.compose.insert_char(c),
            KeyCode::Backspace => self.compose.backspace(),
            KeyCode::Delete => self.compose.delete(),
            KeyCode::Left => self.compose.move_left(),
            KeyCode::Right => self.compose.move_right(),
            KeyCode::Home => self.compose.move_home(),
            KeyCode::End => self.compose.move_end(),
            _ => {}
        }
        None
    }

    /// Enter in the compose box: send the draft, or submit the edit.
    ///
    /// The draft stays in the box until the backend confirms.
    fn submit(&mut self) -> Option<Effect> {
        let Some(conversation_id) = self.open_thread_id().map(str::to_string) else {
            self.set_error("Open a conversation first");
            return None;
        };

        let Some(text) = outgoing_text(&self.compose.input) else {
            if self.editing.is_some() {
                self.set_error(ChatError::EmptyText.to_string());
            }
            return None;
        };

        if let Some(message_id) = self.editing.clone() {
            self.set_status("Saving edit...");
            return Some(Effect::Command(BackendCommand::EditMessage {
                generation: self.generation,
                message_id,
                text,
            }));
        }

        if self.sending {
            return None;
        }
        if self.connection != ConnectionState::Connected {
            self.set_error(format!("{}; draft kept", ChatError::NotConnected));
            return None;
        }

        self.sending = true;
        Some(Effect::Command(BackendCommand::SendMessage {
            generation: self.generation,
            conversation_id,
            text,
        }))
    }

    /// Id and text of the selected message if the current user wrote it.
    fn own_selected_message(&self) -> Result<(String, String), String> {
        let thread = self.thread.as_ref().ok_or("No conversation open")?;
        let message = thread
            .messages()
            .get(self.messages.selected)
            .ok_or("No message selected")?;
        let id = message.id().ok_or("Message has no id yet")?;
        let message = thread.ensure_sender(id).map_err(|e| e.to_string())?;
        Ok((id.to_string(), message.text.clone()))
    }

    fn start_edit(&mut self) {
        match self.own_selected_message() {
            Ok((id, text)) => {
                self.editing = Some(id);
                self.compose.set_text(&text);
                self.active_pane = Pane::Compose;
            }
            Err(e) => self.set_error(e),
        }
    }

    /// First `d` arms, a second `d` on the same message deletes it.
    fn request_delete(&mut self, armed: Option<String>) -> Option<Effect> {
        let (id, _) = match self.own_selected_message() {
            Ok(found) => found,
            Err(e) => {
                self.set_error(e);
                return None;
            }
        };

        if armed.as_deref() == Some(id.as_str()) {
            self.set_status("Deleting...");
            return Some(Effect::Command(BackendCommand::DeleteMessage {
                generation: self.generation,
                message_id: id,
            }));
        }

        self.set_status("Press d again to delete this message");
        self.pending_delete = Some(id);
        None
    }

    // -- Backend and realtime --

    fn is_stale(&self, generation: u64, what: &str) -> bool {
        if generation == self.generation {
            return false;
        }
        tracing::debug!(
            "Dropping stale {} (generation {}, current {})",
            what,
            generation,
            self.generation
        );
        true
    }

    fn sync_messages(&mut self) {
        let count = self.thread.as_ref().map_or(0, |t| t.messages().len());
        self.messages.sync(count);
    }

    pub fn handle_response(&mut self, response: BackendResponse) {
        match response {
            BackendResponse::Conversations { filter, result } => {
                if filter != self.requested_filter {
                    tracing::debug!(
                        "Dropping {} directory, {} requested since",
                        filter,
                        self.requested_filter
                    );
                    return;
                }
                self.sidebar.loading = false;
                match result {
                    Ok(items) => self.directory.replace(filter, items),
                    Err(e) => {
                        self.directory.replace(filter, Vec::new());
                        self.set_error(format!("Failed to load conversations: {:#}", e));
                    }
                }
                // The open thread is being read right now.
                if let Some(id) = self.thread.as_ref().map(|t| t.conversation_id()) {
                    if self.receipt_sent {
                        self.directory.mark_read(id, &self.user_id);
                    }
                }
                let rows = self.sidebar.rows(&self.directory, &self.user_id).len();
                self.sidebar.clamp_selection(rows);
            }
            BackendResponse::ThreadLoaded {
                generation,
                conversation,
                history,
                read_receipt_sent,
            } => {
                if self.is_stale(generation, "thread load") {
                    return;
                }
                let Some(thread) = self.thread.as_mut() else {
                    return;
                };
                let conversation =
                    conversation.or_else(|| self.directory.get(thread.conversation_id()).cloned());
                thread.seed(conversation, history);
                self.receipt_sent = read_receipt_sent;
                if read_receipt_sent {
                    self.directory
                        .mark_read(thread.conversation_id(), &self.user_id);
                }
                self.sync_messages();
            }
            BackendResponse::MessageSent { generation, result } => {
                if self.is_stale(generation, "send ack") {
                    // Sent from a thread the user has since left.
                    match result {
                        Ok(message) => {
                            let open = self.thread.as_ref().map(|t| t.conversation_id());
                            self.directory
                                .record_message(&message, &self.user_id, open);
                        }
                        Err(e) => self.set_error(format!(
                            "Send to the previous conversation failed: {}",
                            e
                        )),
                    }
                    return;
                }
                self.sending = false;
                match result {
                    Ok(message) => {
                        let open = self.thread.as_ref().map(|t| t.conversation_id());
                        self.directory
                            .record_message(&message, &self.user_id, open);
                        if let Some(thread) = self.thread.as_mut() {
                            thread.accept_ack(message);
                        }
                        self.compose.clear();
                        self.messages.follow_tail = true;
                        self.sync_messages();
                    }
                    Err(e) => self.set_error(format!("Send failed: {}; draft kept", e)),
                }
            }
            BackendResponse::MessageEdited {
                generation,
                message_id,
                text,
                result,
            } => {
                if self.is_stale(generation, "edit result") {
                    return;
                }
                match result {
                    Ok(updated) => {
                        let text = if updated.text.is_empty() {
                            text
                        } else {
                            updated.text
                        };
                        if let Some(thread) = self.thread.as_mut() {
                            thread.apply_edit(&message_id, &text);
                        }
                        if self.editing.as_deref() == Some(message_id.as_str()) {
                            self.editing = None;
                            self.compose.clear();
                        }
                        self.set_status("Message edited");
                    }
                    Err(e) => self.set_error(format!("Edit failed: {:#}", e)),
                }
            }
            BackendResponse::MessageDeleted {
                generation,
                message_id,
                result,
            } => {
                if self.is_stale(generation, "delete result") {
                    return;
                }
                match result {
                    Ok(()) => {
                        if let Some(thread) = self.thread.as_mut() {
                            thread.apply_delete(&message_id);
                        }
                        if self.editing.as_deref() == Some(message_id.as_str()) {
                            self.editing = None;
                            self.compose.clear();
                        }
                        self.sync_messages();
                        self.set_status("Message deleted");
                    }
                    Err(e) => self.set_error(format!("Delete failed: {:#}", e)),
                }
            }
        }
    }

    /// A push for the open thread. Only called once the thread is seeded.
    pub fn apply_push(&mut self, message: Message) {
        let Some(thread) = self.thread.as_mut() else {
            return;
        };
        if thread.accept_push(message) == PushOutcome::Appended {
            self.sync_messages();
        }
    }

    /// Any `message:new`, for the directory's summaries and unread counts.
    pub fn record_live_message(&mut self, message: &Message) {
        let open = self.thread.as_ref().map(|t| t.conversation_id());
        if !self.directory.record_message(message, &self.user_id, open) {
            tracing::debug!(
                "Message for {} is not in the {} directory",
                message.conversation_id,
                self.directory.filter()
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Entry point for `sellpoint-chat tui`.
///
/// The terminal belongs to the UI, so logs go to `sellpoint-chat.log` in
/// the data directory.
pub async fn run(config: Config, verbose: bool) -> Result<()> {
    let user_id = config.require_user()?.to_string();
    init_file_logging(verbose)?;

    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, config, user_id).await;
    ratatui::restore();

    if let Err(ref e) = result {
        tracing::error!("TUI exited with error: {:#}", e);
    }
    result
}

fn init_file_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let dir = Config::data_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join("sellpoint-chat.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .init();
    Ok(())
}

/// Run the application until the user quits.
async fn run_app(terminal: &mut DefaultTerminal, config: Config, user_id: String) -> Result<()> {
    let client = Arc::new(ApiClient::new(&config)?);
    let channel = Arc::new(RealtimeChannel::new(&config.socket_url, config.ack_timeout()));
    channel.connect(&user_id);

    let mut backend = Backend::start(client, Arc::clone(&channel));
    let mut events = EventStream::new();
    let mut inbox = channel.on_any_message();
    let mut live: Option<Subscription> = None;
    let mut states = match channel.watch_state() {
        Some(rx) => WatchStream::from_changes(rx).boxed(),
        None => futures::stream::pending().boxed(),
    };

    let mut app = App::new(&user_id, config.history_limit);
    app.connection = channel.state();
    let effect = app.start();
    dispatch(effect, &channel, &backend, &mut live);

    while !app.should_exit {
        terminal.draw(|frame| ui::render(frame, &app))?;

        // Pushes for an unseeded thread stay buffered in its subscription.
        let ready = app.thread_ready();

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if let Some(effect) = app.handle_key(key) {
                        dispatch(effect, &channel, &backend, &mut live);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Terminal event stream failed"),
                None => break,
            },
            Some(response) = backend.recv() => app.handle_response(response),
            Some(message) = inbox.recv() => app.record_live_message(&message),
            Some(message) = next_push(&mut live, ready) => app.apply_push(message),
            Some(state) = states.next() => {
                tracing::info!("Realtime connection {}", state.as_str());
                app.connection = state;
            }
        }
    }

    drop(live);
    channel.disconnect().await;
    Ok(())
}

fn dispatch(
    effect: Effect,
    channel: &RealtimeChannel,
    backend: &Backend,
    live: &mut Option<Subscription>,
) {
    match effect {
        Effect::Command(command) => backend.send(command),
        Effect::OpenThread {
            conversation_id,
            command,
        } => {
            // Subscribe before the fetch is issued so no push can slip
            // between history and live delivery.
            *live = Some(channel.on_message(&conversation_id));
            backend.send(command);
        }
    }
}

async fn next_push(live: &mut Option<Subscription>, ready: bool) -> Option<Message> {
    match live {
        Some(subscription) if ready => subscription.recv().await,
        _ => std::future::pending().await,
    }
}
