//! Conversation state and its reconciliation against streamed events.
//!
//! A session moves through three shapes: empty (nothing typed yet), drafting
//! (optimistic local messages, no conversation id), and active (server-backed
//! conversation). Every transition is a synchronous fold over `&mut self`,
//! driven by one event-loop task; spawned transport work only communicates
//! back through channels, so no two mutations ever interleave.

use crate::api::{ChatChunk, ChatStreamRequest};
use crate::core::message::{Chat, ChatDetails, Configuration, Message};

const TITLE_MAX_CHARS: usize = 30;

/// Per-turn bookkeeping handed back by [`ChatSession::begin_turn`] and
/// threaded through chunk application: the submitted text (for deriving a
/// new conversation's title) and the running assistant-content buffer.
#[derive(Debug)]
pub struct TurnState {
    user_text: String,
    buffer: String,
    attach_configuration: bool,
}

/// Side effects a chunk asks the caller to perform. Applying chunks itself
/// never spawns work, which keeps the state machine synchronous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEffect {
    StartGenerationPoll(String),
}

#[derive(Default)]
pub struct ChatSession {
    chats: Vec<Chat>,
    active: Option<ChatDetails>,
    pending: Vec<Message>,
    configuration: Option<Configuration>,
    configuration_enabled: bool,
    error: Option<String>,
    background_status: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn set_chats(&mut self, chats: Vec<Chat>) {
        self.chats = chats;
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    pub fn set_configuration(&mut self, configuration: Option<Configuration>) {
        self.configuration = configuration;
    }

    /// Whether the persona configuration should be attached to newly created
    /// conversations.
    pub fn enable_configuration(&mut self, enabled: bool) {
        self.configuration_enabled = enabled;
    }

    pub fn active(&self) -> Option<&ChatDetails> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The live transcript: the active conversation's messages, or the local
    /// draft while no conversation id has been assigned.
    pub fn messages(&self) -> &[Message] {
        match &self.active {
            Some(chat) => &chat.messages,
            None => &self.pending,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn background_status(&self) -> Option<&str> {
        self.background_status.as_deref()
    }

    pub fn clear_background_status(&mut self) {
        self.background_status = None;
    }

    /// Start a send turn: clean up a previously failed turn's dangling user
    /// message, append the optimistic user message and assistant
    /// placeholder, and produce the stream request.
    ///
    /// `attachment_ids` must already be filtered to uploads that completed
    /// cleanly ([`crate::core::attachments::AttachmentList::ready_file_ids`]).
    pub fn begin_turn(
        &mut self,
        text: impl Into<String>,
        attachment_ids: Vec<String>,
        think_model: bool,
    ) -> (ChatStreamRequest, TurnState) {
        let text = text.into();

        if self.error.take().is_some() {
            // A failed turn leaves its user message dangling; drop it so the
            // transcript never shows two copies of the retried prompt.
            self.pop_message();
        }

        let configuration_id = if self.active.is_none() && self.configuration_enabled {
            self.configuration
                .as_ref()
                .map(|configuration| configuration.id.clone())
        } else {
            None
        };

        self.push_message(Message::user(text.clone(), attachment_ids.clone()));
        self.push_message(Message::assistant_placeholder());

        let request = ChatStreamRequest {
            chat_id: self.active.as_ref().map(|chat| chat.id.clone()),
            configuration_id: configuration_id.clone(),
            content: text.clone(),
            attachment_ids,
            think_model,
        };
        let turn = TurnState {
            user_text: text,
            buffer: String::new(),
            attach_configuration: configuration_id.is_some(),
        };
        (request, turn)
    }

    /// Fold one streamed chunk into the session, in arrival order.
    pub fn apply_chunk(&mut self, turn: &mut TurnState, chunk: ChatChunk) -> Option<TurnEffect> {
        match chunk {
            ChatChunk::ChatId(chat_id) => {
                // At most one activation per turn, even if the server repeats
                // the id.
                if self.active.is_none() {
                    self.activate(chat_id, turn);
                }
                None
            }
            ChatChunk::Content(delta) => {
                self.background_status = None;
                turn.buffer.push_str(&delta);
                let content = turn.buffer.clone();
                if let Some(last) = self.messages_mut().last_mut() {
                    last.content = content;
                }
                None
            }
            ChatChunk::Error(message) => {
                self.background_status = None;
                self.error = Some(message);
                // Drop the assistant placeholder; the user message stays
                // until the next submit cleans it up.
                self.pop_message();
                None
            }
            ChatChunk::BackgroundProcessing(status) => {
                self.background_status = Some(status);
                None
            }
            ChatChunk::Generation { id, message } => {
                self.background_status = Some(message);
                Some(TurnEffect::StartGenerationPoll(id))
            }
        }
    }

    /// A generation job resolved: clear the status line and append a fresh
    /// assistant message carrying the image, separate from the streaming
    /// placeholder.
    pub fn resolve_generation(&mut self, url: impl Into<String>) {
        self.background_status = None;
        self.push_message(Message::generated_image(url));
    }

    /// Replace the session with an existing conversation, discarding any
    /// local draft.
    pub fn open_chat(&mut self, details: ChatDetails) {
        self.active = Some(details);
        self.pending.clear();
        self.error = None;
        self.background_status = None;
    }

    /// Back to the new-chat state.
    pub fn reset(&mut self) {
        self.active = None;
        self.pending.clear();
        self.error = None;
        self.background_status = None;
    }

    fn activate(&mut self, chat_id: String, turn: &TurnState) {
        let title: String = turn.user_text.chars().take(TITLE_MAX_CHARS).collect();
        let created_at = chrono::Utc::now().timestamp();
        let messages = std::mem::take(&mut self.pending);
        let configuration = if turn.attach_configuration {
            self.configuration.clone()
        } else {
            None
        };
        self.chats.insert(
            0,
            Chat {
                id: chat_id.clone(),
                title: title.clone(),
                created_at,
            },
        );
        self.active = Some(ChatDetails {
            id: chat_id,
            title,
            created_at,
            messages,
            configuration,
        });
    }

    fn messages_mut(&mut self) -> &mut Vec<Message> {
        match &mut self.active {
            Some(chat) => &mut chat.messages,
            None => &mut self.pending,
        }
    }

    fn push_message(&mut self, message: Message) {
        self.messages_mut().push(message);
    }

    fn pop_message(&mut self) {
        self.messages_mut().pop();
    }
}
