//! One chat session: the transcript, its storage, the view drawing it, and
//! the search and attachment state layered on top. Built once per client.

use futures_util::StreamExt;

use crate::attachments::{self, AttachedFile, AttachmentKind, AttachmentQueue, DocumentAnalysis};
use crate::client::ChatClient;
use crate::error::ChatError;
use crate::ocr::Recognizer;
use crate::search::{Direction, SearchEngine};
use crate::stream::StreamAssembler;
use crate::transcript::{Message, Role, TranscriptStore};
use crate::view::{Scroll, TranscriptView};

pub const SEND_FAILED: &str = "Sorry, I encountered an error. Please try again.";
pub const ANALYSIS_FAILED: &str = "Sorry, I encountered an error analyzing the document. Please try again.";

pub struct ChatSession<V: TranscriptView> {
    messages: Vec<Message>,
    store: TranscriptStore,
    view: V,
    client: ChatClient,
    search: SearchEngine,
    attachments: AttachmentQueue,
    recognizer: Box<dyn Recognizer>,
    loading: bool,
    processing_document: bool,
}

impl<V: TranscriptView> ChatSession<V> {
    /// Restores the saved transcript into `view`.
    pub fn new(view: V, store: TranscriptStore, client: ChatClient, recognizer: Box<dyn Recognizer>) -> Self {
        let messages = store.load();
        let mut session = ChatSession {
            messages,
            store,
            view,
            client,
            search: SearchEngine::new(),
            attachments: AttachmentQueue::new(),
            recognizer,
            loading: false,
            processing_document: false,
        };

        if !session.messages.is_empty() {
            tracing::info!("restored {} messages", session.messages.len());
            for message in &session.messages {
                session.view.push_message(message.role, &message.content);
            }
            session.view.set_welcome(false);
            session.view.scroll_to(Scroll::Bottom);
        }
        session
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_processing_document(&self) -> bool {
        self.processing_document
    }

    pub fn attachments(&self) -> &AttachmentQueue {
        &self.attachments
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.messages) {
            tracing::warn!("Could not save chat history: {}", e);
        }
    }

    /// Appends a finished message, draws it and saves the transcript.
    pub fn add_message(&mut self, role: Role, content: &str) {
        self.messages.push(Message::new(role, content));
        self.view.push_message(role, content);
        self.view.set_welcome(false);
        self.persist();
        self.view.scroll_to(Scroll::Bottom);
    }

    fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
        self.view.set_input_enabled(!loading);
    }

    /// Queues accepted files; anything else gets an inline rejection.
    pub fn attach(&mut self, files: Vec<AttachedFile>) {
        for file in files {
            match self.attachments.push(file) {
                Ok(kind) => tracing::debug!(?kind, "attachment queued"),
                Err(rejected) => {
                    tracing::info!(media_type = %rejected.media_type, "rejected attachment {}", rejected.name);
                    self.add_message(Role::Assistant, &attachments::rejection_message(&rejected.media_type));
                }
            }
        }
        self.view.set_attachments(self.attachments.previews());
    }

    pub fn remove_attachment(&mut self, index: usize) {
        if self.attachments.remove(index).is_some() {
            self.view.set_attachments(self.attachments.previews());
        }
    }

    /// Whether `submit` would do anything with this compose text.
    pub fn can_submit(&self, text: &str) -> bool {
        !self.loading && !(text.trim().is_empty() && self.attachments.is_empty())
    }

    /// Processes queued attachments, then sends `text` if there is any.
    /// Returns false when the submit was ignored.
    pub async fn submit(&mut self, text: &str) -> bool {
        if !self.can_submit(text) {
            return false;
        }
        let text = text.trim();

        self.clear_search();
        self.view.set_welcome(false);

        if !self.attachments.is_empty() {
            self.process_attachments().await;
        }

        if !text.is_empty() {
            self.add_message(Role::User, text);
            self.request_reply(SEND_FAILED).await;
        }

        self.attachments.clear();
        self.view.set_attachments(Vec::new());
        true
    }

    /// Sends the transcript with the typing indicator up and input off. A
    /// failure becomes the `fallback` assistant message.
    async fn request_reply(&mut self, fallback: &str) {
        self.set_loading(true);
        self.view.set_typing(true);
        self.view.scroll_to(Scroll::Bottom);

        if let Err(e) = self.send_message().await {
            tracing::error!("chat request failed: {}", e);
            self.add_message(Role::Assistant, fallback);
        }

        self.view.set_typing(false);
        self.set_loading(false);
    }

    /// Streams one reply for the current transcript into a live entry. What
    /// was received is kept even when the stream breaks off.
    pub async fn send_message(&mut self) -> Result<(), ChatError> {
        let request = self.client.request_for(&self.messages);
        let mut stream = self.client.open_stream(&request).await?;

        let entry = self.view.push_message(Role::Assistant, "");
        let mut assembler = StreamAssembler::new();
        let mut failure = None;

        while let Some(chunk) = stream.next().await {
            let view = &mut self.view;
            match chunk {
                Ok(bytes) => {
                    assembler.feed(&bytes, |buffer| {
                        view.render_markdown(entry, buffer);
                        view.scroll_to(Scroll::Bottom);
                    });
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let view = &mut self.view;
        assembler.finish(|buffer| view.render_markdown(entry, buffer));

        tracing::debug!(done = assembler.done_seen(), chars = assembler.buffer().len(), "stream finished");
        self.messages.push(Message::new(Role::Assistant, assembler.into_content()));
        self.persist();

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn process_attachments(&mut self) {
        self.processing_document = true;

        let files = self.attachments.files().to_vec();
        for file in &files {
            match file.kind() {
                Some(AttachmentKind::Image) => self.process_image(file).await,
                Some(AttachmentKind::Pdf) => self.add_message(Role::Assistant, attachments::PDF_PLACEHOLDER),
                None => {}
            }
        }

        self.processing_document = false;
    }

    async fn process_image(&mut self, file: &AttachedFile) {
        let indicator = self.view.push_progress(&format!("Processing {}...", file.name));
        self.view.scroll_to(Scroll::Bottom);

        let view = &mut self.view;
        let name = &file.name;
        let mut report = |fraction: f32| {
            let pct = (fraction * 100.0).round() as i64;
            view.update_progress(indicator, &format!("Processing {}... {}%", name, pct));
        };
        let result = self.recognizer.recognize(&file.data, &mut report).await;
        self.view.remove_entry(indicator);

        let recognition = match result {
            Ok(recognition) => recognition,
            Err(e) => {
                tracing::error!("OCR Error: {}", e);
                self.add_message(Role::Assistant, &format!("Error processing {}: {}", file.name, e));
                return;
            }
        };

        let analysis = DocumentAnalysis::new(file, &recognition);
        self.view.push_document(&analysis);
        self.view.scroll_to(Scroll::Bottom);

        if attachments::should_analyze(&recognition.text) {
            let prompt = attachments::analysis_prompt(&recognition.text, &file.name);
            self.add_message(Role::User, &prompt);
            self.request_reply(ANALYSIS_FAILED).await;
        }
    }

    /// Forgets every message, stored or on screen, and returns to the
    /// welcome screen.
    pub fn clear_history(&mut self) {
        self.messages.clear();
        if let Err(e) = self.store.clear() {
            tracing::warn!("Could not clear chat history: {}", e);
        }

        self.clear_search();
        self.attachments.clear();
        self.view.set_attachments(Vec::new());

        self.view.clear();
        self.view.set_welcome(true);
        tracing::info!("chat history cleared");
    }

    pub fn search(&mut self, query: &str) {
        self.search.search(&mut self.view, &self.messages, query);
    }

    pub fn navigate(&mut self, direction: Direction) {
        self.search.navigate(&mut self.view, direction);
    }

    pub fn clear_search(&mut self) {
        self.search.clear(&mut self.view, &self.messages);
    }
}
