//! The presentation seam. The session and the search engine only ever talk
//! to a [`TranscriptView`]; [`TranscriptPane`] is the in-memory model the
//! desktop client draws from, and what the tests inspect.

use tokio::sync::mpsc::UnboundedSender;

use crate::attachments::{AttachmentPreview, DocumentAnalysis};
use crate::markdown;
use crate::transcript::Role;

pub type EntryId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    User,
    Assistant,
    Document,
    Progress,
}

impl From<Role> for EntryKind {
    fn from(role: Role) -> Self {
        match role {
            Role::User => EntryKind::User,
            Role::Assistant => EntryKind::Assistant,
        }
    }
}

impl EntryKind {
    /// Entries the search box looks through.
    pub fn is_searchable(&self) -> bool {
        !matches!(self, EntryKind::Progress)
    }
}

/// A piece of highlighted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Match(String),
    /// The first occurrence inside the current match.
    Current(String),
}

impl Segment {
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Text(s) | Segment::Match(s) | Segment::Current(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchStatus {
    #[default]
    Hidden,
    NoMatches,
    Position {
        current: usize,
        total: usize,
    },
}

impl SearchStatus {
    pub fn label(&self) -> String {
        match self {
            SearchStatus::Hidden => String::new(),
            SearchStatus::NoMatches => "No matches found".to_string(),
            SearchStatus::Position { current, total } => format!("{} of {}", current, total),
        }
    }

    /// Prev/next only make sense with more than one match.
    pub fn navigation_enabled(&self) -> bool {
        matches!(self, SearchStatus::Position { total, .. } if *total > 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scroll {
    #[default]
    Bottom,
    /// Centre this entry in the viewport.
    Centre(EntryId),
}

/// Capabilities the core needs from whatever draws the transcript.
pub trait TranscriptView: Send {
    /// Appends a message entry: markdown for assistant content, plain text
    /// otherwise.
    fn push_message(&mut self, role: Role, content: &str) -> EntryId;
    fn push_document(&mut self, analysis: &DocumentAnalysis) -> EntryId;
    fn push_progress(&mut self, label: &str) -> EntryId;
    fn update_progress(&mut self, id: EntryId, label: &str);
    fn remove_entry(&mut self, id: EntryId);

    /// Replaces an entry's content with `markdown` rendered from scratch.
    fn render_markdown(&mut self, id: EntryId, markdown: &str);
    fn render_plain(&mut self, id: EntryId, text: &str);

    /// Searchable entries in document order.
    fn searchable_entries(&self) -> Vec<EntryId>;
    /// Rendered text of an entry, markup removed.
    fn text_content(&self, id: EntryId) -> Option<String>;

    fn show_highlight(&mut self, id: EntryId, segments: Vec<Segment>);
    fn set_current(&mut self, id: EntryId, current: bool);
    fn highlighted_entries(&self) -> Vec<EntryId>;
    /// Drops the highlight and current markers; content is left as is.
    fn clear_marks(&mut self, id: EntryId);
    fn set_search_status(&mut self, status: SearchStatus);

    fn scroll_to(&mut self, scroll: Scroll);
    fn set_typing(&mut self, typing: bool);
    fn set_input_enabled(&mut self, enabled: bool);
    fn set_welcome(&mut self, visible: bool);
    fn set_attachments(&mut self, previews: Vec<AttachmentPreview>);
    /// Removes every entry and indicator.
    fn clear(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Rendered markdown, markup removed.
    Markdown { text: String },
    Plain(String),
    Highlighted(Vec<Segment>),
}

impl Body {
    pub fn text(&self) -> String {
        match self {
            Body::Markdown { text, .. } => text.clone(),
            Body::Plain(text) => text.clone(),
            Body::Highlighted(segments) => segments.iter().map(Segment::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub body: Body,
    pub document: Option<DocumentAnalysis>,
    pub highlighted: bool,
    pub current: bool,
}

/// Everything on screen, cloned out to observers after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct PaneState {
    pub entries: Vec<Entry>,
    pub typing: bool,
    pub input_enabled: bool,
    pub welcome: bool,
    pub search_status: SearchStatus,
    pub scroll: Scroll,
    pub attachments: Vec<AttachmentPreview>,
}

impl Default for PaneState {
    fn default() -> Self {
        PaneState {
            entries: Vec::new(),
            typing: false,
            input_enabled: true,
            welcome: true,
            search_status: SearchStatus::Hidden,
            scroll: Scroll::Bottom,
            attachments: Vec::new(),
        }
    }
}

impl PaneState {
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Default)]
pub struct TranscriptPane {
    state: PaneState,
    next_id: EntryId,
    observer: Option<UnboundedSender<PaneState>>,
}

impl TranscriptPane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every change is followed by a snapshot on `observer`.
    pub fn with_observer(observer: UnboundedSender<PaneState>) -> Self {
        TranscriptPane {
            observer: Some(observer),
            ..Self::default()
        }
    }

    pub fn state(&self) -> &PaneState {
        &self.state
    }

    fn publish(&mut self) {
        if let Some(observer) = &self.observer {
            if observer.send(self.state.clone()).is_err() {
                self.observer = None;
            }
        }
    }

    fn push(&mut self, kind: EntryKind, body: Body, document: Option<DocumentAnalysis>) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        self.state.entries.push(Entry {
            id,
            kind,
            body,
            document,
            highlighted: false,
            current: false,
        });
        self.publish();
        id
    }

    fn update<F>(&mut self, id: EntryId, f: F)
    where
        F: FnOnce(&mut Entry),
    {
        if let Some(entry) = self.state.entries.iter_mut().find(|e| e.id == id) {
            f(entry);
            self.publish();
        }
    }

    fn set<T: PartialEq>(&mut self, value: T, field: impl FnOnce(&mut PaneState) -> &mut T) {
        let slot = field(&mut self.state);
        if *slot != value {
            *slot = value;
            self.publish();
        }
    }
}

fn markdown_body(source: &str) -> Body {
    Body::Markdown {
        text: markdown::to_text(source),
    }
}

impl TranscriptView for TranscriptPane {
    fn push_message(&mut self, role: Role, content: &str) -> EntryId {
        let body = match role {
            Role::Assistant => markdown_body(content),
            Role::User => Body::Plain(content.to_string()),
        };
        self.push(role.into(), body, None)
    }

    fn push_document(&mut self, analysis: &DocumentAnalysis) -> EntryId {
        let body = Body::Plain(analysis.display_text().to_string());
        self.push(EntryKind::Document, body, Some(analysis.clone()))
    }

    fn push_progress(&mut self, label: &str) -> EntryId {
        self.push(EntryKind::Progress, Body::Plain(label.to_string()), None)
    }

    fn update_progress(&mut self, id: EntryId, label: &str) {
        self.update(id, |entry| entry.body = Body::Plain(label.to_string()));
    }

    fn remove_entry(&mut self, id: EntryId) {
        let before = self.state.entries.len();
        self.state.entries.retain(|e| e.id != id);
        if self.state.entries.len() != before {
            self.publish();
        }
    }

    fn render_markdown(&mut self, id: EntryId, markdown: &str) {
        self.update(id, |entry| entry.body = markdown_body(markdown));
    }

    fn render_plain(&mut self, id: EntryId, text: &str) {
        self.update(id, |entry| entry.body = Body::Plain(text.to_string()));
    }

    fn searchable_entries(&self) -> Vec<EntryId> {
        self.state
            .entries
            .iter()
            .filter(|e| e.kind.is_searchable())
            .map(|e| e.id)
            .collect()
    }

    fn text_content(&self, id: EntryId) -> Option<String> {
        self.state.entry(id).map(|e| e.body.text())
    }

    fn show_highlight(&mut self, id: EntryId, segments: Vec<Segment>) {
        self.update(id, |entry| {
            entry.body = Body::Highlighted(segments);
            entry.highlighted = true;
        });
    }

    fn set_current(&mut self, id: EntryId, current: bool) {
        self.update(id, |entry| entry.current = current);
    }

    fn highlighted_entries(&self) -> Vec<EntryId> {
        self.state
            .entries
            .iter()
            .filter(|e| e.highlighted)
            .map(|e| e.id)
            .collect()
    }

    fn clear_marks(&mut self, id: EntryId) {
        self.update(id, |entry| {
            entry.highlighted = false;
            entry.current = false;
        });
    }

    fn set_search_status(&mut self, status: SearchStatus) {
        self.set(status, |s| &mut s.search_status);
    }

    fn scroll_to(&mut self, scroll: Scroll) {
        self.set(scroll, |s| &mut s.scroll);
    }

    fn set_typing(&mut self, typing: bool) {
        self.set(typing, |s| &mut s.typing);
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.set(enabled, |s| &mut s.input_enabled);
    }

    fn set_welcome(&mut self, visible: bool) {
        self.set(visible, |s| &mut s.welcome);
    }

    fn set_attachments(&mut self, previews: Vec<AttachmentPreview>) {
        self.set(previews, |s| &mut s.attachments);
    }

    fn clear(&mut self) {
        self.state.entries.clear();
        self.state.typing = false;
        self.state.scroll = Scroll::Bottom;
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::AttachedFile;
    use crate::ocr::Recognition;
    use tokio::sync::mpsc;

    #[test]
    fn test_messages_render_by_role() {
        let mut pane = TranscriptPane::new();
        let user = pane.push_message(Role::User, "**not bold**");
        let bot = pane.push_message(Role::Assistant, "**bold**");

        assert_eq!(pane.text_content(user).as_deref(), Some("**not bold**"));
        assert_eq!(pane.text_content(bot).as_deref(), Some("bold\n"));
        assert!(matches!(pane.state().entry(bot).unwrap().body, Body::Markdown { .. }));
    }

    #[test]
    fn test_progress_entries_are_not_searchable() {
        let mut pane = TranscriptPane::new();
        let user = pane.push_message(Role::User, "hi");
        let progress = pane.push_progress("Processing a.png...");
        pane.update_progress(progress, "Processing a.png... 50%");

        assert_eq!(pane.searchable_entries(), vec![user]);
        assert_eq!(pane.text_content(progress).as_deref(), Some("Processing a.png... 50%"));

        pane.remove_entry(progress);
        assert!(pane.text_content(progress).is_none());
    }

    #[test]
    fn test_highlight_keeps_text_content() {
        let mut pane = TranscriptPane::new();
        let id = pane.push_message(Role::User, "I love cats");
        pane.show_highlight(
            id,
            vec![Segment::Text("I love ".to_string()), Segment::Current("cat".to_string()), Segment::Text("s".to_string())],
        );
        pane.set_current(id, true);

        assert_eq!(pane.text_content(id).as_deref(), Some("I love cats"));
        assert_eq!(pane.highlighted_entries(), vec![id]);

        pane.clear_marks(id);
        assert!(pane.highlighted_entries().is_empty());
        assert!(!pane.state().entry(id).unwrap().current);
    }

    #[test]
    fn test_observer_receives_snapshots() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pane = TranscriptPane::with_observer(tx);

        pane.set_input_enabled(false);
        let snapshot = rx.try_recv().unwrap();
        assert!(!snapshot.input_enabled);

        pane.set_input_enabled(false);
        assert!(rx.try_recv().is_err());

        pane.push_message(Role::User, "hello");
        assert_eq!(rx.try_recv().unwrap().entries.len(), 1);
    }

    #[test]
    fn test_repeated_scroll_publishes_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pane = TranscriptPane::with_observer(tx);

        pane.scroll_to(Scroll::Bottom);
        assert!(rx.try_recv().is_err());

        pane.scroll_to(Scroll::Centre(3));
        pane.scroll_to(Scroll::Centre(3));
        assert_eq!(rx.try_recv().unwrap().scroll, Scroll::Centre(3));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snapshots_share_document_preview() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pane = TranscriptPane::with_observer(tx);
        let file = AttachedFile::new("scan.png", "image/png", vec![9; 4096]);
        let analysis = DocumentAnalysis::new(
            &file,
            &Recognition {
                text: "Total 12.00".to_string(),
                confidence: 90.0,
            },
        );

        let id = pane.push_document(&analysis);
        pane.push_message(Role::Assistant, "ok");

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        for snapshot in [first, second] {
            let document = snapshot.entry(id).unwrap().document.as_ref().unwrap();
            assert_eq!(document.preview.as_ptr(), file.data.as_ptr());
        }
    }

    #[test]
    fn test_search_status_labels() {
        assert_eq!(SearchStatus::Hidden.label(), "");
        assert_eq!(SearchStatus::NoMatches.label(), "No matches found");
        let status = SearchStatus::Position { current: 1, total: 2 };
        assert_eq!(status.label(), "1 of 2");
        assert!(status.navigation_enabled());
        assert!(!SearchStatus::Position { current: 1, total: 1 }.navigation_enabled());
    }
}
