//! Find-in-transcript: match list, cyclic navigation, highlight injection
//! and removal.

use regex::{Regex, RegexBuilder};

use crate::markdown;
use crate::transcript::{Message, Role};
use crate::view::{EntryId, Scroll, SearchStatus, Segment, TranscriptView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    First,
    Next,
    Prev,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub entry: EntryId,
    /// Rendered text of the entry when the search ran.
    pub original_text: String,
}

#[derive(Debug, Default)]
pub struct SearchEngine {
    query: String,
    matches: Vec<SearchMatch>,
    current: Option<usize>,
}

fn query_regex(query: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Splits `text` around every case-insensitive occurrence of `query`. With
/// `mark_current`, the first occurrence becomes [`Segment::Current`].
pub fn highlight_segments(text: &str, query: &str, mark_current: bool) -> Vec<Segment> {
    let Some(re) = query_regex(query) else {
        return vec![Segment::Text(text.to_string())];
    };

    let mut segments = Vec::new();
    let mut last = 0;
    for (n, m) in re.find_iter(text).enumerate() {
        if m.start() > last {
            segments.push(Segment::Text(text[last..m.start()].to_string()));
        }
        let found = m.as_str().to_string();
        segments.push(if mark_current && n == 0 {
            Segment::Current(found)
        } else {
            Segment::Match(found)
        });
        last = m.end();
    }
    if last < text.len() {
        segments.push(Segment::Text(text[last..].to_string()));
    }
    segments
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn is_active(&self) -> bool {
        !self.query.is_empty()
    }

    pub fn status(&self) -> SearchStatus {
        if self.matches.is_empty() {
            if self.query.is_empty() {
                SearchStatus::Hidden
            } else {
                SearchStatus::NoMatches
            }
        } else {
            SearchStatus::Position {
                current: self.current.map(|i| i + 1).unwrap_or(0),
                total: self.matches.len(),
            }
        }
    }

    /// Rebuilds the match list for `query` from scratch and jumps to the
    /// first match. A blank query clears everything.
    pub fn search(&mut self, view: &mut dyn TranscriptView, messages: &[Message], query: &str) {
        let query = query.trim();
        if query.is_empty() {
            self.clear(view, messages);
            return;
        }

        self.query = query.to_string();
        self.current = None;

        let needle = query.to_lowercase();
        self.matches = view
            .searchable_entries()
            .into_iter()
            .filter_map(|entry| {
                let text = view.text_content(entry)?;
                text.to_lowercase().contains(&needle).then_some(SearchMatch {
                    entry,
                    original_text: text,
                })
            })
            .collect();
        tracing::debug!(query = %self.query, matches = self.matches.len(), "search");

        view.set_search_status(self.status());
        self.highlight_matches(view, messages);

        if !self.matches.is_empty() {
            self.navigate(view, Direction::First);
        }
    }

    fn highlight_matches(&self, view: &mut dyn TranscriptView, messages: &[Message]) {
        clear_highlights(view, messages);

        for m in &self.matches {
            view.show_highlight(m.entry, highlight_segments(&m.original_text, &self.query, false));
        }
    }

    /// Moves the current marker. Does nothing without matches.
    pub fn navigate(&mut self, view: &mut dyn TranscriptView, direction: Direction) {
        let total = self.matches.len();
        if total == 0 {
            return;
        }

        if let Some(previous) = self.current {
            let m = &self.matches[previous];
            view.set_current(m.entry, false);
            view.show_highlight(m.entry, highlight_segments(&m.original_text, &self.query, false));
        }

        let next = match (direction, self.current) {
            (Direction::First, _) => 0,
            (Direction::Next, None) => 0,
            (Direction::Next, Some(i)) => (i + 1) % total,
            (Direction::Prev, None) | (Direction::Prev, Some(0)) => total - 1,
            (Direction::Prev, Some(i)) => i - 1,
        };
        self.current = Some(next);

        let m = &self.matches[next];
        view.set_current(m.entry, true);
        view.show_highlight(m.entry, highlight_segments(&m.original_text, &self.query, true));
        view.scroll_to(Scroll::Centre(m.entry));
        view.set_search_status(self.status());
    }

    /// Forgets the query and restores every highlighted entry.
    pub fn clear(&mut self, view: &mut dyn TranscriptView, messages: &[Message]) {
        self.query.clear();
        self.matches.clear();
        self.current = None;
        clear_highlights(view, messages);
        view.set_search_status(self.status());
    }
}

/// Whether `message` is the one shown as `text`: its content, or for
/// assistant messages its rendered text, appears inside the live text.
fn shown_in(text: &str, message: &Message) -> bool {
    text.contains(&message.content)
        || (message.role == Role::Assistant && text.contains(markdown::to_text(&message.content).trim_end()))
}

/// Puts each highlighted entry back the way it was rendered.
///
/// The stored message is found by substring containment against the
/// entry's live text, not by identity. Assistant messages are rendered
/// again from their markdown; everything else gets its live text back as
/// plain text. Two messages with overlapping content can therefore restore
/// the wrong one, and an empty message matches every entry.
pub fn clear_highlights(view: &mut dyn TranscriptView, messages: &[Message]) {
    for entry in view.highlighted_entries() {
        view.clear_marks(entry);
        let Some(text) = view.text_content(entry) else {
            continue;
        };

        match messages.iter().find(|m| shown_in(&text, m)) {
            Some(message) if message.role == Role::Assistant => view.render_markdown(entry, &message.content),
            _ => view.render_plain(entry, &text),
        }
    }
}
