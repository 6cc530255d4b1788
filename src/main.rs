use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use deepseek_chat::attachments::{self, AttachedFile};
use deepseek_chat::client::ChatClient;
use deepseek_chat::config::{Config, ProxyConfig};
use deepseek_chat::ocr::TesseractRecognizer;
use deepseek_chat::search::Direction;
use deepseek_chat::session::ChatSession;
use deepseek_chat::transcript::{KeyValueStore, MemoryStore, SqliteStore, TranscriptStore};
use deepseek_chat::view::{Body, Entry, EntryId, EntryKind, PaneState, Scroll, Segment, TranscriptPane};
use deepseek_chat::voice::{SpeechInput, StatusChange, VoiceInput, VoiceOutcome};
use deepseek_chat::{logging, proxy};
use iced::{
    alignment, clipboard,
    event::{self, Event as IcedEvent},
    font,
    keyboard::{self, Key},
    widget::{
        button, column, container, image::Handle, rich_text, row, scrollable, span, text, text::Span,
        text_input, text_input::Id,
    },
    window, Color, Element, Font, Length, Subscription, Task, Theme,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "deepseek-chat", version, about = "DeepSeek chat client with a local OpenRouter relay")]
struct Args {
    /// Run only the relay, without the desktop window
    #[arg(long)]
    serve: bool,

    /// Relay port, overriding PORT and config.toml
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logging::init();

    let args = Args::parse();
    let mut config = Config::load();
    if let Some(port) = args.port {
        config.set_port(port);
    }

    if args.serve {
        let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
        return runtime.block_on(proxy::serve(config.proxy));
    }

    spawn_relay(config.proxy.clone());

    let size = iced::Size::new(config.window.width as f32, config.window.height as f32);
    iced::application("DeepSeek Chat", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size,
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(move || App::new(config))
        .context("desktop client failed")
}

/// Runs the relay on its own thread and runtime next to the window.
fn spawn_relay(config: ProxyConfig) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Failed to create Tokio runtime for the relay: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(proxy::serve(config)) {
            tracing::error!("relay stopped: {:#}", e);
        }
    });
}

fn open_store() -> Box<dyn KeyValueStore> {
    let path = Config::history_db_path();
    match SqliteStore::open(&path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            tracing::warn!("Could not open {}: {}. History will not be kept.", path.display(), e);
            Box::new(MemoryStore::new())
        }
    }
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    Submitted,
    Pane(PaneState),
    SearchChanged(String),
    SearchNext,
    SearchPrev,
    SearchClear,
    ClearHistory,
    CancelClear,
    FileDropped(PathBuf),
    RemoveAttachment(usize),
    CopyText(EntryId),
    ResetCopied(EntryId),
    Download(EntryId),
    Downloaded(Result<PathBuf, String>),
    ToggleVoice,
    HideVoiceStatus(u64),
    Noop,
}

struct App {
    session: Arc<Mutex<ChatSession<TranscriptPane>>>,
    pane: PaneState,
    /// Decoded once per document entry and reused across snapshots.
    previews: HashMap<EntryId, Handle>,
    input_text: String,
    search_query: String,
    busy: bool,
    confirm_clear: bool,
    copied: Option<EntryId>,
    notice: Option<String>,
    voice: VoiceInput,
    speech: Option<Box<dyn SpeechInput>>,
    voice_status: Option<String>,
    voice_serial: u64,
    input_id: Id,
    scroll_id: scrollable::Id,
}

impl App {
    fn new(config: Config) -> (Self, Task<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let session = ChatSession::new(
            TranscriptPane::with_observer(tx),
            TranscriptStore::new(open_store()),
            ChatClient::with_config(&config.client),
            Box::new(TesseractRecognizer::with_config(&config.ocr)),
        );
        tracing::info!(model = %config.client.model, relay = %config.client.api_base, "client ready");

        let input_id = Id::unique();
        let scroll_id = scrollable::Id::unique();

        let app = App {
            pane: session.view().state().clone(),
            session: Arc::new(Mutex::new(session)),
            previews: HashMap::new(),
            input_text: String::new(),
            search_query: String::new(),
            busy: false,
            confirm_clear: false,
            copied: None,
            notice: None,
            voice: VoiceInput::new(),
            // No platform recognizer is wired up on the desktop yet.
            speech: None,
            voice_status: None,
            voice_serial: 0,
            input_id: input_id.clone(),
            scroll_id: scroll_id.clone(),
        };

        let tasks = [
            Task::run(pane_updates(rx), Message::Pane),
            text_input::focus(input_id),
            scrollable::snap_to(scroll_id, scrollable::RelativeOffset::END),
        ];
        (app, Task::batch(tasks))
    }

    /// Runs one session action while holding the lock.
    fn with_session<F>(&self, action: F) -> Task<Message>
    where
        F: FnOnce(&mut ChatSession<TranscriptPane>) + Send + 'static,
    {
        let session = self.session.clone();
        Task::future(async move {
            action(&mut *session.lock().await);
            Message::Noop
        })
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => {
                let nothing_to_send = self.input_text.trim().is_empty() && self.pane.attachments.is_empty();
                if nothing_to_send || self.busy {
                    return Task::none();
                }

                let text = std::mem::take(&mut self.input_text);
                self.search_query.clear();
                self.busy = true;

                let session = self.session.clone();
                Task::future(async move {
                    session.lock().await.submit(&text).await;
                    Message::Submitted
                })
            }
            Message::Submitted => {
                self.busy = false;
                text_input::focus(self.input_id.clone())
            }
            Message::Pane(state) => {
                let scroll = self.scroll_task(&state);
                self.previews.retain(|id, _| state.entry(*id).is_some());
                for entry in &state.entries {
                    if let Some(document) = &entry.document {
                        self.previews
                            .entry(entry.id)
                            .or_insert_with(|| Handle::from_bytes(document.preview.clone()));
                    }
                }
                self.pane = state;
                scroll
            }
            Message::SearchChanged(query) => {
                self.search_query = query.clone();
                self.with_session(move |session| session.search(&query))
            }
            Message::SearchNext => self.with_session(|session| session.navigate(Direction::Next)),
            Message::SearchPrev => self.with_session(|session| session.navigate(Direction::Prev)),
            Message::SearchClear => {
                self.search_query.clear();
                self.with_session(|session| session.clear_search())
            }
            Message::ClearHistory => {
                if !self.confirm_clear {
                    self.confirm_clear = true;
                    return Task::none();
                }
                self.confirm_clear = false;
                self.search_query.clear();
                self.with_session(|session| session.clear_history())
            }
            Message::CancelClear => {
                self.confirm_clear = false;
                Task::none()
            }
            Message::FileDropped(path) => {
                if self.busy {
                    return Task::none();
                }
                let session = self.session.clone();
                Task::future(async move {
                    match AttachedFile::from_path(&path) {
                        Ok(file) => session.lock().await.attach(vec![file]),
                        Err(e) => tracing::warn!("could not read {}: {}", path.display(), e),
                    }
                    Message::Noop
                })
            }
            Message::RemoveAttachment(index) => self.with_session(move |session| session.remove_attachment(index)),
            Message::CopyText(id) => {
                let Some(document) = self.pane.entry(id).and_then(|e| e.document.as_ref()) else {
                    return Task::none();
                };
                self.copied = Some(id);
                Task::batch([
                    clipboard::write(document.text.clone()),
                    Task::perform(tokio::time::sleep(Duration::from_secs(2)), move |_| Message::ResetCopied(id)),
                ])
            }
            Message::ResetCopied(id) => {
                if self.copied == Some(id) {
                    self.copied = None;
                }
                Task::none()
            }
            Message::Download(id) => {
                let Some(document) = self.pane.entry(id).and_then(|e| e.document.clone()) else {
                    return Task::none();
                };
                let dir = dirs::download_dir().unwrap_or_else(|| PathBuf::from("."));
                Task::perform(
                    async move { attachments::save_extracted_text(&dir, &document).map_err(|e| e.to_string()) },
                    Message::Downloaded,
                )
            }
            Message::Downloaded(result) => {
                self.notice = Some(match result {
                    Ok(path) => format!("Saved {}", path.display()),
                    Err(e) => format!("Download failed: {}", e),
                });
                Task::none()
            }
            Message::ToggleVoice => {
                let outcome = self.voice.toggle(self.speech.as_deref_mut().map(|s| s as &mut dyn SpeechInput));
                self.apply_voice(outcome)
            }
            Message::HideVoiceStatus(serial) => {
                if serial == self.voice_serial {
                    self.voice_status = None;
                }
                Task::none()
            }
            Message::Noop => Task::none(),
        }
    }

    fn apply_voice(&mut self, outcome: VoiceOutcome) -> Task<Message> {
        if let Some(transcript) = outcome.compose {
            self.input_text = transcript;
        }

        match outcome.status {
            StatusChange::Keep => Task::none(),
            StatusChange::Hide => {
                self.voice_serial += 1;
                self.voice_status = None;
                Task::none()
            }
            StatusChange::Show(status) => {
                self.voice_serial += 1;
                self.voice_status = Some(status.text);
                match status.dismiss_after {
                    Some(after) => {
                        let serial = self.voice_serial;
                        Task::perform(tokio::time::sleep(after), move |_| Message::HideVoiceStatus(serial))
                    }
                    None => Task::none(),
                }
            }
        }
    }

    fn scroll_task(&self, next: &PaneState) -> Task<Message> {
        let moved = next.scroll != self.pane.scroll;
        match next.scroll {
            Scroll::Bottom if moved || next.entries != self.pane.entries || next.typing != self.pane.typing => {
                scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset::END)
            }
            Scroll::Centre(id) if moved => {
                let Some(index) = next.entries.iter().position(|e| e.id == id) else {
                    return Task::none();
                };
                let y = if next.entries.len() > 1 {
                    index as f32 / (next.entries.len() - 1) as f32
                } else {
                    0.0
                };
                scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset { x: 0.0, y })
            }
            _ => Task::none(),
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        event::listen_with(|event, _status, _id| match event {
            IcedEvent::Window(window::Event::FileDropped(path)) => Some(Message::FileDropped(path)),
            IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) => Some(Message::SearchClear),
            _ => None,
        })
    }

    fn view(&self) -> Element<Message> {
        column![self.header(), self.transcript(), self.composer()]
            .spacing(10)
            .padding(10)
            .into()
    }

    fn header(&self) -> Element<Message> {
        let status = self.pane.search_status.label();
        let nav = self.pane.search_status.navigation_enabled();

        let mut search = row![text_input("Search messages...", &self.search_query)
            .on_input(Message::SearchChanged)
            .padding(8)
            .width(Length::Fixed(260.0))]
        .spacing(6)
        .align_y(alignment::Vertical::Center);

        if !status.is_empty() {
            search = search.push(text(status).size(13));
        }
        if !self.search_query.is_empty() {
            search = search
                .push(button(text("↑")).on_press_maybe(nav.then_some(Message::SearchPrev)))
                .push(button(text("↓")).on_press_maybe(nav.then_some(Message::SearchNext)))
                .push(button(text("×")).on_press(Message::SearchClear));
        }

        let clear: Element<Message> = if self.confirm_clear {
            row![
                text("Clear all chat history? This cannot be undone.").size(13),
                button(text("Clear")).on_press(Message::ClearHistory),
                button(text("Cancel")).on_press(Message::CancelClear),
            ]
            .spacing(6)
            .align_y(alignment::Vertical::Center)
            .into()
        } else {
            button(text("Clear history"))
                .on_press_maybe((!self.busy).then_some(Message::ClearHistory))
                .into()
        };

        row![
            text("DeepSeek Chat").size(20),
            container(search).width(Length::Fill).center_x(Length::Fill),
            clear
        ]
        .spacing(10)
        .align_y(alignment::Vertical::Center)
        .into()
    }

    fn transcript(&self) -> Element<Message> {
        if self.pane.welcome && self.pane.entries.is_empty() {
            return container(
                column![
                    text("Welcome to DeepSeek Chat").size(26),
                    text("Ask anything, or drop an image onto the window to read and analyze it.").size(15),
                ]
                .spacing(10)
                .align_x(alignment::Horizontal::Center),
            )
            .center(Length::Fill)
            .into();
        }

        let mut entries = column(self.pane.entries.iter().map(|entry| self.entry(entry))).spacing(14);
        if self.pane.typing {
            entries = entries.push(row![text("🤖"), text("please wait our bot is thinking...").size(14)].spacing(10));
        }

        scrollable(container(entries).padding(10).width(Length::Fill))
            .id(self.scroll_id.clone())
            .height(Length::Fill)
            .into()
    }

    fn entry<'a>(&'a self, entry: &'a Entry) -> Element<'a, Message> {
        let marker = if entry.current {
            "▶ "
        } else if entry.highlighted {
            "• "
        } else {
            ""
        };

        match entry.kind {
            EntryKind::Progress => row![text("⏳"), body(&entry.body)].spacing(10).into(),
            EntryKind::User => row![text(format!("{}🧑", marker)), body(&entry.body)].spacing(10).into(),
            EntryKind::Assistant => row![text(format!("{}🤖", marker)), body(&entry.body)].spacing(10).into(),
            EntryKind::Document => {
                let Some(document) = &entry.document else {
                    return body(&entry.body);
                };

                let copy_label = if self.copied == Some(entry.id) { "Copied!" } else { "Copy Text" };
                let stats = row(document
                    .stats()
                    .into_iter()
                    .map(|(label, value)| column![text(value).size(16), text(label).size(11)].into()))
                .spacing(18);

                let mut block = column![
                    row![
                        text(document.title()).size(16).width(Length::Fill),
                        button(text(copy_label).size(13)).on_press(Message::CopyText(entry.id)),
                        button(text("Download").size(13)).on_press(Message::Download(entry.id)),
                    ]
                    .spacing(8)
                    .align_y(alignment::Vertical::Center),
                ]
                .spacing(8);
                if let Some(handle) = self.previews.get(&entry.id) {
                    block = block.push(iced::widget::image(handle.clone()).width(Length::Fixed(240.0)));
                }
                block = block.push(stats).push(container(body(&entry.body)).padding(8));
                if let Some(notice) = &self.notice {
                    block = block.push(text(notice).size(12));
                }

                row![text(format!("{}📄", marker)), container(block).padding(10).width(Length::Fill)]
                    .spacing(10)
                    .into()
            }
        }
    }

    fn composer(&self) -> Element<Message> {
        let enabled = self.pane.input_enabled && !self.busy;

        let mut input = text_input("Type your message...", &self.input_text)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());
        if enabled {
            input = input.on_input(Message::InputChanged).on_submit(Message::Submit);
        }

        let controls = row![
            input,
            button(text("🎤")).on_press_maybe(enabled.then_some(Message::ToggleVoice)),
            button(text("Send")).on_press_maybe(enabled.then_some(Message::Submit)),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center);

        let mut composer = column![].spacing(6);
        if !self.pane.attachments.is_empty() {
            composer = composer.push(
                row(self.pane.attachments.iter().map(|preview| {
                    row![
                        text(preview.icon),
                        text(preview.label.as_str()).size(13),
                        button(text("×").size(12)).on_press(Message::RemoveAttachment(preview.index)),
                    ]
                    .spacing(4)
                    .align_y(alignment::Vertical::Center)
                    .into()
                }))
                .spacing(12),
            );
        }
        if let Some(status) = &self.voice_status {
            composer = composer.push(text(status).size(13));
        }
        composer
            .push(controls)
            .push(text("Drop images or PDFs onto the window to attach them.").size(11))
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

fn body(body: &Body) -> Element<Message> {
    match body {
        Body::Markdown { text: content, .. } => text(content.trim_end()).size(15).into(),
        Body::Plain(content) => text(content.as_str()).size(15).into(),
        Body::Highlighted(segments) => {
            let spans: Vec<Span<'_, Message>> = segments.iter().map(highlight_span).collect();
            rich_text(spans).size(15).into()
        }
    }
}

fn highlight_span(segment: &Segment) -> Span<'_, Message> {
    match segment {
        Segment::Text(s) => span(s.as_str()),
        Segment::Match(s) => span(s.as_str()).color(Color::from_rgb(0.98, 0.82, 0.35)),
        Segment::Current(s) => span(s.as_str())
            .color(Color::from_rgb(1.0, 0.55, 0.2))
            .font(Font {
                weight: font::Weight::Bold,
                ..Font::DEFAULT
            }),
    }
}

fn pane_updates(rx: UnboundedReceiver<PaneState>) -> impl futures_util::Stream<Item = PaneState> {
    futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|state| (state, rx)) })
}
