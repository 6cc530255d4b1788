//! Voice input: the recorder state machine and the status line it drives.
//! The platform recognizer sits behind [`SpeechInput`].

use std::time::Duration;

use crate::error::VoiceError;

pub const LOCALE: &str = "en-US";

pub const LISTENING: &str = "Listening...";
pub const UNSUPPORTED: &str = "Speech recognition not supported";
pub const START_FAILED: &str = "Could not start voice input";

const UNSUPPORTED_FOR: Duration = Duration::from_secs(3);
const ERROR_FOR: Duration = Duration::from_secs(2);

/// A platform speech recognizer, one utterance per `start`.
pub trait SpeechInput: Send {
    fn start(&mut self, locale: &str) -> Result<(), VoiceError>;
    fn stop(&mut self);
}

/// What the recognizer reports back while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started,
    /// Transcript pieces since the last final result.
    Result { segments: Vec<String>, is_final: bool },
    Error(String),
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    NoSpeech,
    AudioCapture,
    NotAllowed,
    Network,
    Other(String),
}

impl SpeechError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => SpeechError::NoSpeech,
            "audio-capture" => SpeechError::AudioCapture,
            "not-allowed" => SpeechError::NotAllowed,
            "network" => SpeechError::Network,
            other => SpeechError::Other(other.to_string()),
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            SpeechError::NoSpeech => "No speech detected",
            SpeechError::AudioCapture => "Microphone not available",
            SpeechError::NotAllowed => "Microphone permission denied",
            SpeechError::Network => "Network error",
            SpeechError::Other(_) => "Voice input error",
        }
    }
}

/// Text under the voice button. `dismiss_after` of `None` stays until
/// replaced or hidden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStatus {
    pub text: String,
    pub dismiss_after: Option<Duration>,
}

impl VoiceStatus {
    fn sticky(text: impl Into<String>) -> Self {
        VoiceStatus {
            text: text.into(),
            dismiss_after: None,
        }
    }

    fn timed(text: impl Into<String>, after: Duration) -> Self {
        VoiceStatus {
            text: text.into(),
            dismiss_after: Some(after),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusChange {
    #[default]
    Keep,
    Show(VoiceStatus),
    Hide,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoiceOutcome {
    pub status: StatusChange,
    /// Replacement text for the compose box.
    pub compose: Option<String>,
}

impl VoiceOutcome {
    fn status(status: StatusChange) -> Self {
        VoiceOutcome {
            status,
            compose: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct VoiceInput {
    recording: bool,
    error_shown: bool,
}

impl VoiceInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// The voice button. `None` means the platform has no recognizer.
    pub fn toggle(&mut self, input: Option<&mut dyn SpeechInput>) -> VoiceOutcome {
        let Some(input) = input else {
            return VoiceOutcome::status(StatusChange::Show(VoiceStatus::timed(UNSUPPORTED, UNSUPPORTED_FOR)));
        };

        if self.recording {
            input.stop();
            return VoiceOutcome::default();
        }

        match input.start(LOCALE) {
            Ok(()) => VoiceOutcome::default(),
            Err(e) => {
                tracing::error!("Error starting speech recognition: {}", e);
                VoiceOutcome::status(StatusChange::Show(VoiceStatus::timed(START_FAILED, ERROR_FOR)))
            }
        }
    }

    pub fn handle(&mut self, event: SpeechEvent) -> VoiceOutcome {
        match event {
            SpeechEvent::Started => {
                self.recording = true;
                self.error_shown = false;
                VoiceOutcome::status(StatusChange::Show(VoiceStatus::sticky(LISTENING)))
            }
            SpeechEvent::Result { segments, is_final } => {
                let transcript = segments.concat();
                if is_final {
                    VoiceOutcome {
                        status: StatusChange::Keep,
                        compose: Some(transcript),
                    }
                } else {
                    VoiceOutcome::status(StatusChange::Show(VoiceStatus::sticky(format!("\"{}\"", transcript))))
                }
            }
            SpeechEvent::Error(code) => {
                tracing::error!("Speech recognition error: {}", code);
                self.recording = false;
                self.error_shown = true;
                let error = SpeechError::from_code(&code);
                VoiceOutcome::status(StatusChange::Show(VoiceStatus::timed(error.message(), ERROR_FOR)))
            }
            SpeechEvent::Ended => {
                self.recording = false;
                // An error message runs out its own timer.
                if std::mem::take(&mut self.error_shown) {
                    VoiceOutcome::default()
                } else {
                    VoiceOutcome::status(StatusChange::Hide)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeInput {
        fail: bool,
        started: Vec<String>,
        stops: usize,
    }

    impl SpeechInput for FakeInput {
        fn start(&mut self, locale: &str) -> Result<(), VoiceError> {
            if self.fail {
                return Err(VoiceError::Start("busy".to_string()));
            }
            self.started.push(locale.to_string());
            Ok(())
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn shown(outcome: &VoiceOutcome) -> Option<&VoiceStatus> {
        match &outcome.status {
            StatusChange::Show(status) => Some(status),
            _ => None,
        }
    }

    #[test]
    fn test_error_codes() {
        let cases = [
            ("no-speech", "No speech detected"),
            ("audio-capture", "Microphone not available"),
            ("not-allowed", "Microphone permission denied"),
            ("network", "Network error"),
            ("aborted", "Voice input error"),
        ];
        for (code, message) in cases {
            assert_eq!(SpeechError::from_code(code).message(), message);
        }
    }

    #[test]
    fn test_unsupported_platform() {
        let mut voice = VoiceInput::new();
        let outcome = voice.toggle(None);
        let status = shown(&outcome).unwrap();
        assert_eq!(status.text, UNSUPPORTED);
        assert_eq!(status.dismiss_after, Some(Duration::from_secs(3)));
        assert!(!voice.is_recording());
    }

    #[test]
    fn test_start_failure() {
        let mut voice = VoiceInput::new();
        let mut input = FakeInput {
            fail: true,
            ..FakeInput::default()
        };
        let outcome = voice.toggle(Some(&mut input));
        let status = shown(&outcome).unwrap();
        assert_eq!(status.text, START_FAILED);
        assert_eq!(status.dismiss_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_recording_cycle() {
        let mut voice = VoiceInput::new();
        let mut input = FakeInput::default();

        voice.toggle(Some(&mut input));
        assert_eq!(input.started, vec!["en-US".to_string()]);

        let outcome = voice.handle(SpeechEvent::Started);
        assert_eq!(shown(&outcome).unwrap().text, LISTENING);
        assert!(voice.is_recording());

        let outcome = voice.handle(SpeechEvent::Result {
            segments: vec!["hello ".to_string(), "wor".to_string()],
            is_final: false,
        });
        assert_eq!(shown(&outcome).unwrap().text, "\"hello wor\"");
        assert_eq!(outcome.compose, None);

        let outcome = voice.handle(SpeechEvent::Result {
            segments: vec!["hello world".to_string()],
            is_final: true,
        });
        assert_eq!(outcome.compose.as_deref(), Some("hello world"));

        // second press while recording stops
        voice.toggle(Some(&mut input));
        assert_eq!(input.stops, 1);

        let outcome = voice.handle(SpeechEvent::Ended);
        assert_eq!(outcome.status, StatusChange::Hide);
        assert!(!voice.is_recording());
    }

    #[test]
    fn test_error_survives_end() {
        let mut voice = VoiceInput::new();
        voice.handle(SpeechEvent::Started);

        let outcome = voice.handle(SpeechEvent::Error("not-allowed".to_string()));
        let status = shown(&outcome).unwrap();
        assert_eq!(status.text, "Microphone permission denied");
        assert_eq!(status.dismiss_after, Some(Duration::from_secs(2)));
        assert!(!voice.is_recording());

        assert_eq!(voice.handle(SpeechEvent::Ended).status, StatusChange::Keep);
    }
}
