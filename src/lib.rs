pub mod attachments;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod markdown;
pub mod ocr;
pub mod proxy;
pub mod search;
pub mod session;
pub mod stream;
pub mod transcript;
pub mod view;
pub mod voice;
