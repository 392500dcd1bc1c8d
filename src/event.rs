use std::path::PathBuf;
use tokio::sync::mpsc;

/// Notifications handed off to the consuming layer (GUI/CLI). Text chat and
/// image delivery arrive on the same channel so a front-end only needs one
/// receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    PeerJoined(String),
    PeerLeft(String),
    MessageReceived { sender: String, text: String },
    ImageReceived { sender: String, path: PathBuf },
    TransferFailed { sender: String, reason: String },
}

pub type EventSender = mpsc::UnboundedSender<ChatEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ChatEvent>;
