pub mod daemon;
pub mod transfer;

pub use daemon::ChatDaemon;
pub use transfer::{send_image, TransferListener, TransferSession};
