pub mod discovery;
pub mod protocol;
pub mod registry;

pub use discovery::DiscoveryService;
pub use protocol::{Kind, Message};
pub use registry::{Participant, Registry};
