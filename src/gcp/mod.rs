mod client;
mod pubsub;
mod storage;

pub use client::GcpClient;
pub use pubsub::{PubSubClient, PubsubMessage, ReceivedMessage};
pub use storage::StorageClient;
