mod message;

pub use message::{ContentBlock, Message, MessageContent, Role};
