pub mod client;
pub mod command;
pub mod event;
pub mod frame;

pub use client::{LinkError, McuHandle, McuLink, DEFAULT_COMMAND_TIMEOUT};
pub use command::{McuCommand, ValidationError};
pub use event::McuEvent;
pub use frame::{FrameDecoder, RawFrame};
