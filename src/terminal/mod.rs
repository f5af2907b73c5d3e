//! Terminal bridge: remote shell output pump, input, resize and teardown

mod bridge;
mod chunker;

pub use bridge::{BridgeError, BridgeState, TerminalSession, TERMINAL_OUTPUT};
pub use chunker::{Utf8Chunker, OUTPUT_CHUNK_SIZE};

#[cfg(test)]
pub(crate) use bridge::tests::{fake_shell, FakeRemote};
