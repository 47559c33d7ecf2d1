//! Core session components.
//!
//! This module contains the session lifecycle and I/O logic:
//!
//! - **transport**: WebSocket connection to the remote shell endpoint
//! - **term**: terminal state and ANSI escape sequence parser
//! - **input**: line buffering of keystrokes into commands
//! - **session**: high-level session combining transport + emulator
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Transport (WebSocket I/O with the shell endpoint)
//! ├── LineBuffer (keystrokes → newline-terminated commands)
//! └── Emulator
//!     ├── Screen (cell grid + attributes + cursor)
//!     └── Parser (ANSI escape sequences)
//! ```

pub mod input;
pub mod session;
pub mod term;
pub mod transport;
