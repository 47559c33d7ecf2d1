//! User interface rendering and input handling.
//!
//! - **renderer**: draws the emulator grid and the status line
//! - **keymapper**: sorts key events into session input and local
//!   control chords

pub mod keymapper;
pub mod renderer;

pub use keymapper::{KeyInput, KeyMapper};
pub use renderer::{Renderer, StatusTone};
