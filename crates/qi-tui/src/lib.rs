// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
//! The terminal driver: raw-mode line editing, key bindings, command
//! suggestions, and the render backends for the outbound message stream.

mod driver;
mod editor;
mod render;
mod suggest;

pub use driver::{Driver, DriverOptions};
pub use editor::LineEditor;
pub use render::{make_renderer, Framework, Renderer};
pub use suggest::{SuggestionItem, SuggestionPanel};
