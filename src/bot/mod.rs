//! Bot module for handling chat interactions
//!
//! This module is split into several submodules:
//! - `router`: Single dispatch boundary, session checkpoints and deferred effects
//! - `message_handler`: Commands and main-menu taps
//! - `dialogue_manager`: Free-text input for each dialogue step
//! - `callback_handler`: Inline keyboard presses
//! - `ui_builder`: Menus, keyboards and message texts
//! - `telegram`: teloxide transport

pub mod callback_handler;
pub mod dialogue_manager;
pub mod message_handler;
pub mod router;
pub mod telegram;
pub mod ui_builder;

pub use router::Router;
pub use telegram::{callback_handler, message_handler, TelegramMessenger};
