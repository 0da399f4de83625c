//! # Truckline Telegram Bot
//!
//! A Telegram bot for a truck dealership: customers browse the used-truck
//! catalog, keep favorites and ask questions that managers pick up in a live
//! relayed chat; admins edit prices and statuses, publish listings to a
//! classifieds gateway and assign roles. Every dialogue step is persisted so
//! a restart resumes where each user left off.

pub mod bot;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod errors;
pub mod identity;
pub mod localization;
pub mod model;
pub mod payload;
pub mod publishing;
pub mod relay;
pub mod session;
pub mod transport;
