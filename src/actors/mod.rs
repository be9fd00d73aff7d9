//! The bot's single owning task
//!
//! ```text
//!   Telegram ──receive──▶ ┌──────────────┐ ──send──▶ Telegram
//!                         │  EventLoop   │
//!   BotHandle ──command─▶ │ (one writer) │ ──save──▶ StateStore
//!                         └──────────────┘
//!                                │ fetch
//!                                ▼
//!                          MetricSource
//! ```
//!
//! Every registry and global-state mutation happens inside [`EventLoop`];
//! other tasks reach it through [`BotHandle`].

pub mod event_loop;
pub mod messages;

pub use event_loop::{BotHandle, EventLoop, LoopConfig};
pub use messages::{LoopCommand, LoopStats};
