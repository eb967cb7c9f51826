//! ikura-bot - a multi-platform chat bot with a scripted command language.
//!
//! The core is three tightly-coupled subsystems behind a chat-message
//! ingest path:
//!
//! - **Interpreter** ([`interp`]) - A dynamically-typed expression language
//!   (lexer, parser, evaluator) that powers user-defined commands and macros.
//! - **Markov engine** ([`markov`]) - A variable-order prefix model trained
//!   on-line from chat, with asynchronous retraining and weighted generation.
//! - **Database** ([`db`]) - A single-file, self-describing binary store
//!   holding users, credentials, messages, commands, interpreter globals and
//!   the markov model, snapshotted atomically every minute.
//!
//! Chat transports stay outside the crate: they implement the
//! [`channel::Channel`] trait, hand parsed [`wire`] frames to [`ingest`],
//! and deliver whatever the core asks them to send.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ikura_bot::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let store = Store::load("ikura.db", /* create: */ true)?;
//!     store.spawn_syncer();
//!     let markov = MarkovWorker::spawn(store.clone());
//!     // wire a backend into ingest::process_privmsg(...)
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod codec;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod interp;
pub mod markov;
pub mod perms;
pub mod util;
pub mod wire;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::channel::{Channel, Fragment, Message};
    pub use crate::codec::{Persist, Reader, RelStr, Writer};
    pub use crate::config::{load_config, BotConfig, ChannelConfig, MarkovConfig};
    pub use crate::db::{Database, Store};
    pub use crate::error::{
        BotError, CodecError, CommandError, ConfigError, DbError, Result, WireError,
    };
    pub use crate::ingest::process_privmsg;
    pub use crate::interp::{CmdContext, Command, Interpreter, Macro, Value};
    pub use crate::markov::{MarkovModel, MarkovWorker};
    pub use crate::wire::WireMessage;
}
