//! regmon - registry write observer library
//!
//! This library exposes the record codec, the bounded event queue, the
//! observer and its read channel, and the daemon that hosts them.

pub mod channel;
pub mod cli;
pub mod client;
pub mod codec;
pub mod constants;
pub mod consumer;
pub mod daemon;
pub mod filter;
pub mod hook;
pub mod models;
pub mod observer;
pub mod output;
pub mod queue;
