//! Brook Core - strongly-typed primitives for the Brook commit log.
//!
//! This crate provides the types shared by the storage layer and its
//! clients: offsets, timestamps, and the framed-message wire format.
//! It deliberately contains no I/O and no synchronization.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Strongly-typed values**: an `Offset` is not a bare `u64`
//! - **Explicit wire format**: fixed-width, big-endian, documented layout
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod message;
mod types;

pub use message::{Message, MessageHeader, MESSAGE_HEADER_SIZE};
pub use types::{Offset, Timestamp};
