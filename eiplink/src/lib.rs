//! `eiplink` is a client-side driver for Allen-Bradley controllers speaking
//! CIP over Ethernet/IP. Callers create logical tags addressing controller
//! memory and read or write them asynchronously; the driver multiplexes all
//! tags over shared TCP sessions per gateway and shared CIP connections per
//! routing path, driven by a small cooperative tasklet pool.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod ab;
pub mod attr;
pub mod logging;
pub mod status;
pub mod tag;
pub mod tasklet;
pub mod time;

pub use crate::status::Status;
pub use crate::tag::{Endian, Tag};
