//! # avbchain
//!
//! Unpacks a set of AVB protected firmware images into editable partition
//! directories and packs them back, re-signing every vbmeta image so the
//! chain from the root `vbmeta` image verifies with a new key.
//!
//! Dynamic partitions are taken out of the sparse `super` container on
//! unpack and put back into it on pack. Partitions stored without AVB
//! metadata get a footer generated from the descriptor their vbmeta image
//! holds for them.
//!
//! All binary format work is delegated to an [`codec::ImageCodec`], normally
//! the `avbroot` command line tool.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use avbchain::{config::Config, ctx::AppContext};
//!
//! let ctx = AppContext::new(Config::default());
//! ctx.check_codec()?;
//! avbchain::cmd::unpack(&ctx, Path::new("images"), Path::new("extracted"))?;
//! // edit extracted/system/raw.img ...
//! avbchain::cmd::pack(
//!     &ctx,
//!     Path::new("extracted"),
//!     Path::new("signed"),
//!     Path::new("avb.key"),
//! )?;
//! # Ok::<(), avbchain::Error>(())
//! ```

pub mod avb;
pub mod cmd;
pub mod codec;
pub mod config;
pub mod ctx;
pub mod error;
pub mod graph;
pub mod lp;
pub mod propagate;
pub mod store;
mod utils;

pub use error::{Error, Result};

#[macro_use]
extern crate log;
