//! Pure classification for `keystone`.
//!
//! - [`classify_item`] maps the two observed states of a path to a
//!   [`Classification`].
//! - [`resolve`] maps a conflicting pair plus a [`ConflictStrategy`] to a
//!   [`Resolution`].
//! - [`classify_asset`] decides whether a static asset may also live in the
//!   cache.
//!
//! Nothing here performs I/O or holds state.

mod asset;
mod conflict;

pub use asset::{classify_asset, content_type, AssetClass};
pub use conflict::{classify_item, newer_side, resolve};

pub use keystone_core::types::{Classification, ConflictStrategy, Resolution, Side};
