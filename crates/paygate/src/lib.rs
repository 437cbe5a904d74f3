#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

mod authorizers;
mod client;
mod config;
pub mod error;
mod payments;
mod store;
mod transport;
pub use authorizers::*;
pub use client::*;
pub use config::*;
pub use error::{Error, Result};
pub use payments::*;
pub use store::*;
pub use tokio_util::sync::CancellationToken;
pub use transport::*;
