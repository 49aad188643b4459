// ChatPay — Chat-driven USDC transfers in Rust
// License: Apache-2.0

pub mod api;
pub mod audit;
pub mod bot;
pub mod bus;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod logger;
pub mod session;
pub mod workflow;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
