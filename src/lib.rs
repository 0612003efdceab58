pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod state;
pub mod stream;
pub mod transport;

mod util;
