pub(crate) mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod observability;
pub mod pool;
pub mod protocol;
pub mod relay;
pub mod routing;
pub mod state;
pub mod stream;
pub mod transport;

mod util;
