pub mod assets;
pub(crate) mod common;
pub mod health;
pub mod images;
pub mod messages;
pub mod models;
pub mod videos;
