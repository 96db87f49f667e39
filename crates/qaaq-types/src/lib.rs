pub mod ais;
pub mod api;
pub mod events;
pub mod geo;
pub mod models;
