pub mod ais_client;
pub mod ais_feed;
pub mod ais_relay;
pub mod connection;
pub mod dispatcher;
