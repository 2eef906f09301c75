pub mod kafka;
pub mod kafka_rest;
