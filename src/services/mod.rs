pub mod aggregator;
pub mod conversation_service;
pub mod live;
pub mod message_service;
pub mod read_service;
