pub mod circuit_breaker;
pub mod error;
pub mod fcm;
pub mod health;
pub mod message;
pub mod notification;
pub mod retry;
pub mod validation;
