pub mod broadcast;
pub mod dispatcher;
pub mod push;
pub mod registry;
