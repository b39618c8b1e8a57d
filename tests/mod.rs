mod common;

mod config_tests;
mod fcm_tests;
mod handler_tests;
mod health_tests;
