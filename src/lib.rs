pub mod bacnet;
pub mod cli;
pub mod collector;
pub mod config;
pub mod emitter;
pub mod points;
pub mod protocol;
pub mod scheduler;
pub mod sink;
