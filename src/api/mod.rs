pub mod catalog;
pub mod enhance;
pub mod error;
pub mod generate;
pub mod handler_utils;
pub mod history;
pub mod loras;
pub mod outputs;
pub mod response;
pub mod routes;
pub mod runs;
pub mod server;
