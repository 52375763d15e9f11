pub mod api;
pub mod catalog;
pub mod config;
pub mod contract;
pub mod db;
pub mod enhance;
pub mod loras;
pub mod pipeline;
pub mod storage;
