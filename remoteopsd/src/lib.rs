pub mod config;
pub mod dispatch;
pub mod http_session;
pub mod operations;
pub mod request;
pub mod service;
pub mod storage;
pub mod sync;
