//! Parley core library: chat sessions, backend sync, turn dispatch, and
//! telemetry sampling, shared by the CLI and any other front end.

pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod init;
pub mod models;
pub mod session;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test_support;
