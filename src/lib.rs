pub mod command;
pub mod config;
pub mod connection;
pub mod data;
pub mod db;
pub mod dispatcher;
pub mod rdb;
pub mod replica;
pub mod replication;
pub mod resp;
pub mod server;
pub mod session;
pub mod utils;

pub use config::Config;
pub use connection::Connection;
pub use db::Db;
pub use replication::Replication;
pub use resp::Resp;
pub use server::Server;
