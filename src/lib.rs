pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod security;

pub const BOT_NAME: &str = "bastion";
pub const COMMAND_TARGET: &str = "bastion::command";
pub const ERROR_TARGET: &str = "bastion::error";
pub const EVENT_TARGET: &str = "bastion::handlers";
pub const SECURITY_TARGET: &str = "bastion::security";
pub const CONSOLE_TARGET: &str = "bastion";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
