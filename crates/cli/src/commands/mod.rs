pub mod config_cmd;
pub mod relay;
