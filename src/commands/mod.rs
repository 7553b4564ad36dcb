use clap::ValueEnum;

mod config_cmd;
mod customer;
mod measurement;
mod order;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use customer::CustomerCommand;
pub use measurement::MeasurementCommand;
pub use order::OrderCommand;
pub use sync_cmd::SyncCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
