pub mod config;
pub mod roster;
pub mod updater;

/// poise user data; the updater runs on its own task and needs nothing here.
pub struct Data;

pub type Error = anyhow::Error;
