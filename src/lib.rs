pub mod commands;
pub mod config;
pub mod doctor;
pub mod error;
pub mod fs_utils;
pub mod isolate;
pub mod paths;
pub mod probe;
pub mod session;
pub mod state;
pub mod switch;
pub mod ui;

#[cfg(test)]
pub mod test_utils;
