pub mod action;
pub mod config;
pub mod playbook;
pub mod rule;
pub mod version;
