pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod models;
pub mod outcome;
pub mod policy;
