// Grapevine: federation core for a small social network
//
// This is the library root. `federation` holds everything that crosses a
// node boundary; `web` is the HTTP surface peers call; `actions` is where
// local author events enter.

pub mod actions;
pub mod config;
pub mod db;
pub mod error;
pub mod federation;
pub mod output;
pub mod status;
pub mod visibility;
pub mod web;
