pub mod alias;
pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod redirect;
pub mod service;
pub mod storage;
