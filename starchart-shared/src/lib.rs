pub mod api;
pub mod auth;
pub mod domain;
pub mod jwt;
pub mod path;
pub mod policy;
