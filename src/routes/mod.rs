pub mod auth;
pub mod classes;
pub mod gyms;
pub mod health;
pub mod teams;
