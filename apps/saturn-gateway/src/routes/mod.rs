pub mod agents;
pub mod auth;
pub mod proxy;
pub mod services;
pub mod wallet;
pub mod webhooks;
