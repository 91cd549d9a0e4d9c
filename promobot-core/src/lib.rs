// src/lib.rs

pub mod auth;
pub mod http;
pub mod platforms;
pub mod repositories;
pub mod services;

pub use http::{HttpTransport, ReqwestTransport};
pub use promobot_common::Error;
