//! Controller REST API access

pub mod connection;
pub mod v2;

pub use connection::{ApiResponse, Auth, Connection, ConnectionOptions, CookieJar, CSRF_COOKIE, SESSION_COOKIE};
pub use v2::{v2_path, ApiV2};
