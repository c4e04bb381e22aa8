//! # Gateway endpoints
//!
//! - `POST /api/getRefreshToken` - log in or rotate a token family
//! - `POST /api/deleteToken` - log out
//! - `GET /pix/{file}` - static pixel read

pub mod delete_token;
pub mod get_refresh_token;
pub mod read_pix;

pub use delete_token::handle_delete_token;
pub use get_refresh_token::handle_get_refresh_token;
pub use read_pix::handle_read_pix;
