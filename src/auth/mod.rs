mod helpers;
mod middleware;
mod password;
mod token;

pub use helpers::{AuthFailure, Credentials, authenticate_password, extract_credentials};
pub use middleware::{AuthError, RequireUser};
pub use password::{generate_password, hash_password, verify_password};
pub use token::{TokenGenerator, parse_token};
