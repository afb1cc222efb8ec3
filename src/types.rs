//! Utility Types
//!
//! Validated newtypes for everything a user types into a form. Parsing
//! them is the only way to get one, so any value passed to the database
//! layer has already been checked.
mod email;
mod password;
mod username;

pub use email::EMail;
pub use password::Password;
pub use username::Username;
