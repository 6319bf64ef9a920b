//! Cookie domain logic shared by the server and the extension side.
//!
//! - [`normalize`] turns any website string into a bare hostname
//! - [`matcher`] picks the stored cookies that belong to a website
//! - [`file`] reads and writes the persisted JSON cookie-file format

pub mod file;
pub mod matcher;
pub mod normalize;

pub use file::{CookieFileError, ParseResult, parse_cookie_file, write_cookie_file};
pub use matcher::{cookie_matches, match_cookies};
pub use normalize::normalize_domain;
