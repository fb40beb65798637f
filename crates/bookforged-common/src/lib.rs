//! Bookforged-Common: Shared types, ISBN handling, and utilities.
//!
//! This crate provides common functionality used across bookforged:
//!
//! - **ISBN**: Parsing, checksum validation, and ISBN-13 normalization
//! - **Typed IDs**: Type-safe UUID wrappers for queue messages and requests
//! - **Core Types**: Provider classes and message priorities
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use bookforged_common::{Isbn, ProviderClass, Error, Result};
//!
//! let isbn = Isbn::parse("0-451-52493-4").unwrap();
//! assert_eq!(isbn.as_str(), "9780451524935");
//!
//! assert!(ProviderClass::Free < ProviderClass::Paid);
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("isbn"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod isbn;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use isbn::{Isbn, IsbnError};
pub use types::*;
