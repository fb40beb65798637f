//! ISBN parsing, validation, and normalization.
//!
//! Every identifier that enters the resolver goes through [`Isbn::parse`].
//! ISBN-10 input is converted to its ISBN-13 form so cache keys and batch
//! de-duplication see one canonical spelling per book.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reasons an identifier was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IsbnError {
    #[error("ISBN is empty")]
    Empty,

    #[error("ISBN must have 10 or 13 digits, found {0}")]
    InvalidLength(usize),

    #[error("Invalid character '{0}' in ISBN")]
    InvalidCharacter(char),

    #[error("ISBN checksum mismatch")]
    BadChecksum,

    #[error("ISBN-13 must start with 978 or 979")]
    UnknownPrefix,
}

/// A validated ISBN, always stored as 13 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Isbn(String);

impl Isbn {
    /// Parse an ISBN-10 or ISBN-13, ignoring hyphens and whitespace.
    ///
    /// ```
    /// use bookforged_common::Isbn;
    ///
    /// let a = Isbn::parse("978-0-451-52493-5").unwrap();
    /// let b = Isbn::parse("0451524934").unwrap();
    /// assert_eq!(a, b);
    /// ```
    pub fn parse(input: &str) -> Result<Self, IsbnError> {
        let cleaned: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if cleaned.is_empty() {
            return Err(IsbnError::Empty);
        }

        match cleaned.len() {
            10 => Self::from_isbn10(&cleaned),
            13 => Self::from_isbn13(&cleaned),
            n => Err(IsbnError::InvalidLength(n)),
        }
    }

    fn from_isbn10(s: &str) -> Result<Self, IsbnError> {
        let mut sum = 0u32;
        for (i, c) in s.chars().enumerate() {
            let value = match c {
                '0'..='9' => c as u32 - '0' as u32,
                'X' if i == 9 => 10,
                other => return Err(IsbnError::InvalidCharacter(other)),
            };
            sum += value * (10 - i as u32);
        }
        if sum % 11 != 0 {
            return Err(IsbnError::BadChecksum);
        }

        let body = format!("978{}", &s[..9]);
        let check = isbn13_check_digit(&body);
        Ok(Self(format!("{body}{check}")))
    }

    fn from_isbn13(s: &str) -> Result<Self, IsbnError> {
        if let Some(bad) = s.chars().find(|c| !c.is_ascii_digit()) {
            return Err(IsbnError::InvalidCharacter(bad));
        }
        if !s.starts_with("978") && !s.starts_with("979") {
            return Err(IsbnError::UnknownPrefix);
        }
        let expected = isbn13_check_digit(&s[..12]);
        if s.as_bytes()[12] != expected as u8 + b'0' {
            return Err(IsbnError::BadChecksum);
        }
        Ok(Self(s.to_string()))
    }

    /// The canonical 13-digit form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ISBN-10 form, when one exists (only for the 978 prefix).
    pub fn to_isbn10(&self) -> Option<String> {
        if !self.0.starts_with("978") {
            return None;
        }
        let body = &self.0[3..12];
        let sum: u32 = body
            .bytes()
            .enumerate()
            .map(|(i, b)| (b - b'0') as u32 * (10 - i as u32))
            .sum();
        let check = (11 - sum % 11) % 11;
        let check = if check == 10 {
            'X'
        } else {
            char::from(b'0' + check as u8)
        };
        Some(format!("{body}{check}"))
    }

    /// The EAN prefix (`978` or `979`) and the registration group that follows.
    ///
    /// Group lengths follow the ISBN range table: the group identifies the
    /// language area or country of the registrant.
    pub fn registration_group(&self) -> (&str, &str) {
        let prefix = &self.0[..3];
        let rest = &self.0[3..];
        let len = if prefix == "978" {
            match rest.as_bytes()[0] {
                b'0'..=b'5' | b'7' => 1,
                b'6' => match &rest[..2] {
                    "65" => 2,
                    _ => 3,
                },
                b'8' => 2,
                _ => match &rest[..2] {
                    "90" | "91" | "92" | "93" | "94" => 2,
                    "99" => match &rest[..3] {
                        "999" => 5,
                        _ => 4,
                    },
                    _ => 3,
                },
            }
        } else {
            match rest.as_bytes()[0] {
                b'8' => 1,
                _ => 2,
            }
        };
        (prefix, &rest[..len])
    }
}

fn isbn13_check_digit(first_twelve: &str) -> u32 {
    let sum: u32 = first_twelve
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let d = (b - b'0') as u32;
            if i % 2 == 0 {
                d
            } else {
                d * 3
            }
        })
        .sum();
    (10 - sum % 10) % 10
}

impl fmt::Display for Isbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Isbn {
    type Err = IsbnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Isbn {
    type Error = IsbnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Isbn> for String {
    fn from(isbn: Isbn) -> Self {
        isbn.0
    }
}

impl AsRef<str> for Isbn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
