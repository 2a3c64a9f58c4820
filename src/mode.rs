// src/mode.rs

//! Open-mode parsing.
//!
//! Modes follow the familiar `"rb"` / `"wt"` shorthand: a direction
//! character (`r`, `w`, `a`) plus an optional `b` (binary) or `t` (text).
//! Text is the default when neither is given.

use crate::error::{Error, Result};

/// Direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
    Append,
}

/// A parsed open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub direction: Direction,
    pub binary: bool,
}

impl Mode {
    /// Parses a mode string such as `"r"`, `"rb"`, `"wb"`, `"at"`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMode` for an empty string, an unknown character, a
    /// repeated direction, or conflicting `b`/`t` flags.
    pub fn parse(mode: &str) -> Result<Self> {
        let mut direction: Option<Direction> = None;
        let mut binary: Option<bool> = None;

        for ch in mode.chars() {
            match ch {
                'r' | 'w' | 'a' => {
                    let d = match ch {
                        'r' => Direction::Read,
                        'w' => Direction::Write,
                        _ => Direction::Append,
                    };
                    if direction.is_some() {
                        return Err(Error::invalid_mode(mode, "more than one direction"));
                    }
                    direction = Some(d);
                }
                'b' | 't' => {
                    let b = ch == 'b';
                    if binary.is_some() {
                        return Err(Error::invalid_mode(mode, "more than one of 'b'/'t'"));
                    }
                    binary = Some(b);
                }
                other => {
                    return Err(Error::invalid_mode(
                        mode,
                        format!("unrecognized character '{other}'"),
                    ));
                }
            }
        }

        let direction = direction
            .ok_or_else(|| Error::invalid_mode(mode, "missing direction ('r', 'w' or 'a')"))?;

        Ok(Self {
            direction,
            binary: binary.unwrap_or(false),
        })
    }

    pub fn is_read(&self) -> bool {
        self.direction == Direction::Read
    }

    pub fn is_write(&self) -> bool {
        matches!(self.direction, Direction::Write | Direction::Append)
    }

    pub fn is_append(&self) -> bool {
        self.direction == Direction::Append
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_variants() {
        assert_eq!(
            Mode::parse("r").unwrap(),
            Mode {
                direction: Direction::Read,
                binary: false
            }
        );
        assert_eq!(
            Mode::parse("rb").unwrap(),
            Mode {
                direction: Direction::Read,
                binary: true
            }
        );
        assert_eq!(
            Mode::parse("br").unwrap(),
            Mode {
                direction: Direction::Read,
                binary: true
            }
        );
        assert_eq!(
            Mode::parse("rt").unwrap(),
            Mode {
                direction: Direction::Read,
                binary: false
            }
        );
    }

    #[test]
    fn test_parse_write_and_append() {
        assert!(Mode::parse("wb").unwrap().is_write());
        assert!(!Mode::parse("wb").unwrap().is_append());
        assert!(Mode::parse("ab").unwrap().is_append());
        assert!(Mode::parse("a").unwrap().is_write());
    }

    #[test]
    fn test_parse_rejects_bad_modes() {
        assert!(Mode::parse("").is_err());
        assert!(Mode::parse("rw").is_err());
        assert!(Mode::parse("rbt").is_err());
        assert!(Mode::parse("x").is_err());
        assert!(Mode::parse("b").is_err());
    }
}
