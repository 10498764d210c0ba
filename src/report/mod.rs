//! Output for the command-line binary.
//!
//! - [`terminal`] — colored tables and tree drawings; respects `--quiet`.
//! - [`print_json`] — pretty JSON of any result shape, for `--json`.

pub mod terminal;

use serde::Serialize;

use crate::error::Result;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
