//! GEDCOM 5.5 subset parser for Arxiu.
//!
//! Reads individuals (`INDI`) and families (`FAM`) out of a byte stream and
//! returns plain records. Pure synchronous; no store or filesystem access
//! beyond the reader it is handed.
//!
//! # Quick start
//!
//! ```no_run
//! let input = b"0 HEAD\n0 @I1@ INDI\n1 NAME Joan /Puig/\n0 TRLR\n";
//! let parsed = arxiu_gedcom::parse(&input[..]);
//! assert_eq!(parsed.persons.len(), 1);
//! ```

pub mod error;
mod parse;

use arxiu_core::tree::Sex;
pub use arxiu_core::tree::year_of;
pub use error::{Error, Result};
pub use parse::{MAX_LINE_BYTES, parse, parse_reader};

// ─── Public types
// ─────────────────────────────────────────────────────────────

/// One `0 @id@ INDI` record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GedcomPerson {
  /// Cross-reference ID with the surrounding `@` removed.
  pub xref:        String,
  pub given:       String,
  pub surname:     String,
  pub sex:         Sex,
  pub birth_date:  Option<String>,
  pub birth_place: Option<String>,
  pub death_date:  Option<String>,
  pub death_place: Option<String>,
}

/// One `0 @id@ FAM` record. Member IDs are `@`-trimmed person xrefs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GedcomFamily {
  pub xref:     String,
  pub husband:  Option<String>,
  pub wife:     Option<String>,
  pub children: Vec<String>,
}

/// Everything a parse produced, in file order.
///
/// `warnings` is capped at [`arxiu_core::import::WARNINGS_CAP`] entries.
/// `errors` is non-empty only when parsing stopped early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedGedcom {
  pub persons:  Vec<GedcomPerson>,
  pub families: Vec<GedcomFamily>,
  pub warnings: Vec<String>,
  pub errors:   Vec<Error>,
}

impl ParsedGedcom {
  pub fn is_ok(&self) -> bool { self.errors.is_empty() }

  pub(crate) fn warn(&mut self, message: String) {
    if self.warnings.len() < arxiu_core::import::WARNINGS_CAP {
      self.warnings.push(message);
    }
  }
}
