//! Line-oriented GEDCOM reader.
//!
//! Pipeline:
//!   BufRead
//!     └─ next_line()       → bounded byte buffer
//!          └─ split_line()   → Line { level, xref, tag, value }
//!               └─ Parser::feed() → open record + event context
//!                    └─ flush on level 0 → ParsedGedcom

use std::io::{BufRead, Read};

use arxiu_core::tree::Sex;

use crate::{GedcomFamily, GedcomPerson, ParsedGedcom, error::Error};

/// Initial capacity of the line buffer.
const INITIAL_BUFFER: usize = 1024;

/// Longest accepted line, excluding its terminator.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const BOM: char = '\u{feff}';

// ─── Public entry points
// ──────────────────────────────────────────────────────

/// Parse an in-memory GEDCOM document.
pub fn parse(input: &[u8]) -> ParsedGedcom { parse_reader(input) }

/// Parse a GEDCOM stream. Never fails outright: fatal conditions are reported
/// in [`ParsedGedcom::errors`] alongside whatever was read before them.
pub fn parse_reader<R: BufRead>(mut reader: R) -> ParsedGedcom {
  let mut buf = Vec::with_capacity(INITIAL_BUFFER);
  let mut parser = Parser::default();
  let mut line_no = 0usize;
  let mut seen_header = false;

  loop {
    line_no += 1;
    match next_line(&mut reader, &mut buf) {
      Ok(LineRead::Eof) => break,
      Ok(LineRead::TooLong) => {
        parser.out.errors.push(Error::LineTooLong { line: line_no, limit: MAX_LINE_BYTES });
        break;
      }
      Ok(LineRead::Line) => {}
      Err(e) => {
        parser.out.errors.push(e.into());
        break;
      }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut text = text.trim_end_matches(['\n', '\r']);
    if line_no == 1 {
      text = text.trim_start_matches(BOM);
    }
    if text.trim().is_empty() {
      continue;
    }

    if !seen_header {
      if !is_header(text) {
        return ParsedGedcom { errors: vec![Error::MissingHeader], ..Default::default() };
      }
      seen_header = true;
      continue;
    }

    match split_line(text) {
      Some(line) => parser.feed(line),
      None => parser.out.warn(format!("line {line_no}: malformed line ignored")),
    }
  }

  if !seen_header && parser.out.errors.is_empty() {
    return ParsedGedcom { errors: vec![Error::MissingHeader], ..Default::default() };
  }

  parser.finish()
}

// ─── Line reading
// ─────────────────────────────────────────────────────────────

enum LineRead {
  Line,
  TooLong,
  Eof,
}

/// Read one `\n`-terminated line into `buf`, never buffering more than
/// `MAX_LINE_BYTES + 1` bytes.
fn next_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead> {
  buf.clear();
  let n = reader
    .by_ref()
    .take(MAX_LINE_BYTES as u64 + 1)
    .read_until(b'\n', buf)?;
  if n == 0 {
    return Ok(LineRead::Eof);
  }
  if buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
    return Ok(LineRead::TooLong);
  }
  Ok(LineRead::Line)
}

fn is_header(text: &str) -> bool {
  let mut parts = text.split_whitespace();
  parts.next() == Some("0") && parts.next().is_some_and(|t| t.eq_ignore_ascii_case("HEAD"))
}

// ─── Line grammar
// ─────────────────────────────────────────────────────────────

/// `<level> [@xref@] <tag> [value]`
#[derive(Debug, PartialEq, Eq)]
struct Line<'a> {
  level: u8,
  xref:  Option<&'a str>,
  tag:   &'a str,
  value: &'a str,
}

fn split_line(text: &str) -> Option<Line<'_>> {
  let text = text.trim();
  let (level, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
  let level: u8 = level.parse().ok()?;
  let mut rest = rest.trim_start();

  let mut xref = None;
  if rest.starts_with('@') {
    let (id, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    xref = Some(trim_xref(id));
    rest = tail.trim_start();
  }

  let (tag, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
  if tag.is_empty() {
    return None;
  }
  Some(Line { level, xref, tag, value: value.trim() })
}

fn trim_xref(id: &str) -> &str { id.trim().trim_matches('@') }

/// Split `given /surname/` on the first slash pair. Text after the closing
/// slash is dropped.
fn split_name(value: &str) -> (String, String) {
  match value.split_once('/') {
    None => (value.trim().to_owned(), String::new()),
    Some((given, rest)) => {
      let surname = rest.split_once('/').map_or(rest, |(s, _)| s);
      (given.trim().to_owned(), surname.trim().to_owned())
    }
  }
}

fn map_sex(value: &str) -> Sex {
  match value.trim().to_ascii_uppercase().as_str() {
    "M" => Sex::Male,
    "F" => Sex::Female,
    _ => Sex::Unknown,
  }
}

fn non_empty(value: &str) -> Option<String> {
  (!value.is_empty()).then(|| value.to_owned())
}

// ─── Record state machine
// ─────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Event {
  Birth,
  Death,
}

#[derive(Default)]
enum Open {
  #[default]
  None,
  Person(GedcomPerson),
  Family(GedcomFamily),
}

#[derive(Default)]
struct Parser {
  out:   ParsedGedcom,
  open:  Open,
  event: Option<Event>,
  named: bool,
}

impl Parser {
  fn feed(&mut self, line: Line<'_>) {
    if line.level == 0 {
      self.flush();
      self.open = match (line.xref, line.tag.to_ascii_uppercase().as_str()) {
        (Some(id), "INDI") => {
          Open::Person(GedcomPerson { xref: id.to_owned(), ..Default::default() })
        }
        (Some(id), "FAM") => {
          Open::Family(GedcomFamily { xref: id.to_owned(), ..Default::default() })
        }
        _ => Open::None,
      };
      return;
    }

    let tag = line.tag.to_ascii_uppercase();
    match &mut self.open {
      Open::None => {}
      Open::Person(person) => match (line.level, tag.as_str()) {
        (1, "NAME") => {
          self.event = None;
          if !self.named {
            (person.given, person.surname) = split_name(line.value);
            self.named = true;
          }
        }
        (1, "SEX") => {
          self.event = None;
          person.sex = map_sex(line.value);
        }
        (1, "BIRT") => self.event = Some(Event::Birth),
        (1, "DEAT") => self.event = Some(Event::Death),
        (1, _) => self.event = None,
        (2, "DATE") => match self.event {
          Some(Event::Birth) => person.birth_date = non_empty(line.value),
          Some(Event::Death) => person.death_date = non_empty(line.value),
          None => {}
        },
        (2, "PLAC") => match self.event {
          Some(Event::Birth) => person.birth_place = non_empty(line.value),
          Some(Event::Death) => person.death_place = non_empty(line.value),
          None => {}
        },
        _ => {}
      },
      Open::Family(family) => {
        if line.level != 1 {
          return;
        }
        let id = trim_xref(line.value);
        if id.is_empty() {
          return;
        }
        match tag.as_str() {
          "HUSB" => family.husband = Some(id.to_owned()),
          "WIFE" => family.wife = Some(id.to_owned()),
          "CHIL" => family.children.push(id.to_owned()),
          _ => {}
        }
      }
    }
  }

  fn flush(&mut self) {
    match std::mem::take(&mut self.open) {
      Open::None => {}
      Open::Person(p) => self.out.persons.push(p),
      Open::Family(f) => self.out.families.push(f),
    }
    self.event = None;
    self.named = false;
  }

  fn finish(mut self) -> ParsedGedcom {
    self.flush();
    self.out
  }
}

// ─── Tests
// ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  const S1: &str = "0 HEAD\n0 @I1@ INDI\n1 NAME Joan /Puig/\n1 SEX M\n1 BIRT\n2 DATE 1 JAN \
                    1900\n0 @I2@ INDI\n1 NAME Maria /Soler/\n1 SEX F\n0 @F1@ FAM\n1 HUSB \
                    @I1@\n1 WIFE @I2@\n1 CHIL @I1@\n0 TRLR\n";

  #[test]
  fn happy_path() {
    let parsed = parse(S1.as_bytes());
    assert!(parsed.is_ok());
    assert_eq!(parsed.persons.len(), 2);
    assert_eq!(parsed.families.len(), 1);

    let joan = &parsed.persons[0];
    assert_eq!(joan.xref, "I1");
    assert_eq!(joan.given, "Joan");
    assert_eq!(joan.surname, "Puig");
    assert_eq!(joan.sex, Sex::Male);
    assert_eq!(joan.birth_date.as_deref(), Some("1 JAN 1900"));

    let maria = &parsed.persons[1];
    assert_eq!(maria.sex, Sex::Female);
    assert_eq!(maria.birth_date, None);

    let fam = &parsed.families[0];
    assert_eq!(fam.husband.as_deref(), Some("I1"));
    assert_eq!(fam.wife.as_deref(), Some("I2"));
    assert_eq!(fam.children, vec!["I1".to_owned()]);
  }

  #[test]
  fn missing_header_is_a_single_error() {
    let parsed = parse(b"0 @I1@ INDI\n1 NAME Joan /Puig/\n");
    assert!(parsed.persons.is_empty());
    assert!(parsed.families.is_empty());
    assert_eq!(parsed.errors, vec![Error::MissingHeader]);
  }

  #[test]
  fn empty_input_is_missing_header() {
    let parsed = parse(b"\n\n");
    assert_eq!(parsed.errors, vec![Error::MissingHeader]);
  }

  #[test]
  fn leading_blank_lines_crlf_and_bom_are_tolerated() {
    let input = "\u{feff}\r\n\r\n0 HEAD\r\n0 @I1@ INDI\r\n1 NAME Anna /Vidal/\r\n0 TRLR\r\n";
    let parsed = parse(input.as_bytes());
    assert!(parsed.is_ok());
    assert_eq!(parsed.persons.len(), 1);
    assert_eq!(parsed.persons[0].surname, "Vidal");
  }

  #[test]
  fn name_without_slashes_is_all_given() {
    let parsed = parse(b"0 HEAD\n0 @I1@ INDI\n1 NAME Pere Antoni\n");
    assert_eq!(parsed.persons[0].given, "Pere Antoni");
    assert_eq!(parsed.persons[0].surname, "");
  }

  #[test]
  fn first_name_line_wins() {
    let parsed = parse(b"0 HEAD\n0 @I1@ INDI\n1 NAME Pere /Roca/\n1 NAME Pedro /Rocha/\n");
    assert_eq!(parsed.persons[0].given, "Pere");
    assert_eq!(parsed.persons[0].surname, "Roca");
  }

  #[test]
  fn other_sex_values_map_to_unknown() {
    let parsed = parse(b"0 HEAD\n0 @I1@ INDI\n1 SEX U\n0 @I2@ INDI\n");
    assert_eq!(parsed.persons[0].sex, Sex::Unknown);
    assert_eq!(parsed.persons[1].sex, Sex::Unset);
  }

  #[test]
  fn event_context_is_cleared_by_other_level_one_lines() {
    let input = "0 HEAD\n0 @I1@ INDI\n1 BIRT\n2 DATE 1850\n2 PLAC Vic\n1 OCCU pagès\n2 DATE \
                 1870\n1 DEAT\n2 DATE ABT 1910\n2 PLAC Manlleu\n";
    let p = &parse(input.as_bytes()).persons[0];
    assert_eq!(p.birth_date.as_deref(), Some("1850"));
    assert_eq!(p.birth_place.as_deref(), Some("Vic"));
    assert_eq!(p.death_date.as_deref(), Some("ABT 1910"));
    assert_eq!(p.death_place.as_deref(), Some("Manlleu"));
  }

  #[test]
  fn unrelated_level_zero_closes_record() {
    let input = "0 HEAD\n0 @I1@ INDI\n0 @S1@ SOUR\n1 NAME not a person\n0 @F1@ FAM\n1 CHIL @I1@\n";
    let parsed = parse(input.as_bytes());
    assert_eq!(parsed.persons.len(), 1);
    assert_eq!(parsed.persons[0].given, "");
    assert_eq!(parsed.families.len(), 1);
  }

  #[test]
  fn malformed_lines_warn_up_to_cap() {
    let mut input = String::from("0 HEAD\n");
    for i in 0..30 {
      input.push_str(&format!("x{i} garbage\n"));
    }
    input.push_str("0 @I1@ INDI\n");
    let parsed = parse(input.as_bytes());
    assert!(parsed.is_ok());
    assert_eq!(parsed.warnings.len(), arxiu_core::import::WARNINGS_CAP);
    assert_eq!(parsed.persons.len(), 1);
  }

  #[test]
  fn overlong_line_stops_parsing_and_keeps_prior_records() {
    let mut input = b"0 HEAD\n0 @I1@ INDI\n1 NAME A /B/\n1 NOTE ".to_vec();
    input.extend(std::iter::repeat_n(b'a', MAX_LINE_BYTES + 10));
    input.extend(b"\n0 @I2@ INDI\n");
    let parsed = parse(&input);
    assert!(matches!(parsed.errors.as_slice(), [Error::LineTooLong { line: 4, .. }]));
    assert_eq!(parsed.persons.len(), 1);
    assert_eq!(parsed.persons[0].surname, "B");
  }

  #[test]
  fn parsing_is_deterministic() {
    assert_eq!(parse(S1.as_bytes()), parse(S1.as_bytes()));
  }

  #[test]
  fn split_line_handles_xref_and_value() {
    assert_eq!(
      split_line("0 @I1@ INDI"),
      Some(Line { level: 0, xref: Some("I1"), tag: "INDI", value: "" })
    );
    assert_eq!(
      split_line("1 NAME  Joan  /Puig/ "),
      Some(Line { level: 1, xref: None, tag: "NAME", value: "Joan  /Puig/" })
    );
    assert_eq!(split_line("NAME Joan"), None);
    assert_eq!(split_line("1"), None);
  }
}
