//! Mapping of loosely-shaped JSON list responses to canonical records.
//!
//! Gramps Web and its look-alikes disagree on field names, so each field is
//! read from the first of several candidate paths that holds a value.

use arxiu_core::tree::Sex;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemotePerson {
  pub external_id: String,
  pub given:       String,
  pub surname:     String,
  pub sex:         Sex,
  pub birth_date:  Option<String>,
  pub death_date:  Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFamily {
  pub father_id: Option<String>,
  pub mother_id: Option<String>,
  pub children:  Vec<String>,
}

const ENVELOPE_KEYS: [&str; 3] = ["data", "items", "results"];

/// Unwrap a bare array or a `{data|items|results: [...]}` envelope.
pub(crate) fn list_entries(body: Value) -> Result<Vec<Value>> {
  match body {
    Value::Array(items) => Ok(items),
    Value::Object(mut map) => {
      for key in ENVELOPE_KEYS {
        if let Some(Value::Array(items)) = map.remove(key) {
          return Ok(items);
        }
      }
      Err(Error::BadFormat("object without data, items or results array".into()))
    }
    other => Err(Error::BadFormat(format!("expected list, got {}", kind(&other)))),
  }
}

/// Entries without an external ID are dropped.
pub(crate) fn map_people(entries: &[Value]) -> Vec<RemotePerson> {
  entries.iter().filter_map(map_person).collect()
}

pub(crate) fn map_families(entries: &[Value]) -> Vec<RemoteFamily> {
  entries.iter().filter_map(map_family).collect()
}

const ID_KEYS: [&str; 4] = ["gramps_id", "id", "handle", "person_id"];

fn map_person(v: &Value) -> Option<RemotePerson> {
  let external_id = id_of(v)?;
  let mut given = first_str(v, &[
    &["primary_name", "first"],
    &["primary_name", "first_name"],
    &["first_name"],
    &["given"],
  ]);
  let mut surname = first_str(v, &[
    &["primary_name", "surname"],
    &["primary_name", "surname_list", "0", "surname"],
    &["surname"],
    &["last_name"],
  ]);
  if let Some((g, s)) = first_str(v, &[&["name"]]).map(|n| split_name(&n)) {
    given = given.or(g);
    surname = surname.or(s);
  }

  Some(RemotePerson {
    external_id,
    given: given.unwrap_or_default(),
    surname: surname.unwrap_or_default(),
    sex: first(v, &[&["gender"], &["sex"]]).map_or(Sex::Unknown, map_sex),
    birth_date: event_date(v, &["birth_date", "birth", "birth_event", "birthDate"])
      .or_else(|| first_str(v, &[&["profile", "birth", "date"]])),
    death_date: event_date(v, &["death_date", "death", "death_event", "deathDate"])
      .or_else(|| first_str(v, &[&["profile", "death", "date"]])),
  })
}

fn map_family(v: &Value) -> Option<RemoteFamily> {
  if !v.is_object() {
    return None;
  }
  let children = first(v, &[&["children"], &["child_ref_list"]])
    .and_then(Value::as_array)
    .map(|list| list.iter().filter_map(person_ref).collect())
    .unwrap_or_default();
  Some(RemoteFamily {
    father_id: parent_ref(v, &["father", "father_id", "father_handle"]),
    mother_id: parent_ref(v, &["mother", "mother_id", "mother_handle"]),
    children,
  })
}

fn id_of(v: &Value) -> Option<String> {
  ID_KEYS.iter().find_map(|key| v.get(key).and_then(scalar))
}

/// An ID string, or an object carrying one of the ID keys or a `ref`.
fn person_ref(v: &Value) -> Option<String> {
  scalar(v).or_else(|| id_of(v)).or_else(|| first_str(v, &[&["ref"]]))
}

fn parent_ref(v: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|key| v.get(key).and_then(person_ref))
}

/// First of `keys` holding a date, either as a string or as an object with
/// `date`, `date_val`, `value` or `text`.
fn event_date(v: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().filter_map(|key| v.get(key)).find_map(|field| {
    scalar(field).or_else(|| first_str(field, &[&["date"], &["date_val"], &["value"], &["text"]]))
  })
}

/// Split a combined name. `Joan /Puig/` reads the surname between slashes;
/// otherwise the last word is the surname.
fn split_name(name: &str) -> (Option<String>, Option<String>) {
  let some = |s: &str| {
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    (!s.is_empty()).then_some(s)
  };
  if let Some((given, rest)) = name.split_once('/') {
    let surname = rest.split('/').next().unwrap_or_default();
    return (some(given), some(surname));
  }
  match name.trim().rsplit_once(char::is_whitespace) {
    Some((given, surname)) => (some(given), some(surname)),
    None => (some(name), None),
  }
}

/// `M|Male|1` → male, `F|Female|0` → female, anything else → unknown.
pub(crate) fn map_sex(v: &Value) -> Sex {
  let Some(raw) = scalar(v) else {
    return Sex::Unknown;
  };
  match raw.to_ascii_lowercase().as_str() {
    "m" | "male" | "1" => Sex::Male,
    "f" | "female" | "0" => Sex::Female,
    _ => Sex::Unknown,
  }
}

// ─── JSON path helpers
// ────────────────────────────────────────────────────────

fn lookup<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
  path.iter().try_fold(v, |cur, key| match cur {
    Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => cur.get(key),
  })
}

fn first<'a>(v: &'a Value, paths: &[&[&str]]) -> Option<&'a Value> {
  paths.iter().filter_map(|p| lookup(v, p)).find(|x| !x.is_null())
}

fn first_str(v: &Value, paths: &[&[&str]]) -> Option<String> {
  paths.iter().filter_map(|p| lookup(v, p)).find_map(scalar)
}

/// Non-empty string or number rendered as a trimmed string.
fn scalar(v: &Value) -> Option<String> {
  let s = match v {
    Value::String(s) => s.trim().to_owned(),
    Value::Number(n) => n.to_string(),
    _ => return None,
  };
  (!s.is_empty()).then_some(s)
}

fn kind(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn envelopes_are_unwrapped() {
    assert_eq!(list_entries(json!([1, 2])).unwrap().len(), 2);
    assert_eq!(list_entries(json!({"data": [1]})).unwrap().len(), 1);
    assert_eq!(list_entries(json!({"items": [1, 2, 3]})).unwrap().len(), 3);
    assert_eq!(list_entries(json!({"results": []})).unwrap().len(), 0);
    assert!(matches!(list_entries(json!({"rows": []})), Err(Error::BadFormat(_))));
    assert!(matches!(list_entries(json!("nope")), Err(Error::BadFormat(_))));
  }

  #[test]
  fn gramps_web_person_shape() {
    let entries = vec![json!({
      "handle": "abc123",
      "gramps_id": "I0001",
      "gender": 1,
      "primary_name": {
        "first_name": "Joan",
        "surname_list": [{"surname": "Puig"}]
      },
      "profile": {"birth": {"date": "1900-01-01"}, "death": {"date": ""}}
    })];
    let people = map_people(&entries);
    assert_eq!(people, vec![RemotePerson {
      external_id: "I0001".into(),
      given:       "Joan".into(),
      surname:     "Puig".into(),
      sex:         Sex::Male,
      birth_date:  Some("1900-01-01".into()),
      death_date:  None,
    }]);
  }

  #[test]
  fn flat_person_shape_and_missing_id() {
    let entries = vec![
      json!({"id": 7, "first_name": "Maria", "last_name": "Soler", "sex": "F"}),
      json!({"first_name": "Anonymous"}),
      json!({"gramps_id": "  ", "given": "Blank"}),
    ];
    let people = map_people(&entries);
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].external_id, "7");
    assert_eq!(people[0].surname, "Soler");
    assert_eq!(people[0].sex, Sex::Female);
  }

  #[test]
  fn id_keys_in_order() {
    let id = |v: Value| map_people(&[v]).pop().map(|p| p.external_id);
    let all = json!({"gramps_id": "G", "id": "I", "handle": "H", "person_id": "P"});
    assert_eq!(id(all), Some("G".into()));
    assert_eq!(id(json!({"id": "I", "handle": "H", "person_id": "P"})), Some("I".into()));
    assert_eq!(id(json!({"handle": "H", "person_id": "P"})), Some("H".into()));
    assert_eq!(id(json!({"person_id": "P"})), Some("P".into()));
    assert_eq!(id(json!({"gramps_id": "", "person_id": 12})), Some("12".into()));
  }

  #[test]
  fn name_and_date_fallbacks() {
    let cases = [
      (json!({"primary_name": {"first": "Rosa", "surname": "Vila"}}), "Rosa", "Vila"),
      (json!({"first_name": "Rosa", "surname": "Vila", "name": "X /Y/"}), "Rosa", "Vila"),
      (json!({"name": "Joan /Puig/"}), "Joan", "Puig"),
      (json!({"name": "Joan Maria /Puig i Soler/"}), "Joan Maria", "Puig i Soler"),
      (json!({"name": "Joan Maria Puig"}), "Joan Maria", "Puig"),
      (json!({"name": "Joan"}), "Joan", ""),
      (json!({"first_name": "Pere", "name": "Ignored Soler"}), "Pere", "Soler"),
    ];
    for (mut entry, given, surname) in cases {
      entry["id"] = json!("X");
      let person = map_people(&[entry.clone()]).pop().unwrap();
      assert_eq!((person.given.as_str(), person.surname.as_str()), (given, surname), "{entry}");
    }

    let birth = |v: Value| {
      let mut entry = v;
      entry["id"] = json!("X");
      map_people(&[entry]).pop().unwrap().birth_date
    };
    assert_eq!(birth(json!({"birth_date": "1900", "birth": "1800"})), Some("1900".into()));
    assert_eq!(birth(json!({"birth": "1901"})), Some("1901".into()));
    assert_eq!(birth(json!({"birth": {"date_val": "1902"}})), Some("1902".into()));
    assert_eq!(birth(json!({"birth": {"date": "", "value": "1903"}})), Some("1903".into()));
    assert_eq!(birth(json!({"birth_event": {"text": "c. 1904"}})), Some("c. 1904".into()));
    assert_eq!(birth(json!({"birthDate": "1905"})), Some("1905".into()));
    assert_eq!(birth(json!({"birth": {}, "birthDate": "1906"})), Some("1906".into()));
    assert_eq!(birth(json!({"profile": {"birth": {"date": "1907"}}})), Some("1907".into()));
    assert_eq!(birth(json!({"birth": {"place": "Vic"}})), None);

    let death = map_people(&[json!({"id": "X", "death_event": {"date": "1950"}})]);
    assert_eq!(death[0].death_date.as_deref(), Some("1950"));
  }

  #[test]
  fn loosely_shaped_people_keep_names_and_dates() {
    let entries = vec![
      json!({"person_id": "P1", "name": "Joan /Puig/", "birthDate": "1900"}),
      json!({
        "id": "P2",
        "primary_name": {"first": "Rosa", "surname": "Vila"},
        "birth": {"date_val": "1901"}
      }),
    ];
    let people = map_people(&entries);
    assert_eq!(people.len(), 2);
    assert_eq!(people[0].external_id, "P1");
    assert_eq!((people[0].given.as_str(), people[0].surname.as_str()), ("Joan", "Puig"));
    assert_eq!(people[0].birth_date.as_deref(), Some("1900"));
    assert_eq!(people[1].external_id, "P2");
    assert_eq!((people[1].given.as_str(), people[1].surname.as_str()), ("Rosa", "Vila"));
    assert_eq!(people[1].birth_date.as_deref(), Some("1901"));
  }

  #[test]
  fn family_references_accept_any_id_key() {
    let fams = map_families(&[json!({
      "father": {"gramps_id": "I1"},
      "mother_id": "I2",
      "children": ["I3", {"person_id": "I4"}, {"gramps_id": "I5"}, {"handle": "h6"}, {}]
    })]);
    assert_eq!(fams[0].father_id.as_deref(), Some("I1"));
    assert_eq!(fams[0].mother_id.as_deref(), Some("I2"));
    assert_eq!(fams[0].children, vec!["I3", "I4", "I5", "h6"]);
  }

  #[test]
  fn sex_mapping() {
    assert_eq!(map_sex(&json!("Male")), Sex::Male);
    assert_eq!(map_sex(&json!("m")), Sex::Male);
    assert_eq!(map_sex(&json!(1)), Sex::Male);
    assert_eq!(map_sex(&json!("Female")), Sex::Female);
    assert_eq!(map_sex(&json!(0)), Sex::Female);
    assert_eq!(map_sex(&json!(2)), Sex::Unknown);
    assert_eq!(map_sex(&json!(null)), Sex::Unknown);
  }

  #[test]
  fn family_shapes() {
    let entries = vec![
      json!({
        "father_handle": "h1",
        "mother_handle": "h2",
        "child_ref_list": [{"ref": "h3"}, {"ref": "h4"}]
      }),
      json!({"father_id": "I1", "children": ["I5", 6]}),
      json!("not an object"),
    ];
    let fams = map_families(&entries);
    assert_eq!(fams.len(), 2);
    assert_eq!(fams[0].children, vec!["h3".to_owned(), "h4".to_owned()]);
    assert_eq!(fams[1].mother_id, None);
    assert_eq!(fams[1].children, vec!["I5".to_owned(), "6".to_owned()]);
  }
}
