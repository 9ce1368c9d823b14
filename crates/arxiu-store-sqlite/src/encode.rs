//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`).
//! Enums are stored as their snake_case names. Structured fields (summaries,
//! reasons, relation lists, draft content) are stored as compact JSON.

use std::str::FromStr;

use arxiu_core::{
  connection::ExternalConnection,
  credit::{LedgerEntry, MediaGrant},
  draft::{DraftContent, DraftVersion, ModeratedEntity},
  group::{Group, GroupChange, GroupConflict, GroupMember, GroupTree},
  import::{ImportJob, ImportSource, JobProgress},
  matching::{Match, MatchDecision},
  notification::Notification,
  search::SearchDoc,
  tree::{Person, Relation, Tree},
  user::User,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn now() -> String { encode_dt(Utc::now()) }

/// Parse a stored snake_case enum name.
pub fn decode_enum<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| {
    Error::Core(arxiu_core::Error::UnknownVariant { kind, value: s.to_owned() })
  })
}

fn count(n: i64) -> u64 { u64::try_from(n).unwrap_or(0) }

// ─── Users ───────────────────────────────────────────────────────────────────

pub const USER_COLUMNS: &str = "id, username, email, password_hash, role, created_at";

pub struct RawUser {
  pub id:            i64,
  pub username:      String,
  pub email:         String,
  pub password_hash: String,
  pub role:          String,
  pub created_at:    String,
}

impl RawUser {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      username:      row.get(1)?,
      email:         row.get(2)?,
      password_hash: row.get(3)?,
      role:          row.get(4)?,
      created_at:    row.get(5)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      id:            self.id,
      username:      self.username,
      email:         self.email,
      password_hash: self.password_hash,
      role:          decode_enum("user role", &self.role)?,
      created_at:    decode_dt(&self.created_at)?,
    })
  }
}

// ─── Trees, persons, relations ───────────────────────────────────────────────

pub const TREE_COLUMNS: &str =
  "id, owner_id, name, visibility, status, created_at, updated_at";

pub struct RawTree {
  pub id:         i64,
  pub owner_id:   i64,
  pub name:       String,
  pub visibility: String,
  pub status:     String,
  pub created_at: String,
  pub updated_at: String,
}

impl RawTree {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      owner_id:   row.get(1)?,
      name:       row.get(2)?,
      visibility: row.get(3)?,
      status:     row.get(4)?,
      created_at: row.get(5)?,
      updated_at: row.get(6)?,
    })
  }

  pub fn into_tree(self) -> Result<Tree> {
    Ok(Tree {
      id:         self.id,
      owner_id:   self.owner_id,
      name:       self.name,
      visibility: decode_enum("tree visibility", &self.visibility)?,
      status:     decode_enum("tree status", &self.status)?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub const PERSON_COLUMNS: &str = "id, tree_id, external_id, given, surname1, surname2, \
                                  full_name, sex, birth_date, birth_place, death_date, \
                                  death_place, visibility, status, created_at, updated_at";

pub struct RawPerson {
  pub id:          i64,
  pub tree_id:     i64,
  pub external_id: Option<String>,
  pub given:       String,
  pub surname1:    String,
  pub surname2:    String,
  pub full_name:   String,
  pub sex:         String,
  pub birth_date:  Option<String>,
  pub birth_place: Option<String>,
  pub death_date:  Option<String>,
  pub death_place: Option<String>,
  pub visibility:  String,
  pub status:      String,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawPerson {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      tree_id:     row.get(1)?,
      external_id: row.get(2)?,
      given:       row.get(3)?,
      surname1:    row.get(4)?,
      surname2:    row.get(5)?,
      full_name:   row.get(6)?,
      sex:         row.get(7)?,
      birth_date:  row.get(8)?,
      birth_place: row.get(9)?,
      death_date:  row.get(10)?,
      death_place: row.get(11)?,
      visibility:  row.get(12)?,
      status:      row.get(13)?,
      created_at:  row.get(14)?,
      updated_at:  row.get(15)?,
    })
  }

  pub fn into_person(self) -> Result<Person> {
    Ok(Person {
      id:          self.id,
      tree_id:     self.tree_id,
      external_id: self.external_id,
      given:       self.given,
      surname1:    self.surname1,
      surname2:    self.surname2,
      full_name:   self.full_name,
      sex:         decode_enum("sex", &self.sex)?,
      birth_date:  self.birth_date,
      birth_place: self.birth_place,
      death_date:  self.death_date,
      death_place: self.death_place,
      visibility:  decode_enum("person visibility", &self.visibility)?,
      status:      decode_enum("person status", &self.status)?,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub const RELATION_COLUMNS: &str = "id, tree_id, from_id, to_id, role, created_at";

pub struct RawRelation {
  pub id:         i64,
  pub tree_id:    i64,
  pub from_id:    i64,
  pub to_id:      i64,
  pub role:       String,
  pub created_at: String,
}

impl RawRelation {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      tree_id:    row.get(1)?,
      from_id:    row.get(2)?,
      to_id:      row.get(3)?,
      role:       row.get(4)?,
      created_at: row.get(5)?,
    })
  }

  pub fn into_relation(self) -> Result<Relation> {
    Ok(Relation {
      id:         self.id,
      tree_id:    self.tree_id,
      from_id:    self.from_id,
      to_id:      self.to_id,
      role:       decode_enum("relation role", &self.role)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

// ─── Imports ─────────────────────────────────────────────────────────────────

pub const SOURCE_COLUMNS: &str = "id, owner_id, source_type, original_filename, \
                                  storage_path, size_bytes, checksum, created_at";

pub struct RawSource {
  pub id:                i64,
  pub owner_id:          i64,
  pub source_type:       String,
  pub original_filename: String,
  pub storage_path:      String,
  pub size_bytes:        i64,
  pub checksum:          String,
  pub created_at:        String,
}

impl RawSource {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                row.get(0)?,
      owner_id:          row.get(1)?,
      source_type:       row.get(2)?,
      original_filename: row.get(3)?,
      storage_path:      row.get(4)?,
      size_bytes:        row.get(5)?,
      checksum:          row.get(6)?,
      created_at:        row.get(7)?,
    })
  }

  pub fn into_source(self) -> Result<ImportSource> {
    Ok(ImportSource {
      id:                self.id,
      owner_id:          self.owner_id,
      source_type:       decode_enum("source type", &self.source_type)?,
      original_filename: self.original_filename,
      storage_path:      self.storage_path,
      size_bytes:        count(self.size_bytes),
      checksum:          self.checksum,
      created_at:        decode_dt(&self.created_at)?,
    })
  }
}

pub const JOB_COLUMNS: &str = "id, owner_id, tree_id, source_id, connection_id, job_type, \
                               mode, status, progress_done, progress_total, error_message, \
                               summary_json, created_by, created_at, started_at, finished_at";

pub struct RawJob {
  pub id:             i64,
  pub owner_id:       i64,
  pub tree_id:        i64,
  pub source_id:      Option<i64>,
  pub connection_id:  Option<i64>,
  pub job_type:       String,
  pub mode:           String,
  pub status:         String,
  pub progress_done:  i64,
  pub progress_total: i64,
  pub error_message:  Option<String>,
  pub summary_json:   Option<String>,
  pub created_by:     i64,
  pub created_at:     String,
  pub started_at:     Option<String>,
  pub finished_at:    Option<String>,
}

impl RawJob {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:             row.get(0)?,
      owner_id:       row.get(1)?,
      tree_id:        row.get(2)?,
      source_id:      row.get(3)?,
      connection_id:  row.get(4)?,
      job_type:       row.get(5)?,
      mode:           row.get(6)?,
      status:         row.get(7)?,
      progress_done:  row.get(8)?,
      progress_total: row.get(9)?,
      error_message:  row.get(10)?,
      summary_json:   row.get(11)?,
      created_by:     row.get(12)?,
      created_at:     row.get(13)?,
      started_at:     row.get(14)?,
      finished_at:    row.get(15)?,
    })
  }

  pub fn into_job(self) -> Result<ImportJob> {
    Ok(ImportJob {
      id:            self.id,
      owner_id:      self.owner_id,
      tree_id:       self.tree_id,
      source_id:     self.source_id,
      connection_id: self.connection_id,
      job_type:      decode_enum("job type", &self.job_type)?,
      mode:          decode_enum("import mode", &self.mode)?,
      status:        decode_enum("job status", &self.status)?,
      progress:      JobProgress {
        done:  count(self.progress_done),
        total: count(self.progress_total),
      },
      error_message: self.error_message,
      summary:       self.summary_json.as_deref().map(serde_json::from_str).transpose()?,
      created_by:    self.created_by,
      created_at:    decode_dt(&self.created_at)?,
      started_at:    decode_opt_dt(self.started_at)?,
      finished_at:   decode_opt_dt(self.finished_at)?,
    })
  }
}

// ─── Connections ─────────────────────────────────────────────────────────────

pub const CONNECTION_COLUMNS: &str = "id, owner_id, tree_id, base_url, username, \
                                      token_sealed, status, last_sync_at, last_error, \
                                      failures, next_sync_at, created_at";

pub struct RawConnection {
  pub id:           i64,
  pub owner_id:     i64,
  pub tree_id:      i64,
  pub base_url:     String,
  pub username:     Option<String>,
  pub token_sealed: String,
  pub status:       String,
  pub last_sync_at: Option<String>,
  pub last_error:   Option<String>,
  pub failures:     i64,
  pub next_sync_at: Option<String>,
  pub created_at:   String,
}

impl RawConnection {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      owner_id:     row.get(1)?,
      tree_id:      row.get(2)?,
      base_url:     row.get(3)?,
      username:     row.get(4)?,
      token_sealed: row.get(5)?,
      status:       row.get(6)?,
      last_sync_at: row.get(7)?,
      last_error:   row.get(8)?,
      failures:     row.get(9)?,
      next_sync_at: row.get(10)?,
      created_at:   row.get(11)?,
    })
  }

  pub fn into_connection(self) -> Result<ExternalConnection> {
    Ok(ExternalConnection {
      id:           self.id,
      owner_id:     self.owner_id,
      tree_id:      self.tree_id,
      base_url:     self.base_url,
      username:     self.username,
      token_sealed: self.token_sealed,
      status:       decode_enum("connection status", &self.status)?,
      last_sync_at: decode_opt_dt(self.last_sync_at)?,
      last_error:   self.last_error,
      failures:     u32::try_from(self.failures).unwrap_or(0),
      next_sync_at: decode_opt_dt(self.next_sync_at)?,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

// ─── Search docs ─────────────────────────────────────────────────────────────

/// Prefixed with `d.` so the list can be used in joins.
pub const DOC_COLUMNS: &str = "d.entity_type, d.entity_id, d.person_norm, \
                               d.person_tokens_json, d.given_norm, d.surname_norm, \
                               d.surname_canon, d.year, d.municipality_id, \
                               d.municipality_name, d.relations_json";

pub struct RawDoc {
  pub entity_type:        String,
  pub entity_id:          i64,
  pub person_norm:        String,
  pub person_tokens_json: String,
  pub given_norm:         String,
  pub surname_norm:       String,
  pub surname_canon:      String,
  pub year:               Option<i32>,
  pub municipality_id:    Option<i64>,
  pub municipality_name:  Option<String>,
  pub relations_json:     String,
}

impl RawDoc {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entity_type:        row.get(0)?,
      entity_id:          row.get(1)?,
      person_norm:        row.get(2)?,
      person_tokens_json: row.get(3)?,
      given_norm:         row.get(4)?,
      surname_norm:       row.get(5)?,
      surname_canon:      row.get(6)?,
      year:               row.get(7)?,
      municipality_id:    row.get(8)?,
      municipality_name:  row.get(9)?,
      relations_json:     row.get(10)?,
    })
  }

  pub fn into_doc(self) -> Result<SearchDoc> {
    Ok(SearchDoc {
      entity_type:       decode_enum("target type", &self.entity_type)?,
      entity_id:         self.entity_id,
      person_norm:       self.person_norm,
      person_tokens:     serde_json::from_str(&self.person_tokens_json)?,
      given_norm:        self.given_norm,
      surname_norm:      self.surname_norm,
      surname_canon:     self.surname_canon,
      year:              self.year,
      municipality_id:   self.municipality_id,
      municipality_name: self.municipality_name,
      relations:         serde_json::from_str(&self.relations_json)?,
    })
  }
}

// ─── Matches ─────────────────────────────────────────────────────────────────

pub const MATCH_COLUMNS: &str = "id, owner_id, tree_id, person_id, target_type, target_id, \
                                 score, reason_json, status, created_at, updated_at";

pub struct RawMatch {
  pub id:          i64,
  pub owner_id:    i64,
  pub tree_id:     i64,
  pub person_id:   i64,
  pub target_type: String,
  pub target_id:   i64,
  pub score:       f64,
  pub reason_json: String,
  pub status:      String,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawMatch {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      owner_id:    row.get(1)?,
      tree_id:     row.get(2)?,
      person_id:   row.get(3)?,
      target_type: row.get(4)?,
      target_id:   row.get(5)?,
      score:       row.get(6)?,
      reason_json: row.get(7)?,
      status:      row.get(8)?,
      created_at:  row.get(9)?,
      updated_at:  row.get(10)?,
    })
  }

  pub fn into_match(self) -> Result<Match> {
    Ok(Match {
      id:          self.id,
      owner_id:    self.owner_id,
      tree_id:     self.tree_id,
      person_id:   self.person_id,
      target_type: decode_enum("target type", &self.target_type)?,
      target_id:   self.target_id,
      score:       self.score,
      reason:      serde_json::from_str(&self.reason_json)?,
      status:      decode_enum("match status", &self.status)?,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub const DECISION_COLUMNS: &str =
  "id, match_id, user_id, from_status, to_status, decided_at";

pub struct RawDecision {
  pub id:          i64,
  pub match_id:    i64,
  pub user_id:     i64,
  pub from_status: String,
  pub to_status:   String,
  pub decided_at:  String,
}

impl RawDecision {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      match_id:    row.get(1)?,
      user_id:     row.get(2)?,
      from_status: row.get(3)?,
      to_status:   row.get(4)?,
      decided_at:  row.get(5)?,
    })
  }

  pub fn into_decision(self) -> Result<MatchDecision> {
    Ok(MatchDecision {
      id:          self.id,
      match_id:    self.match_id,
      user_id:     self.user_id,
      from_status: decode_enum("match status", &self.from_status)?,
      to_status:   decode_enum("match status", &self.to_status)?,
      decided_at:  decode_dt(&self.decided_at)?,
    })
  }
}

// ─── Groups ──────────────────────────────────────────────────────────────────

pub const GROUP_COLUMNS: &str = "id, owner_id, name, description, created_at";

pub struct RawGroup {
  pub id:          i64,
  pub owner_id:    i64,
  pub name:        String,
  pub description: String,
  pub created_at:  String,
}

impl RawGroup {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      owner_id:    row.get(1)?,
      name:        row.get(2)?,
      description: row.get(3)?,
      created_at:  row.get(4)?,
    })
  }

  pub fn into_group(self) -> Result<Group> {
    Ok(Group {
      id:          self.id,
      owner_id:    self.owner_id,
      name:        self.name,
      description: self.description,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub const MEMBER_COLUMNS: &str =
  "id, group_id, user_id, role, status, invited_by, created_at, updated_at";

pub struct RawMember {
  pub id:         i64,
  pub group_id:   i64,
  pub user_id:    i64,
  pub role:       String,
  pub status:     String,
  pub invited_by: Option<i64>,
  pub created_at: String,
  pub updated_at: String,
}

impl RawMember {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      group_id:   row.get(1)?,
      user_id:    row.get(2)?,
      role:       row.get(3)?,
      status:     row.get(4)?,
      invited_by: row.get(5)?,
      created_at: row.get(6)?,
      updated_at: row.get(7)?,
    })
  }

  pub fn into_member(self) -> Result<GroupMember> {
    Ok(GroupMember {
      id:         self.id,
      group_id:   self.group_id,
      user_id:    self.user_id,
      role:       decode_enum("group role", &self.role)?,
      status:     decode_enum("member status", &self.status)?,
      invited_by: self.invited_by,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub const LINK_COLUMNS: &str =
  "group_id, tree_id, linked_by, status, created_at, updated_at";

pub struct RawLink {
  pub group_id:   i64,
  pub tree_id:    i64,
  pub linked_by:  i64,
  pub status:     String,
  pub created_at: String,
  pub updated_at: String,
}

impl RawLink {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      group_id:   row.get(0)?,
      tree_id:    row.get(1)?,
      linked_by:  row.get(2)?,
      status:     row.get(3)?,
      created_at: row.get(4)?,
      updated_at: row.get(5)?,
    })
  }

  pub fn into_link(self) -> Result<GroupTree> {
    Ok(GroupTree {
      group_id:   self.group_id,
      tree_id:    self.tree_id,
      linked_by:  self.linked_by,
      status:     decode_enum("link status", &self.status)?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub const CONFLICT_COLUMNS: &str = "id, group_id, tree_id, conflict_type, status, summary, \
                                    detail_json, created_at, resolved_by, resolved_at";

pub struct RawConflict {
  pub id:            i64,
  pub group_id:      i64,
  pub tree_id:       i64,
  pub conflict_type: String,
  pub status:        String,
  pub summary:       String,
  pub detail_json:   String,
  pub created_at:    String,
  pub resolved_by:   Option<i64>,
  pub resolved_at:   Option<String>,
}

impl RawConflict {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      group_id:      row.get(1)?,
      tree_id:       row.get(2)?,
      conflict_type: row.get(3)?,
      status:        row.get(4)?,
      summary:       row.get(5)?,
      detail_json:   row.get(6)?,
      created_at:    row.get(7)?,
      resolved_by:   row.get(8)?,
      resolved_at:   row.get(9)?,
    })
  }

  pub fn into_conflict(self) -> Result<GroupConflict> {
    Ok(GroupConflict {
      id:            self.id,
      group_id:      self.group_id,
      tree_id:       self.tree_id,
      conflict_type: decode_enum("conflict type", &self.conflict_type)?,
      status:        decode_enum("conflict status", &self.status)?,
      summary:       self.summary,
      detail:        serde_json::from_str(&self.detail_json)?,
      created_at:    decode_dt(&self.created_at)?,
      resolved_by:   self.resolved_by,
      resolved_at:   decode_opt_dt(self.resolved_at)?,
    })
  }
}

pub const CHANGE_COLUMNS: &str =
  "id, group_id, actor_id, action, object_type, object_id, payload_json, created_at";

pub struct RawChange {
  pub id:           i64,
  pub group_id:     i64,
  pub actor_id:     i64,
  pub action:       String,
  pub object_type:  String,
  pub object_id:    Option<i64>,
  pub payload_json: String,
  pub created_at:   String,
}

impl RawChange {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      group_id:     row.get(1)?,
      actor_id:     row.get(2)?,
      action:       row.get(3)?,
      object_type:  row.get(4)?,
      object_id:    row.get(5)?,
      payload_json: row.get(6)?,
      created_at:   row.get(7)?,
    })
  }

  pub fn into_change(self) -> Result<GroupChange> {
    Ok(GroupChange {
      id:          self.id,
      group_id:    self.group_id,
      actor_id:    self.actor_id,
      action:      self.action,
      object_type: self.object_type,
      object_id:   self.object_id,
      payload:     serde_json::from_str(&self.payload_json)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

// ─── Notifications ───────────────────────────────────────────────────────────

pub const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, body, url, status, \
                                        tree_id, group_id, object_id, dedupe_key, created_at";

pub struct RawNotification {
  pub id:         i64,
  pub user_id:    i64,
  pub kind:       String,
  pub title:      String,
  pub body:       String,
  pub url:        Option<String>,
  pub status:     String,
  pub tree_id:    Option<i64>,
  pub group_id:   Option<i64>,
  pub object_id:  Option<i64>,
  pub dedupe_key: Option<String>,
  pub created_at: String,
}

impl RawNotification {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      user_id:    row.get(1)?,
      kind:       row.get(2)?,
      title:      row.get(3)?,
      body:       row.get(4)?,
      url:        row.get(5)?,
      status:     row.get(6)?,
      tree_id:    row.get(7)?,
      group_id:   row.get(8)?,
      object_id:  row.get(9)?,
      dedupe_key: row.get(10)?,
      created_at: row.get(11)?,
    })
  }

  pub fn into_notification(self) -> Result<Notification> {
    Ok(Notification {
      id:         self.id,
      user_id:    self.user_id,
      kind:       decode_enum("notification kind", &self.kind)?,
      title:      self.title,
      body:       self.body,
      url:        self.url,
      status:     decode_enum("notification status", &self.status)?,
      tree_id:    self.tree_id,
      group_id:   self.group_id,
      object_id:  self.object_id,
      dedupe_key: self.dedupe_key,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

// ─── Drafts ──────────────────────────────────────────────────────────────────

pub const ENTITY_COLUMNS: &str = "id, kind, current_version_id, created_by, created_at";

pub struct RawEntity {
  pub id:                 i64,
  pub kind:               String,
  pub current_version_id: Option<i64>,
  pub created_by:         i64,
  pub created_at:         String,
}

impl RawEntity {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                 row.get(0)?,
      kind:               row.get(1)?,
      current_version_id: row.get(2)?,
      created_by:         row.get(3)?,
      created_at:         row.get(4)?,
    })
  }

  pub fn into_entity(self) -> Result<ModeratedEntity> {
    Ok(ModeratedEntity {
      id:                 self.id,
      kind:               decode_enum("entity kind", &self.kind)?,
      current_version_id: self.current_version_id,
      created_by:         self.created_by,
      created_at:         decode_dt(&self.created_at)?,
    })
  }
}

pub const VERSION_COLUMNS: &str = "id, entity_id, status, content_kind, content_json, \
                                   created_by, lock_version, moderator_id, moderated_at, \
                                   moderation_notes, created_at, updated_at";

pub struct RawVersion {
  pub id:               i64,
  pub entity_id:        i64,
  pub status:           String,
  pub content_kind:     String,
  pub content_json:     String,
  pub created_by:       i64,
  pub lock_version:     i64,
  pub moderator_id:     Option<i64>,
  pub moderated_at:     Option<String>,
  pub moderation_notes: Option<String>,
  pub created_at:       String,
  pub updated_at:       String,
}

impl RawVersion {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      entity_id:        row.get(1)?,
      status:           row.get(2)?,
      content_kind:     row.get(3)?,
      content_json:     row.get(4)?,
      created_by:       row.get(5)?,
      lock_version:     row.get(6)?,
      moderator_id:     row.get(7)?,
      moderated_at:     row.get(8)?,
      moderation_notes: row.get(9)?,
      created_at:       row.get(10)?,
      updated_at:       row.get(11)?,
    })
  }

  pub fn into_version(self) -> Result<DraftVersion> {
    let kind = decode_enum("entity kind", &self.content_kind)?;
    let data: serde_json::Value = serde_json::from_str(&self.content_json)?;
    Ok(DraftVersion {
      id:               self.id,
      entity_id:        self.entity_id,
      status:           decode_enum("draft status", &self.status)?,
      content:          DraftContent::from_parts(kind, data)?,
      created_by:       self.created_by,
      lock_version:     self.lock_version,
      moderator_id:     self.moderator_id,
      moderated_at:     decode_opt_dt(self.moderated_at)?,
      moderation_notes: self.moderation_notes,
      created_at:       decode_dt(&self.created_at)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Credits ─────────────────────────────────────────────────────────────────

pub const LEDGER_COLUMNS: &str =
  "id, user_id, delta, reason, ref_type, ref_id, created_at";

pub struct RawLedger {
  pub id:         i64,
  pub user_id:    i64,
  pub delta:      i64,
  pub reason:     String,
  pub ref_type:   Option<String>,
  pub ref_id:     Option<i64>,
  pub created_at: String,
}

impl RawLedger {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      user_id:    row.get(1)?,
      delta:      row.get(2)?,
      reason:     row.get(3)?,
      ref_type:   row.get(4)?,
      ref_id:     row.get(5)?,
      created_at: row.get(6)?,
    })
  }

  pub fn into_entry(self) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
      id:         self.id,
      user_id:    self.user_id,
      delta:      self.delta,
      reason:     self.reason,
      ref_type:   self.ref_type,
      ref_id:     self.ref_id,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub const GRANT_COLUMNS: &str =
  "id, user_id, item_id, token, expires_at, credits_spent, created_at";

pub struct RawGrant {
  pub id:            i64,
  pub user_id:       i64,
  pub item_id:       i64,
  pub token:         String,
  pub expires_at:    String,
  pub credits_spent: i64,
  pub created_at:    String,
}

impl RawGrant {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      user_id:       row.get(1)?,
      item_id:       row.get(2)?,
      token:         row.get(3)?,
      expires_at:    row.get(4)?,
      credits_spent: row.get(5)?,
      created_at:    row.get(6)?,
    })
  }

  pub fn into_grant(self) -> Result<MediaGrant> {
    Ok(MediaGrant {
      id:            self.id,
      user_id:       self.user_id,
      item_id:       self.item_id,
      token:         self.token,
      expires_at:    decode_dt(&self.expires_at)?,
      credits_spent: self.credits_spent,
      created_at:    decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_are_fixed_width_and_ordered() {
    let a = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let b = a + chrono::Duration::milliseconds(1500);
    let (ea, eb) = (encode_dt(a), encode_dt(b));
    assert_eq!(ea.len(), eb.len());
    assert!(ea < eb);
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }

  #[test]
  fn unknown_enum_names_are_reported() {
    let err = decode_enum::<arxiu_core::tree::Sex>("sex", "robot").unwrap_err();
    assert!(err.to_string().contains("robot"));
  }
}
