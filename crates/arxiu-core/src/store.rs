//! Store traits implemented by storage backends (e.g. `arxiu-store-sqlite`).
//!
//! Higher layers (`arxiu-engine`, `arxiu-api`) depend on these abstractions,
//! not on any concrete backend. Every trait extends [`Backend`], so a backend
//! has exactly one error type across all concerns.
//!
//! Expected outcomes (an optimistic-lock mismatch, a dedupe hit, an existing
//! checksum, an insufficient balance) are returned as values. `Err` is kept for
//! genuine storage failures.
//!
//! All methods return `Send` futures so the traits can be used from spawned
//! tokio tasks.

use std::{collections::HashMap, future::Future};

use chrono::{DateTime, Utc};

use crate::{
  banner::MaintenanceBanner,
  connection::{ConnectionId, ConnectionStatus, ExternalConnection, NewConnection, SyncLogEntry},
  credit::{
    Conversion, GrantRequest, LedgerEntry, MediaGrant, MediaItemId, NewLedgerEntry,
    SpendOutcome,
  },
  draft::{
    DraftContent, DraftQuery, DraftStatus, DraftUpdate, DraftVersion, EntityId, EntityKind,
    LockOutcome, ModeratedEntity, Moderation, VersionId,
  },
  group::{
    ConflictId, ConflictStatus, Group, GroupChange, GroupConflict, GroupId, GroupMember,
    GroupRole, GroupTree, LinkStatus, MemberId, MemberStatus, NewConflict, NewGroup,
    NewGroupChange,
  },
  import::{ImportJob, ImportSource, JobId, JobUpdate, NewImportJob, NewSource, SourceId},
  matching::{Match, MatchDecision, MatchId, MatchQuery, MatchStatus, NewMatch},
  notification::{NewNotification, Notification, NotificationId, NotificationPrefs},
  search::{ArchivalRecord, RecordId, SearchDoc, SearchFilter, SearchPage, TargetType},
  tree::{
    NewPerson, NewRelation, NewTree, ParentNames, Person, PersonId, PersonUpdate, Relation,
    ReplaceOutcome, Tree, TreeId, TreeSnapshot, TreeStatus, TreeVisibility,
  },
  user::{NewUser, User, UserId},
};

/// The shared error type of a backend.
pub trait Backend: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;
}

// ─── Users ───────────────────────────────────────────────────────────────────

pub trait UserStore: Backend {
  fn create_user(
    &self,
    input: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_user(
    &self,
    id: UserId,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  /// Case-insensitive lookup.
  fn find_user_by_email(
    &self,
    email: String,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  fn find_user_by_username(
    &self,
    username: String,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;
}

// ─── Trees, persons, relations ───────────────────────────────────────────────

pub trait TreeStore: Backend {
  fn create_tree(
    &self,
    input: NewTree,
  ) -> impl Future<Output = Result<Tree, Self::Error>> + Send + '_;

  fn get_tree(
    &self,
    id: TreeId,
  ) -> impl Future<Output = Result<Option<Tree>, Self::Error>> + Send + '_;

  fn list_trees(
    &self,
    owner_id: UserId,
  ) -> impl Future<Output = Result<Vec<Tree>, Self::Error>> + Send + '_;

  /// Rewrite tree metadata. Returns `false` if the tree does not exist.
  fn update_tree(
    &self,
    id: TreeId,
    name: String,
    visibility: TreeVisibility,
    status: TreeStatus,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Insert a person. Fails if the external ID is already taken in the tree.
  fn create_person(
    &self,
    input: NewPerson,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  fn get_person(
    &self,
    id: PersonId,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  fn find_person_by_external_id(
    &self,
    tree_id: TreeId,
    external_id: String,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  fn update_person(
    &self,
    id: PersonId,
    update: PersonUpdate,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Active persons of a tree, ordered by ID.
  fn list_active_persons(
    &self,
    tree_id: TreeId,
  ) -> impl Future<Output = Result<Vec<Person>, Self::Error>> + Send + '_;

  /// Map of every non-empty external ID in the tree to its person.
  fn external_ids(
    &self,
    tree_id: TreeId,
  ) -> impl Future<Output = Result<HashMap<String, PersonId>, Self::Error>> + Send + '_;

  /// Make `snapshot` the whole content of a tree in one transaction.
  ///
  /// Persons whose external ID already exists are updated in place; the
  /// rest are inserted. Persons absent from the snapshot and every old
  /// relation are deleted. Self-edges and duplicate edges are skipped. On
  /// error nothing is written.
  fn replace_tree(
    &self,
    tree_id: TreeId,
    snapshot: TreeSnapshot,
  ) -> impl Future<Output = Result<ReplaceOutcome, Self::Error>> + Send + '_;

  /// Insert unless `(tree, from, to, role)` exists. Returns whether a row was
  /// created.
  fn insert_relation_if_absent(
    &self,
    input: NewRelation,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn list_relations(
    &self,
    tree_id: TreeId,
  ) -> impl Future<Output = Result<Vec<Relation>, Self::Error>> + Send + '_;

  /// Display names of the person's recorded fathers and mothers.
  fn parent_names(
    &self,
    person_id: PersonId,
  ) -> impl Future<Output = Result<ParentNames, Self::Error>> + Send + '_;
}

// ─── Imports ─────────────────────────────────────────────────────────────────

pub trait ImportStore: Backend {
  /// Atomically insert a source or return the existing one with the same
  /// `(owner, checksum)`. The flag is `true` when a row was inserted.
  fn upsert_source_by_checksum(
    &self,
    input: NewSource,
  ) -> impl Future<Output = Result<(ImportSource, bool), Self::Error>> + Send + '_;

  fn get_source(
    &self,
    id: SourceId,
  ) -> impl Future<Output = Result<Option<ImportSource>, Self::Error>> + Send + '_;

  fn create_job(
    &self,
    input: NewImportJob,
  ) -> impl Future<Output = Result<ImportJob, Self::Error>> + Send + '_;

  fn get_job(
    &self,
    id: JobId,
  ) -> impl Future<Output = Result<Option<ImportJob>, Self::Error>> + Send + '_;

  /// Queued jobs, oldest first.
  fn list_queued_jobs(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ImportJob>, Self::Error>> + Send + '_;

  /// Most recently created job for a source, if any.
  fn latest_job_for_source(
    &self,
    source_id: SourceId,
  ) -> impl Future<Output = Result<Option<ImportJob>, Self::Error>> + Send + '_;

  fn list_jobs(
    &self,
    owner_id: UserId,
  ) -> impl Future<Output = Result<Vec<ImportJob>, Self::Error>> + Send + '_;

  /// Apply a status change. `started_at` is stamped on the first transition
  /// out of `queued`, `finished_at` on a terminal status.
  fn update_job(
    &self,
    id: JobId,
    update: JobUpdate,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── External connections ────────────────────────────────────────────────────

pub trait ConnectionStore: Backend {
  fn create_connection(
    &self,
    input: NewConnection,
  ) -> impl Future<Output = Result<ExternalConnection, Self::Error>> + Send + '_;

  fn get_connection(
    &self,
    id: ConnectionId,
  ) -> impl Future<Output = Result<Option<ExternalConnection>, Self::Error>> + Send + '_;

  fn find_connection_for_tree(
    &self,
    tree_id: TreeId,
  ) -> impl Future<Output = Result<Option<ExternalConnection>, Self::Error>> + Send + '_;

  /// Every connection whose status is not `disabled`.
  fn list_syncable_connections(
    &self,
  ) -> impl Future<Output = Result<Vec<ExternalConnection>, Self::Error>> + Send + '_;

  fn set_connection_status(
    &self,
    id: ConnectionId,
    status: ConnectionStatus,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Replace the endpoint and sealed credentials; resets the failure state.
  fn update_connection_credentials(
    &self,
    id: ConnectionId,
    base_url: String,
    username: Option<String>,
    token_sealed: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Status `connected`, `last_sync_at = at`, last error and failure state
  /// cleared.
  fn record_sync_success(
    &self,
    id: ConnectionId,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Status `error` with the message, failure count and next eligible
  /// instant recorded.
  fn record_sync_failure(
    &self,
    id: ConnectionId,
    message: String,
    failures: u32,
    next_sync_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn append_sync_log(
    &self,
    id: ConnectionId,
    message: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Most recent entries first.
  fn list_sync_log(
    &self,
    id: ConnectionId,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<SyncLogEntry>, Self::Error>> + Send + '_;
}

// ─── Search index ────────────────────────────────────────────────────────────

pub trait SearchIndex: Backend {
  /// Store an archival record and rebuild its search document.
  fn upsert_record(
    &self,
    record: ArchivalRecord,
  ) -> impl Future<Output = Result<SearchDoc, Self::Error>> + Send + '_;

  /// Idempotent: replaces any previous document and its tokens.
  fn upsert_search_doc(
    &self,
    doc: SearchDoc,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn delete_search_doc(
    &self,
    entity_type: TargetType,
    entity_id: RecordId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_search_doc(
    &self,
    entity_type: TargetType,
    entity_id: RecordId,
  ) -> impl Future<Output = Result<Option<SearchDoc>, Self::Error>> + Send + '_;

  /// Rows ordered by descending relevance, then ascending entity ID.
  fn search<'a>(
    &'a self,
    filter: &'a SearchFilter,
  ) -> impl Future<Output = Result<SearchPage, Self::Error>> + Send + 'a;
}

// ─── Matches ─────────────────────────────────────────────────────────────────

pub trait MatchStore: Backend {
  /// Insert unless `(owner, person, target_type, target_id)` exists in any
  /// status. Returns whether a row was created.
  fn insert_match_if_absent(
    &self,
    input: NewMatch,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_match(
    &self,
    id: MatchId,
  ) -> impl Future<Output = Result<Option<Match>, Self::Error>> + Send + '_;

  fn list_matches(
    &self,
    query: MatchQuery,
  ) -> impl Future<Output = Result<Vec<Match>, Self::Error>> + Send + '_;

  /// Same filter as [`MatchStore::list_matches`], paging ignored.
  fn count_matches(
    &self,
    query: MatchQuery,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Move a match `from → to` and append an audit row, in one transaction.
  /// Returns `false` if the match was not in `from`.
  fn decide_match(
    &self,
    id: MatchId,
    from: MatchStatus,
    to: MatchStatus,
    user_id: UserId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn list_decisions(
    &self,
    match_id: MatchId,
  ) -> impl Future<Output = Result<Vec<MatchDecision>, Self::Error>> + Send + '_;
}

// ─── Groups ──────────────────────────────────────────────────────────────────

pub trait GroupStore: Backend {
  /// Create a group and its single `owner` member atomically.
  fn create_group(
    &self,
    input: NewGroup,
  ) -> impl Future<Output = Result<(Group, GroupMember), Self::Error>> + Send + '_;

  fn get_group(
    &self,
    id: GroupId,
  ) -> impl Future<Output = Result<Option<Group>, Self::Error>> + Send + '_;

  fn get_member(
    &self,
    group_id: GroupId,
    user_id: UserId,
  ) -> impl Future<Output = Result<Option<GroupMember>, Self::Error>> + Send + '_;

  fn get_member_by_id(
    &self,
    id: MemberId,
  ) -> impl Future<Output = Result<Option<GroupMember>, Self::Error>> + Send + '_;

  fn insert_member(
    &self,
    group_id: GroupId,
    user_id: UserId,
    role: GroupRole,
    status: MemberStatus,
    invited_by: Option<UserId>,
  ) -> impl Future<Output = Result<GroupMember, Self::Error>> + Send + '_;

  fn update_member(
    &self,
    id: MemberId,
    role: GroupRole,
    status: MemberStatus,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Promote `to` to owner and demote `from` to admin in one transaction.
  fn transfer_ownership(
    &self,
    from: MemberId,
    to: MemberId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_members(
    &self,
    group_id: GroupId,
  ) -> impl Future<Output = Result<Vec<GroupMember>, Self::Error>> + Send + '_;

  fn get_link(
    &self,
    group_id: GroupId,
    tree_id: TreeId,
  ) -> impl Future<Output = Result<Option<GroupTree>, Self::Error>> + Send + '_;

  fn upsert_link(
    &self,
    group_id: GroupId,
    tree_id: TreeId,
    linked_by: UserId,
    status: LinkStatus,
  ) -> impl Future<Output = Result<GroupTree, Self::Error>> + Send + '_;

  /// Active links of a group.
  fn list_linked_trees(
    &self,
    group_id: GroupId,
  ) -> impl Future<Output = Result<Vec<GroupTree>, Self::Error>> + Send + '_;

  /// Groups holding an active link to the tree.
  fn groups_for_tree(
    &self,
    tree_id: TreeId,
  ) -> impl Future<Output = Result<Vec<GroupId>, Self::Error>> + Send + '_;

  fn conflict_summaries(
    &self,
    group_id: GroupId,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  fn insert_conflict(
    &self,
    input: NewConflict,
  ) -> impl Future<Output = Result<GroupConflict, Self::Error>> + Send + '_;

  fn get_conflict(
    &self,
    id: ConflictId,
  ) -> impl Future<Output = Result<Option<GroupConflict>, Self::Error>> + Send + '_;

  /// `pending → resolved`. Returns `false` if it was not pending.
  fn resolve_conflict(
    &self,
    id: ConflictId,
    user_id: UserId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn list_conflicts(
    &self,
    group_id: GroupId,
    status: Option<ConflictStatus>,
  ) -> impl Future<Output = Result<Vec<GroupConflict>, Self::Error>> + Send + '_;

  fn append_change(
    &self,
    input: NewGroupChange,
  ) -> impl Future<Output = Result<GroupChange, Self::Error>> + Send + '_;

  /// Oldest first.
  fn list_changes(
    &self,
    group_id: GroupId,
  ) -> impl Future<Output = Result<Vec<GroupChange>, Self::Error>> + Send + '_;
}

// ─── Notifications ───────────────────────────────────────────────────────────

pub trait NotificationStore: Backend {
  /// Insert unless `(user, dedupe_key)` exists. Returns whether a row was
  /// created.
  fn insert_notification(
    &self,
    input: NewNotification,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_notifications(
    &self,
    user_id: UserId,
    unread_only: bool,
    limit: usize,
    offset: usize,
  ) -> impl Future<Output = Result<Vec<Notification>, Self::Error>> + Send + '_;

  fn unread_count(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn mark_read(
    &self,
    user_id: UserId,
    id: NotificationId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn mark_all_read(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn get_preferences(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<Option<NotificationPrefs>, Self::Error>> + Send + '_;

  fn set_preferences(
    &self,
    user_id: UserId,
    prefs: NotificationPrefs,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Drafts ──────────────────────────────────────────────────────────────────

pub trait DraftStore: Backend {
  fn create_entity(
    &self,
    kind: EntityKind,
    created_by: UserId,
  ) -> impl Future<Output = Result<ModeratedEntity, Self::Error>> + Send + '_;

  fn get_entity(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<Option<ModeratedEntity>, Self::Error>> + Send + '_;

  /// New draft with `lock_version = 0`. Unless `force_new`, an existing
  /// `draft` by the same user on the same entity is returned unchanged.
  fn create_draft(
    &self,
    entity_id: EntityId,
    user_id: UserId,
    force_new: bool,
    content: DraftContent,
  ) -> impl Future<Output = Result<DraftVersion, Self::Error>> + Send + '_;

  fn get_version(
    &self,
    id: VersionId,
  ) -> impl Future<Output = Result<Option<DraftVersion>, Self::Error>> + Send + '_;

  /// Optimistic save: succeeds only while the stored lock version equals the
  /// supplied one and the version is still a `draft`.
  fn update_draft(
    &self,
    update: DraftUpdate,
  ) -> impl Future<Output = Result<LockOutcome, Self::Error>> + Send + '_;

  /// Conditional transition `from → to`. Returns `false` if the version was
  /// not in `from`.
  fn set_draft_status(
    &self,
    id: VersionId,
    from: DraftStatus,
    to: DraftStatus,
    moderation: Moderation,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// `pendent → publicat` and swap the parent's `current_version_id`, in one
  /// transaction.
  fn approve_version(
    &self,
    id: VersionId,
    moderation: Moderation,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn set_current_version(
    &self,
    entity_id: EntityId,
    version_id: VersionId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_versions(
    &self,
    entity_id: EntityId,
  ) -> impl Future<Output = Result<Vec<DraftVersion>, Self::Error>> + Send + '_;

  fn list_drafts(
    &self,
    query: DraftQuery,
  ) -> impl Future<Output = Result<Vec<DraftVersion>, Self::Error>> + Send + '_;

  /// Same filter as [`DraftStore::list_drafts`], paging ignored.
  fn count_drafts(
    &self,
    query: DraftQuery,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}

// ─── Credits ─────────────────────────────────────────────────────────────────

pub trait CreditStore: Backend {
  fn credit_balance(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  fn append_ledger(
    &self,
    input: NewLedgerEntry,
  ) -> impl Future<Output = Result<LedgerEntry, Self::Error>> + Send + '_;

  fn list_ledger(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<Vec<LedgerEntry>, Self::Error>> + Send + '_;

  fn active_grant(
    &self,
    user_id: UserId,
    item_id: MediaItemId,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<MediaGrant>, Self::Error>> + Send + '_;

  /// Reuse a live grant, or check the balance, debit and insert a grant in one
  /// transaction. A failed grant insert writes a compensating refund.
  fn spend_for_grant(
    &self,
    request: GrantRequest,
  ) -> impl Future<Output = Result<SpendOutcome, Self::Error>> + Send + '_;

  fn points_balance(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  fn award_points(
    &self,
    user_id: UserId,
    points: i64,
    reason: String,
    ref_id: Option<i64>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Convert whole credits' worth of points, re-reading the points balance
  /// inside the transaction.
  fn convert_points(
    &self,
    user_id: UserId,
    points_per_credit: i64,
  ) -> impl Future<Output = Result<Conversion, Self::Error>> + Send + '_;
}

// ─── Maintenance banner ──────────────────────────────────────────────────────

pub trait BannerStore: Backend {
  fn current_banner(
    &self,
  ) -> impl Future<Output = Result<Option<MaintenanceBanner>, Self::Error>> + Send + '_;

  fn set_banner(
    &self,
    banner: Option<MaintenanceBanner>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Union ───────────────────────────────────────────────────────────────────

/// Every store concern at once; implemented automatically.
pub trait Store:
  UserStore
  + TreeStore
  + ImportStore
  + ConnectionStore
  + SearchIndex
  + MatchStore
  + GroupStore
  + NotificationStore
  + DraftStore
  + CreditStore
  + BannerStore
{
}

impl<T> Store for T where
  T: UserStore
    + TreeStore
    + ImportStore
    + ConnectionStore
    + SearchIndex
    + MatchStore
    + GroupStore
    + NotificationStore
    + DraftStore
    + CreditStore
    + BannerStore
{
}
