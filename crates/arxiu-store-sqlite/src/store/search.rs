//! Inverted-token search over archival records.
//!
//! Each search document owns one `search_tokens` row per index token. A query
//! matches a document when it shares at least one token with it, and the
//! document's relevance is the number of distinct query tokens it contains.

use arxiu_core::{
  search::{
    ArchivalRecord, FacetCount, Facets, RecordId, SearchDoc, SearchFilter, SearchHit, SearchPage,
    TargetType,
  },
  store::SearchIndex,
};
use rusqlite::{OptionalExtension as _, Transaction, types::Value};

use super::SqliteStore;
use crate::{
  Result,
  encode::{DOC_COLUMNS, RawDoc},
};

/// Replace the document row and its tokens. Runs inside the caller's
/// transaction.
fn write_doc(
  tx: &Transaction<'_>,
  doc: &SearchDoc,
  tokens_json: &str,
  relations_json: &str,
) -> rusqlite::Result<()> {
  let entity_type = doc.entity_type.to_string();
  tx.execute(
    "INSERT INTO search_docs (
       entity_type, entity_id, person_norm, person_tokens_json, given_norm,
       surname_norm, surname_canon, year, municipality_id, municipality_name,
       relations_json
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
     ON CONFLICT (entity_type, entity_id) DO UPDATE SET
       person_norm        = excluded.person_norm,
       person_tokens_json = excluded.person_tokens_json,
       given_norm         = excluded.given_norm,
       surname_norm       = excluded.surname_norm,
       surname_canon      = excluded.surname_canon,
       year               = excluded.year,
       municipality_id    = excluded.municipality_id,
       municipality_name  = excluded.municipality_name,
       relations_json     = excluded.relations_json",
    rusqlite::params![
      entity_type,
      doc.entity_id,
      doc.person_norm,
      tokens_json,
      doc.given_norm,
      doc.surname_norm,
      doc.surname_canon,
      doc.year,
      doc.municipality_id,
      doc.municipality_name,
      relations_json,
    ],
  )?;
  let doc_id: i64 = tx.query_row(
    "SELECT id FROM search_docs WHERE entity_type = ?1 AND entity_id = ?2",
    rusqlite::params![entity_type, doc.entity_id],
    |r| r.get(0),
  )?;

  tx.execute("DELETE FROM search_tokens WHERE doc_id = ?1", [doc_id])?;
  let mut insert =
    tx.prepare_cached("INSERT OR IGNORE INTO search_tokens (token, doc_id) VALUES (?1, ?2)")?;
  for token in doc.index_tokens() {
    insert.execute(rusqlite::params![token, doc_id])?;
  }
  Ok(())
}

/// SQL fragments for one filter: an optional CTE prefix, a `FROM ... WHERE`
/// body and the relevance expression, plus their positional parameters.
struct Query {
  prefix:    String,
  body:      String,
  relevance: &'static str,
  params:    Vec<Value>,
}

impl Query {
  fn build(filter: &SearchFilter) -> Self {
    let mut params: Vec<Value> = Vec::new();
    let mut tokens: Vec<&str> = Vec::new();
    for t in &filter.tokens {
      if !t.is_empty() && !tokens.contains(&t.as_str()) {
        tokens.push(t);
      }
    }

    let (prefix, mut body, relevance) = if tokens.is_empty() {
      (String::new(), String::from("FROM search_docs d WHERE 1 = 1"), "0")
    } else {
      let marks = vec!["?"; tokens.len()].join(", ");
      params.extend(tokens.iter().map(|t| Value::from((*t).to_owned())));
      (
        format!(
          "WITH hits AS (
             SELECT doc_id, COUNT(DISTINCT token) AS relevance
             FROM search_tokens WHERE token IN ({marks}) GROUP BY doc_id
           ) "
        ),
        String::from("FROM search_docs d JOIN hits h ON h.doc_id = d.id WHERE 1 = 1"),
        "h.relevance",
      )
    };

    if let Some(entity_type) = filter.entity_type {
      body.push_str(" AND d.entity_type = ?");
      params.push(entity_type.to_string().into());
    }
    if let Some((from, to)) = filter.year_range {
      body.push_str(" AND d.year IS NOT NULL AND d.year BETWEEN ? AND ?");
      params.push(i64::from(from.min(to)).into());
      params.push(i64::from(from.max(to)).into());
    }
    if let Some(municipality_id) = filter.municipality_id {
      body.push_str(" AND d.municipality_id = ?");
      params.push(municipality_id.into());
    }

    Self { prefix, body, relevance, params }
  }
}

fn facet<K: rusqlite::types::FromSql>(
  conn: &rusqlite::Connection,
  q: &Query,
  column: &str,
) -> rusqlite::Result<Vec<FacetCount<K>>> {
  let sql = format!(
    "{prefix}SELECT {column}, COUNT(*) {body} AND {column} IS NOT NULL
     GROUP BY {column} ORDER BY COUNT(*) DESC, {column}",
    prefix = q.prefix,
    body = q.body,
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(rusqlite::params_from_iter(q.params.iter()), |r| {
      let n: i64 = r.get(1)?;
      Ok(FacetCount { value: r.get(0)?, count: u64::try_from(n).unwrap_or(0) })
    })?
    .collect()
}

impl SearchIndex for SqliteStore {
  async fn upsert_record(&self, record: ArchivalRecord) -> Result<SearchDoc> {
    let doc = SearchDoc::from_record(&record);
    let record_relations = serde_json::to_string(&record.relations)?;
    let tokens_json = serde_json::to_string(&doc.person_tokens)?;
    let relations_json = serde_json::to_string(&doc.relations)?;
    let stored = doc.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO archival_records (
             id, book_id, municipality_id, municipality_name, year,
             given, surname1, surname2, relations_json
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
           ON CONFLICT (id) DO UPDATE SET
             book_id = excluded.book_id,
             municipality_id = excluded.municipality_id,
             municipality_name = excluded.municipality_name,
             year = excluded.year,
             given = excluded.given,
             surname1 = excluded.surname1,
             surname2 = excluded.surname2,
             relations_json = excluded.relations_json",
          rusqlite::params![
            record.id,
            record.book_id,
            record.municipality_id,
            record.municipality_name,
            record.year,
            record.given,
            record.surname1,
            record.surname2,
            record_relations,
          ],
        )?;
        write_doc(&tx, &stored, &tokens_json, &relations_json)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(doc)
  }

  async fn upsert_search_doc(&self, doc: SearchDoc) -> Result<()> {
    let tokens_json = serde_json::to_string(&doc.person_tokens)?;
    let relations_json = serde_json::to_string(&doc.relations)?;
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        write_doc(&tx, &doc, &tokens_json, &relations_json)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_search_doc(&self, entity_type: TargetType, entity_id: RecordId) -> Result<bool> {
    let entity_type = entity_type.to_string();
    let removed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM search_tokens WHERE doc_id IN (
             SELECT id FROM search_docs WHERE entity_type = ?1 AND entity_id = ?2
           )",
          rusqlite::params![entity_type, entity_id],
        )?;
        let n = tx.execute(
          "DELETE FROM search_docs WHERE entity_type = ?1 AND entity_id = ?2",
          rusqlite::params![entity_type, entity_id],
        )?;
        tx.commit()?;
        Ok(n)
      })
      .await?;
    Ok(removed > 0)
  }

  async fn get_search_doc(
    &self,
    entity_type: TargetType,
    entity_id: RecordId,
  ) -> Result<Option<SearchDoc>> {
    let entity_type = entity_type.to_string();
    let raw: Option<RawDoc> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {DOC_COLUMNS} FROM search_docs d
                 WHERE d.entity_type = ?1 AND d.entity_id = ?2"
              ),
              rusqlite::params![entity_type, entity_id],
              RawDoc::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawDoc::into_doc).transpose()
  }

  /// A `limit` of zero returns every matching row.
  async fn search<'a>(&'a self, filter: &'a SearchFilter) -> Result<SearchPage> {
    let q = Query::build(filter);
    let limit = match filter.limit {
      0 => -1,
      n => i64::try_from(n).unwrap_or(i64::MAX),
    };
    let offset = i64::try_from(filter.offset).unwrap_or(i64::MAX);

    let (raws, total, municipalities, years) = self
      .conn
      .call(move |conn| {
        let total: i64 = conn.query_row(
          &format!("{}SELECT COUNT(*) {}", q.prefix, q.body),
          rusqlite::params_from_iter(q.params.iter()),
          |r| r.get(0),
        )?;

        let sql = format!(
          "{prefix}SELECT {DOC_COLUMNS}, {relevance} {body}
           ORDER BY {relevance} DESC, d.entity_id ASC LIMIT ? OFFSET ?",
          prefix = q.prefix,
          relevance = q.relevance,
          body = q.body,
        );
        let mut params = q.params.clone();
        params.push(limit.into());
        params.push(offset.into());
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |r| {
            let relevance: i64 = r.get(11)?;
            Ok((RawDoc::from_row(r)?, relevance))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let municipalities = facet::<i64>(conn, &q, "d.municipality_id")?;
        let years = facet::<i32>(conn, &q, "d.year")?;
        Ok((rows, total, municipalities, years))
      })
      .await?;

    let rows = raws
      .into_iter()
      .map(|(raw, relevance)| {
        Ok(SearchHit { doc: raw.into_doc()?, relevance: u32::try_from(relevance).unwrap_or(0) })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(SearchPage {
      rows,
      total: u64::try_from(total).unwrap_or(0),
      facets: Facets { municipalities, years },
    })
  }
}
