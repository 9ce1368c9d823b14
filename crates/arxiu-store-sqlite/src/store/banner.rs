use arxiu_core::{banner::MaintenanceBanner, store::BannerStore};
use rusqlite::OptionalExtension as _;

use super::SqliteStore;
use crate::{
  Result,
  encode::{decode_dt, encode_dt},
};

impl BannerStore for SqliteStore {
  async fn current_banner(&self) -> Result<Option<MaintenanceBanner>> {
    let row: Option<(String, String, Option<String>)> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT message, level, active_until FROM maintenance_banner WHERE id = 1",
              [],
              |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?,
        )
      })
      .await?;

    row
      .map(|(message, level, until)| {
        Ok(MaintenanceBanner {
          message,
          level,
          active_until: until.as_deref().map(decode_dt).transpose()?,
        })
      })
      .transpose()
  }

  /// `None` clears the banner.
  async fn set_banner(&self, banner: Option<MaintenanceBanner>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        match banner {
          Some(b) => {
            conn.execute(
              "INSERT INTO maintenance_banner (id, message, level, active_until)
               VALUES (1, ?1, ?2, ?3)
               ON CONFLICT (id) DO UPDATE SET
                 message = excluded.message,
                 level = excluded.level,
                 active_until = excluded.active_until",
              rusqlite::params![b.message, b.level, b.active_until.map(encode_dt)],
            )?;
          }
          None => {
            conn.execute("DELETE FROM maintenance_banner", [])?;
          }
        }
        Ok(())
      })
      .await?;
    Ok(())
  }
}
