use arxiu_core::{
  store::UserStore,
  user::{NewUser, User, UserId},
};
use chrono::Utc;
use rusqlite::OptionalExtension as _;

use super::SqliteStore;
use crate::{
  Result,
  encode::{RawUser, USER_COLUMNS, encode_dt},
};

impl SqliteStore {
  async fn find_user_where(&self, column: &'static str, value: String) -> Result<Option<User>> {
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1 COLLATE NOCASE");
        Ok(conn.query_row(&sql, [value], RawUser::from_row).optional()?)
      })
      .await?;
    raw.map(RawUser::into_user).transpose()
  }
}

impl UserStore for SqliteStore {
  async fn create_user(&self, input: NewUser) -> Result<User> {
    let created_at = Utc::now();
    let at = encode_dt(created_at);
    let role = input.role.to_string();
    let (username, email, hash) =
      (input.username.clone(), input.email.clone(), input.password_hash.clone());

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (username, email, password_hash, role, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![username, email, hash, role, at],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(User {
      id,
      username: input.username,
      email: input.email,
      password_hash: input.password_hash,
      role: input.role,
      created_at,
    })
  }

  async fn get_user(&self, id: UserId) -> Result<Option<User>> {
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
              [id],
              RawUser::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawUser::into_user).transpose()
  }

  async fn find_user_by_email(&self, email: String) -> Result<Option<User>> {
    self.find_user_where("email", email.trim().to_owned()).await
  }

  async fn find_user_by_username(&self, username: String) -> Result<Option<User>> {
    self.find_user_where("username", username).await
  }
}
