//! Accounts. Password hashing and verification happen at the boundary; the
//! engine only stores the PHC string.

use arxiu_core::{
  store::{Store, UserStore},
  user::{NewUser, User, UserId, UserRole},
};

use crate::{Engine, Error, Result};

impl<S: Store + 'static> Engine<S> {
  pub async fn register_user(
    &self,
    username: &str,
    email: &str,
    password_hash: &str,
    role: UserRole,
  ) -> Result<User> {
    let (username, email) = (username.trim(), email.trim());
    if username.is_empty() || username.contains(':') {
      return Err(Error::validation("username", "must be non-empty and contain no ':'"));
    }
    if !email.contains('@') {
      return Err(Error::validation("email", "is not an address"));
    }
    if self.user_by_username(username).await?.is_some() {
      return Err(Error::Conflict(format!("username {username} is taken")));
    }
    if self.store.find_user_by_email(email.to_owned()).await.map_err(Error::store)?.is_some() {
      return Err(Error::Conflict(format!("email {email} is already registered")));
    }
    let user = self
      .store
      .create_user(NewUser {
        username:      username.to_owned(),
        email:         email.to_owned(),
        password_hash: password_hash.to_owned(),
        role,
      })
      .await
      .map_err(Error::store)?;
    tracing::info!(user_id = user.id, %role, "user registered");
    Ok(user)
  }

  pub async fn user(&self, id: UserId) -> Result<User> {
    self.store.get_user(id).await.map_err(Error::store)?.ok_or(Error::NotFound("user"))
  }

  pub async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
    self.store.find_user_by_username(username.to_owned()).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing;

  #[tokio::test]
  async fn usernames_and_emails_are_unique() {
    let engine = testing::engine().await;
    let anna = engine.register_user(" anna ", "anna@example.org", "$hash", UserRole::User).await;
    assert_eq!(anna.unwrap().username, "anna");
    assert!(matches!(
      engine.register_user("anna", "other@example.org", "$hash", UserRole::User).await,
      Err(Error::Conflict(_))
    ));
    assert!(matches!(
      engine.register_user("anna2", "ANNA@example.org", "$hash", UserRole::User).await,
      Err(Error::Conflict(_))
    ));
    assert!(matches!(
      engine.register_user("a:b", "ab@example.org", "$hash", UserRole::User).await,
      Err(Error::Validation { .. })
    ));
  }
}
