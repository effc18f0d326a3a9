//! The durable user directory.
//!
//! The relational store itself is an external collaborator; the services only see the
//! [`UserDirectory`] trait. [`MemoryUserDirectory`] is the reference implementation
//! used by tests and the demo server.

use crate::models::{DirectoryError, NewUser, User};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// CRUD access to user records.
///
/// Lookups return `Ok(None)` for unknown (or soft-deleted) users; `Err` is reserved for
/// backend failures and write conflicts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Persists a new user, assigning its id and timestamps.
    async fn create(&self, user: NewUser) -> Result<User, DirectoryError>;

    async fn get_by_id(&self, id: u64) -> Result<Option<User>, DirectoryError>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError>;

    async fn exists_by_username(&self, username: &str) -> Result<bool, DirectoryError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, DirectoryError>;

    /// Replaces the stored record with the same id and bumps `updated_at`.
    async fn update(&self, user: &User) -> Result<(), DirectoryError>;

    /// Marks a user deleted. The row is kept; lookups stop returning it.
    async fn soft_delete(&self, id: u64) -> Result<(), DirectoryError>;
}

pub type SharedDirectory = Arc<dyn UserDirectory>;

#[derive(Default)]
struct Users {
    next_id: u64,
    rows: BTreeMap<u64, User>,
}

impl Users {
    fn live(&self) -> impl Iterator<Item = &User> + Clone {
        self.rows.values().filter(|user| !user.is_deleted())
    }

    fn conflict(&self, username: &str, email: &str, except: Option<u64>) -> Option<DirectoryError> {
        let mut others = self.live().filter(|user| Some(user.id) != except);
        if others.clone().any(|user| user.username == username) {
            return Some(DirectoryError::UsernameTaken(username.to_string()));
        }
        if others.any(|user| user.email == email) {
            return Some(DirectoryError::EmailTaken(email.to_string()));
        }
        None
    }
}

/// In-process [`UserDirectory`]. `Clone` shares the same table.
#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<Mutex<Users>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Users>, DirectoryError> {
        self.users.lock().map_err(|_| DirectoryError::MutexPoisoned)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn create(&self, user: NewUser) -> Result<User, DirectoryError> {
        let mut users = self.lock()?;
        if let Some(conflict) = users.conflict(&user.username, &user.email, None) {
            return Err(conflict);
        }

        users.next_id += 1;
        let now = Utc::now();
        let record = User {
            id: users.next_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            nickname: user.nickname,
            avatar: String::new(),
            status: user.status,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        users.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<User>, DirectoryError> {
        let users = self.lock()?;
        Ok(users.rows.get(&id).filter(|user| !user.is_deleted()).cloned())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError> {
        let users = self.lock()?;
        Ok(users.live().find(|user| user.username == username).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let users = self.lock()?;
        Ok(users.live().find(|user| user.email == email).cloned())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, DirectoryError> {
        let users = self.lock()?;
        Ok(users.live().any(|user| user.username == username))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, DirectoryError> {
        let users = self.lock()?;
        Ok(users.live().any(|user| user.email == email))
    }

    async fn update(&self, user: &User) -> Result<(), DirectoryError> {
        let mut users = self.lock()?;
        if !users.rows.get(&user.id).is_some_and(|row| !row.is_deleted()) {
            return Err(DirectoryError::NotFound(user.id));
        }
        if let Some(conflict) = users.conflict(&user.username, &user.email, Some(user.id)) {
            return Err(conflict);
        }
        let mut updated = user.clone();
        updated.updated_at = Utc::now();
        users.rows.insert(user.id, updated);
        Ok(())
    }

    async fn soft_delete(&self, id: u64) -> Result<(), DirectoryError> {
        let mut users = self.lock()?;
        let Some(row) = users.rows.get_mut(&id).filter(|row| !row.is_deleted()) else {
            return Err(DirectoryError::NotFound(id));
        };
        row.deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserStatus;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            nickname: String::new(),
            status: UserStatus::Active,
        }
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let directory = MemoryUserDirectory::new();
        let a = directory.create(new_user("a", "a@x.io")).await.unwrap();
        let b = directory.create(new_user("b", "b@x.io")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(directory.exists_by_username("a").await.unwrap());
        assert!(directory.exists_by_email("b@x.io").await.unwrap());
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let directory = MemoryUserDirectory::new();
        directory.create(new_user("a", "a@x.io")).await.unwrap();
        assert!(matches!(
            directory.create(new_user("a", "other@x.io")).await,
            Err(DirectoryError::UsernameTaken(_))
        ));
        assert!(matches!(
            directory.create(new_user("other", "a@x.io")).await,
            Err(DirectoryError::EmailTaken(_))
        ));
    }

    #[tokio::test]
    async fn soft_deleted_users_disappear_and_free_their_names() {
        let directory = MemoryUserDirectory::new();
        let user = directory.create(new_user("a", "a@x.io")).await.unwrap();
        directory.soft_delete(user.id).await.unwrap();

        assert!(directory.get_by_id(user.id).await.unwrap().is_none());
        assert!(directory.get_by_username("a").await.unwrap().is_none());
        assert!(!directory.exists_by_email("a@x.io").await.unwrap());
        assert!(directory.create(new_user("a", "a@x.io")).await.is_ok());
        assert!(matches!(
            directory.soft_delete(user.id).await,
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_replaces_record() {
        let directory = MemoryUserDirectory::new();
        let mut user = directory.create(new_user("a", "a@x.io")).await.unwrap();
        user.nickname = "Alice".to_string();
        user.status = UserStatus::Disabled;
        directory.update(&user).await.unwrap();

        let stored = directory.get_by_email("a@x.io").await.unwrap().unwrap();
        assert_eq!(stored.nickname, "Alice");
        assert!(!stored.is_active());
        assert!(stored.updated_at >= stored.created_at);
    }
}
