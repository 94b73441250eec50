//! In-memory repositories
//!
//! Used for development, tests and single-process deployments. All state
//! lives behind a `tokio::sync::RwLock`; uniqueness checks and inserts happen
//! under one write guard.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::{
    DiaryError, Entry, EntryChanges, EntryId, EntryImage, EntryRepository, NewEntry, NewUser,
    Result, User, UserChanges, UserId, UserRepository,
};

/// In-memory user repository
#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<BTreeMap<UserId, User>>,
    next_id: AtomicI64,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_unique<'a>(
    mut others: impl Iterator<Item = &'a User>,
    username: &str,
    email: &str,
) -> Result<()> {
    others.try_for_each(|u| {
        if u.username == username {
            Err(DiaryError::Conflict("Username is already taken".to_string()))
        } else if u.email == email {
            Err(DiaryError::Conflict("Email is already taken".to_string()))
        } else {
            Ok(())
        }
    })
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<User> {
        let mut users = self.users.write().await;
        ensure_unique(users.values(), &user.username, &user.email)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let created = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        users.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, id: UserId, changes: UserChanges) -> Result<User> {
        let mut users = self.users.write().await;
        ensure_unique(
            users.values().filter(|u| u.id != id),
            &changes.username,
            &changes.email,
        )?;

        let user = users
            .get_mut(&id)
            .ok_or_else(|| DiaryError::NotFound(format!("User {id}")))?;
        user.username = changes.username;
        user.email = changes.email;
        user.password_hash = changes.password_hash;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete(&self, id: UserId) -> Result<u64> {
        Ok(self.users.write().await.remove(&id).map_or(0, |_| 1))
    }

    async fn get_by_id(&self, id: UserId) -> Result<User> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DiaryError::NotFound(format!("User {id}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .take(limit)
            .cloned()
            .collect())
    }
}

/// In-memory entry repository
#[derive(Default)]
pub struct MemoryEntryRepository {
    entries: RwLock<BTreeMap<EntryId, Entry>>,
    next_id: AtomicI64,
    next_image_id: AtomicI64,
}

impl MemoryEntryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn images(&self, urls: Vec<String>) -> Vec<EntryImage> {
        urls.into_iter()
            .map(|url| EntryImage {
                id: self.next_image_id.fetch_add(1, Ordering::SeqCst) + 1,
                url,
            })
            .collect()
    }
}

#[async_trait]
impl EntryRepository for MemoryEntryRepository {
    async fn create(&self, entry: NewEntry) -> Result<Entry> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let created = Entry {
            id,
            title: entry.title,
            description: entry.description,
            images: self.images(entry.image_urls),
            owner_id: entry.owner_id,
            created_at: now,
            updated_at: now,
        };
        self.entries.write().await.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, id: EntryId, changes: EntryChanges) -> Result<Entry> {
        let images = self.images(changes.image_urls);
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| DiaryError::NotFound(format!("Entry {id}")))?;
        entry.title = changes.title;
        entry.description = changes.description;
        entry.images = images;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn delete(&self, id: EntryId) -> Result<u64> {
        Ok(self.entries.write().await.remove(&id).map_or(0, |_| 1))
    }

    async fn get_by_id(&self, id: EntryId) -> Result<Entry> {
        self.entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DiaryError::NotFound(format!("Entry {id}")))
    }

    async fn list(&self, owner_id: UserId, limit: usize) -> Result<Vec<Entry>> {
        let entries = self.entries.read().await;
        let mut owned: Vec<Entry> = entries
            .values()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn delete_by_owner(&self, owner_id: UserId) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.owner_id != owner_id);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    fn new_entry(owner_id: UserId, title: &str) -> NewEntry {
        NewEntry {
            title: title.to_string(),
            description: "description".to_string(),
            image_urls: vec!["https://img.example.com/1.png".to_string()],
            owner_id,
        }
    }

    #[tokio::test]
    async fn test_user_crud() {
        let repo = MemoryUserRepository::new();

        let user = repo
            .create(new_user("sammy", "sammy@gmail.com"))
            .await
            .unwrap();
        assert_eq!(user.id, 1);

        let found = repo.find_by_email("sammy@gmail.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(1));

        let updated = repo
            .update(
                1,
                UserChanges {
                    username: "sam".to_string(),
                    email: "sam@gmail.com".to_string(),
                    password_hash: "hash2".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.username, "sam");
        assert!(repo.find_by_email("sammy@gmail.com").await.unwrap().is_none());

        assert_eq!(repo.delete(1).await.unwrap(), 1);
        assert_eq!(repo.delete(1).await.unwrap(), 0);
        assert!(matches!(
            repo.get_by_id(1).await,
            Err(DiaryError::NotFound(_))
        ));
    }

    #[test]
    fn test_user_ids_are_positive_and_sequential() {
        let repo = MemoryUserRepository::new();
        let first = tokio_test::block_on(repo.create(new_user("a", "a@example.com")));
        let second = tokio_test::block_on(repo.create(new_user("b", "b@example.com")));

        let first = tokio_test::assert_ok!(first);
        let second = tokio_test::assert_ok!(second);
        assert_eq!((first.id, second.id), (1, 2));
    }

    #[tokio::test]
    async fn test_user_uniqueness() {
        let repo = MemoryUserRepository::new();
        repo.create(new_user("sammy", "sammy@gmail.com"))
            .await
            .unwrap();

        let dup_name = repo.create(new_user("sammy", "other@gmail.com")).await;
        assert!(matches!(dup_name, Err(DiaryError::Conflict(msg)) if msg.contains("Username")));

        let dup_email = repo.create(new_user("other", "sammy@gmail.com")).await;
        assert!(matches!(dup_email, Err(DiaryError::Conflict(msg)) if msg.contains("Email")));

        // A user may keep its own username on update
        let kept = repo
            .update(
                1,
                UserChanges {
                    username: "sammy".to_string(),
                    email: "sammy@gmail.com".to_string(),
                    password_hash: "hash".to_string(),
                },
            )
            .await;
        assert!(kept.is_ok());
    }

    #[tokio::test]
    async fn test_entry_listing_is_per_owner_and_newest_first() {
        let repo = MemoryEntryRepository::new();
        repo.create(new_entry(1, "first")).await.unwrap();
        repo.create(new_entry(2, "someone else")).await.unwrap();
        repo.create(new_entry(1, "second")).await.unwrap();

        let entries = repo.list(1, 10).await.unwrap();
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);

        assert_eq!(repo.list(1, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_entry_update_replaces_images() {
        let repo = MemoryEntryRepository::new();
        let entry = repo.create(new_entry(1, "title")).await.unwrap();
        assert_eq!(entry.images.len(), 1);

        let updated = repo
            .update(
                entry.id,
                EntryChanges {
                    title: "new".to_string(),
                    description: "new description".to_string(),
                    image_urls: vec![],
                },
            )
            .await
            .unwrap();
        assert!(updated.images.is_empty());
        assert_eq!(updated.title, "new");
    }

    #[tokio::test]
    async fn test_delete_by_owner() {
        let repo = MemoryEntryRepository::new();
        repo.create(new_entry(1, "a")).await.unwrap();
        repo.create(new_entry(1, "b")).await.unwrap();
        repo.create(new_entry(2, "c")).await.unwrap();

        assert_eq!(repo.delete_by_owner(1).await.unwrap(), 2);
        assert!(repo.list(1, 10).await.unwrap().is_empty());
        assert_eq!(repo.list(2, 10).await.unwrap().len(), 1);
    }
}
