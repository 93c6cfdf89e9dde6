use async_graphql::{ID, Object};
use platform_api::{ApiError, ApiResult};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Todo {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
}

#[Object]
impl Todo {
    async fn id(&self) -> ID {
        ID(self.id.to_string())
    }

    /// Owner subject. Redacted for callers without the `Admin` role.
    async fn user_id(&self) -> Option<ID> {
        Some(ID(self.user_id.clone()))
    }

    async fn title(&self) -> &str {
        &self.title
    }
}

/// In-memory todo list shared by all requests.
#[derive(Debug, Default)]
pub struct TodoStore {
    todos: RwLock<Vec<Todo>>,
}

impl TodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, owner: &str, title: &str) -> ApiResult<Todo> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ApiError::InvalidInput("title must not be empty".into()));
        }
        let todo = Todo {
            id: Uuid::new_v4(),
            user_id: owner.to_string(),
            title: title.to_string(),
        };
        self.todos.write().await.push(todo.clone());
        Ok(todo)
    }

    pub async fn owned_by(&self, owner: &str) -> Vec<Todo> {
        self.todos
            .read()
            .await
            .iter()
            .filter(|todo| todo.user_id == owner)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Todo> {
        self.todos.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn todos_are_filtered_by_owner() {
        let store = TodoStore::new();
        store.add("auth0|alice", "write docs").await.unwrap();
        store.add("auth0|bob", "review").await.unwrap();
        store.add("auth0|alice", "ship").await.unwrap();

        let mine = store.owned_by("auth0|alice").await;
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|todo| todo.user_id == "auth0|alice"));
        assert_eq!(store.all().await.len(), 3);
    }

    #[tokio::test]
    async fn blank_titles_are_rejected() {
        let store = TodoStore::new();
        let err = store.add("auth0|alice", "   ").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert!(store.all().await.is_empty());
    }
}
