//! Wire and display types

use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type TodoId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: TodoId,
    pub user_id: UserId,
    pub title: String,
    pub completed: bool,
}

/// Remote user record. Only the fields the list needs are decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// One row of the joined list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: TodoId,
    pub title: String,
    pub completed: bool,
    pub username: String,
}

impl ListItem {
    pub fn new(todo: &Todo, username: impl Into<String>) -> Self {
        Self {
            id: todo.id,
            title: todo.title.clone(),
            completed: todo.completed,
            username: username.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_todo_decodes_camel_case() {
        let todo: Todo = serde_json::from_str(
            r#"{"userId": 1, "id": 3, "title": "fugiat veniam minus", "completed": false}"#,
        )
        .unwrap();
        assert_eq!(todo.user_id, 1);
        assert_eq!(todo.id, 3);
        assert!(!todo.completed);
    }

    #[test]
    fn test_user_ignores_extra_fields() {
        let user: User = serde_json::from_str(
            r#"{"id": 1, "name": "Leanne Graham", "username": "Bret", "email": "Sincere@april.biz"}"#,
        )
        .unwrap();
        assert_eq!(user.username, "Bret");
    }

    #[test]
    fn test_list_item_from_todo() {
        let todo = Todo {
            id: 7,
            user_id: 2,
            title: "write docs".to_string(),
            completed: true,
        };
        let item = ListItem::new(&todo, "Antonette");
        assert_eq!(item.id, 7);
        assert_eq!(item.username, "Antonette");
        assert!(item.completed);
    }
}
