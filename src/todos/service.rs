//! Capabilities the list program depends on

use super::error::FetchError;
use super::model::{Todo, User, UserId};
use crate::effect::Effect;

/// Source of the todo collection.
pub trait TodoService: Send + Sync {
    fn todos(&self) -> Effect<Vec<Todo>, FetchError>;
}

/// Lookup of a single user by id.
pub trait UserService: Send + Sync {
    fn user(&self, id: UserId) -> Effect<User, FetchError>;
}
