//! Todo list joined with users
//!
//! The domain the runtime was built for: a remote collection of todos, each
//! owned by a user, assembled into display rows. The remote source is
//! reached through the [`TodoService`] and [`UserService`] capabilities so
//! tests can swap in [`ScriptedTodoApi`](crate::testing::ScriptedTodoApi).

pub mod error;
pub mod http;
pub mod model;
pub mod program;
pub mod service;

pub use error::{FetchError, FetchErrorKind};
pub use http::HttpTodoApi;
pub use model::{ListItem, Todo, TodoId, User, UserId};
pub use program::{fetch_list_item, get_todos, get_user_name, list_items, with_api, ListOptions};
pub use service::{TodoService, UserService};
