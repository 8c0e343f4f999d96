//! The todo list program: fetch todos, then join each with its owner
//!
//! User lookups run with bounded parallelism. Each lookup attempt holds the
//! loading gauge, is retried on transient failures, and falls back to a
//! placeholder username when the user is gone (`DeletedUser#<id>`) or its
//! record cannot be decoded (`User#<id>`). Lookups are not cached: a user
//! owning several todos is fetched once per todo.

use super::error::{FetchError, FetchErrorKind};
use super::model::{ListItem, Todo, UserId};
use super::service::{TodoService, UserService};
use crate::config::FetchConfig;
use crate::effect::{service_with, Effect, Parallelism};
use crate::gauge::ResourceGauge;
use crate::schedule::Schedule;
use std::sync::Arc;
use std::time::Duration;

/// Knobs for [`list_items`].
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub parallelism: Parallelism,
    pub todos_schedule: Schedule<FetchError>,
    pub users_schedule: Schedule<FetchError>,
    /// Held for the duration of every user lookup attempt.
    pub gauge: ResourceGauge,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            parallelism: Parallelism::default(),
            todos_schedule: default_schedule(),
            users_schedule: default_schedule(),
            gauge: ResourceGauge::unbounded(),
        }
    }
}

impl ListOptions {
    /// Options from configuration, reporting loading state through `gauge`.
    pub fn from_config(config: &FetchConfig, gauge: ResourceGauge) -> Self {
        let schedule = retry_schedule(Schedule::from_config(&config.retry), &config.retry_on);
        Self {
            parallelism: config.parallelism,
            todos_schedule: schedule.clone(),
            users_schedule: schedule,
            gauge,
        }
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Use `schedule` for both the todo fetch and every user lookup.
    pub fn with_schedule(mut self, schedule: Schedule<FetchError>) -> Self {
        self.todos_schedule = schedule.clone();
        self.users_schedule = schedule;
        self
    }

    pub fn with_gauge(mut self, gauge: ResourceGauge) -> Self {
        self.gauge = gauge;
        self
    }
}

/// Exponential backoff from 100ms doubling, two retries, transient failures only.
pub fn default_schedule() -> Schedule<FetchError> {
    Schedule::exponential(Duration::from_millis(100), 2.0)
        .with_max_retries(2)
        .with_max_delay(Duration::from_secs(10))
        .while_input(FetchError::is_transient)
}

/// Restrict `schedule` to the given failure kinds. Decoding failures are
/// never retried.
pub fn retry_schedule(
    schedule: Schedule<FetchError>,
    retry_on: &[FetchErrorKind],
) -> Schedule<FetchError> {
    let kinds: Vec<FetchErrorKind> = retry_on
        .iter()
        .copied()
        .filter(|kind| *kind != FetchErrorKind::Decode)
        .collect();
    schedule.while_input(move |error: &FetchError| kinds.contains(&error.kind()))
}

pub fn get_todos(schedule: Schedule<FetchError>) -> Effect<Vec<Todo>, FetchError> {
    service_with::<dyn TodoService, _, _, _>(|api| api.todos()).retry(schedule)
}

pub fn get_user_name(user_id: UserId, options: &ListOptions) -> Effect<String, FetchError> {
    service_with::<dyn UserService, _, _, _>(move |api| api.user(user_id))
        .track(&options.gauge)
        .retry(options.users_schedule.clone())
        .map(|user| user.username)
        .catch_tag(FetchErrorKind::UserNotFound, move |_| {
            Effect::succeed(format!("DeletedUser#{user_id}"))
        })
        .catch_tag(FetchErrorKind::Decode, move |_| {
            Effect::succeed(format!("User#{user_id}"))
        })
}

pub fn fetch_list_item(todo: Todo, options: &ListOptions) -> Effect<ListItem, FetchError> {
    get_user_name(todo.user_id, options).map(move |username| ListItem::new(&todo, username))
}

/// Every todo joined with its owner's username, in todo order.
pub fn list_items(options: ListOptions) -> Effect<Vec<ListItem>, FetchError> {
    let options = Arc::new(options);
    get_todos(options.todos_schedule.clone()).flat_map(move |todos| {
        let parallelism = options.parallelism;
        let options = Arc::clone(&options);
        Effect::for_each_par(
            todos,
            move |todo| fetch_list_item(todo, &options),
            parallelism,
        )
    })
}

/// Provide `api` as both the todo and the user service.
pub fn with_api<A, E, T>(effect: Effect<A, E>, api: Arc<T>) -> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
    T: TodoService + UserService + 'static,
{
    let todos: Arc<dyn TodoService> = api.clone();
    let users: Arc<dyn UserService> = api;
    effect.provide_service(users).provide_service(todos)
}
