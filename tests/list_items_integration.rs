//! End-to-end tests of the todo list program against scripted services

use fibrant::effect::{Exit, Parallelism};
use fibrant::gauge::ResourceGauge;
use fibrant::runtime::Runtime;
use fibrant::schedule::Schedule;
use fibrant::testing::{decode_error, transport_error, ScriptedTodoApi};
use fibrant::todos::{list_items, with_api, FetchError, ListItem, ListOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn options(parallelism: usize, retries: u32) -> ListOptions {
    ListOptions::default()
        .with_parallelism(Parallelism::bounded(parallelism).unwrap())
        .with_schedule(
            Schedule::fixed(Duration::from_millis(10))
                .with_max_retries(retries)
                .while_input(FetchError::is_transient),
        )
}

fn usernames(items: &[ListItem]) -> Vec<&str> {
    items.iter().map(|item| item.username.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_list_joins_todos_with_users_in_order() {
    let api = Arc::new(
        ScriptedTodoApi::builder()
            .todo(1, 1, "delectus aut autem")
            .todo(2, 2, "quis ut nam facilis")
            .todo(3, 1, "fugiat veniam minus")
            .user(1, "Bret")
            .user(2, "Antonette")
            .fail_user(2, [transport_error("users/2"), transport_error("users/2")])
            .latency(Duration::from_millis(25))
            .build(),
    );
    let runtime = Runtime::new().unwrap();

    let exit = runtime
        .run_exit(with_api(list_items(options(2, 2)), api.clone()))
        .await;

    let items = exit.success().expect("list should succeed");
    assert_eq!(
        items.iter().map(|item| item.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(usernames(&items), vec!["Bret", "Antonette", "Bret"]);
    assert_eq!(items[1].title, "quis ut nam facilis");

    // Lookups are not cached: user 1 owns two todos and is fetched twice.
    assert_eq!(api.user_calls(1), 2);
    assert_eq!(api.user_calls(2), 3);
    assert_eq!(api.todo_calls(), 1);
    assert!(api.max_concurrent_user_calls() <= 2);
    assert_eq!(runtime.live_fibers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_placeholders_for_missing_and_undecodable_users() {
    let api = Arc::new(
        ScriptedTodoApi::builder()
            .todo(1, 1, "first")
            .todo(2, 7, "orphaned")
            .todo(3, 3, "garbled owner")
            .user(1, "Bret")
            .user(3, "Samantha")
            .fail_user(3, [decode_error("users/3")])
            .build(),
    );
    let runtime = Runtime::new().unwrap();

    let items = runtime
        .run_exit(with_api(list_items(options(3, 2)), api.clone()))
        .await
        .success()
        .unwrap();

    assert_eq!(usernames(&items), vec!["Bret", "DeletedUser#7", "User#3"]);
    assert_eq!(api.user_calls(7), 1);
    assert_eq!(api.user_calls(3), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_the_list() {
    let api = Arc::new(
        ScriptedTodoApi::builder()
            .todo(1, 1, "first")
            .todo(2, 2, "second")
            .user(1, "Bret")
            .user(2, "Antonette")
            .fail_user(2, (0..5).map(|_| transport_error("users/2")))
            .latency(Duration::from_millis(5))
            .build(),
    );
    let runtime = Runtime::new().unwrap();

    let exit = runtime
        .run_exit(with_api(list_items(options(2, 1)), api.clone()))
        .await;

    match exit {
        Exit::Failure(FetchError::Transport { url, .. }) => {
            assert_eq!(url, "http://scripted/users/2");
        }
        other => panic!("expected transport failure, got {other:?}"),
    }
    assert_eq!(api.user_calls(2), 2);
    assert_eq!(runtime.live_fibers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_todo_fetch_failure_skips_user_lookups() {
    let api = Arc::new(
        ScriptedTodoApi::builder()
            .todo(1, 1, "first")
            .user(1, "Bret")
            .fail_todos((0..3).map(|_| transport_error("todos")))
            .build(),
    );
    let runtime = Runtime::new().unwrap();

    let exit = runtime
        .run_exit(with_api(list_items(options(2, 2)), api.clone()))
        .await;

    assert!(matches!(exit, Exit::Failure(FetchError::Transport { .. })));
    assert_eq!(api.todo_calls(), 3);
    assert_eq!(api.total_user_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_gauge_reports_one_busy_period_for_overlapping_lookups() {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let gauge = {
        let transitions = transitions.clone();
        ResourceGauge::builder()
            .on_transition(move |busy| transitions.lock().unwrap().push(busy))
            .build()
    };
    let api = Arc::new(
        ScriptedTodoApi::builder()
            .todo(1, 1, "a")
            .todo(2, 2, "b")
            .todo(3, 3, "c")
            .user(1, "Bret")
            .user(2, "Antonette")
            .user(3, "Samantha")
            .latency(Duration::from_millis(20))
            .build(),
    );
    let runtime = Runtime::new().unwrap();
    let program = list_items(options(3, 0).with_gauge(gauge.clone()));

    let items = runtime
        .run_exit(with_api(program, api))
        .await
        .success()
        .unwrap();

    assert_eq!(items.len(), 3);
    assert_eq!(*transitions.lock().unwrap(), vec![true, false]);
    assert_eq!(gauge.metrics().total_acquisitions, 3);
    assert!(!gauge.is_busy());
}

#[tokio::test]
async fn test_empty_todo_list() {
    let api = Arc::new(ScriptedTodoApi::builder().build());
    let runtime = Runtime::new().unwrap();

    let exit = runtime
        .run_exit(with_api(list_items(ListOptions::default()), api.clone()))
        .await;

    assert_eq!(exit, Exit::Success(Vec::new()));
    assert_eq!(api.total_user_calls(), 0);
}
