//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire a SQLite-backed to-do store through `statekeep_core`.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `statekeep_cli [db_path] [todo title...]`

use log::info;
use serde::{Deserialize, Serialize};
use statekeep_core::migration::steps::{add_field, each_in_array};
use statekeep_core::{
    CreateOptions, LogConfig, PersistedStoreFactory, SqliteStorage, StoreDescriptor,
    StoreRegistry,
};
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_DB_PATH: &str = "statekeep_demo.sqlite3";
const TODO_STORE_NAME: &str = "todos:list";
const TODO_STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Todo {
    id: Uuid,
    title: String,
    done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TodoListState {
    todos: Vec<Todo>,
    selected: Option<Uuid>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let logging = LogConfig::from_env()
        .and_then(|config| config.map_or(Ok(()), statekeep_core::init_logging_with));
    if let Err(err) = logging {
        eprintln!("logging disabled: {err}");
    }

    let mut args = std::env::args().skip(1);
    let db_path = args.next().unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
    let title = args.collect::<Vec<_>>().join(" ");

    match run(&db_path, title.trim()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("statekeep error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(db_path: &str, title: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "statekeep_core version={} build_mode={}",
        statekeep_core::core_version(),
        statekeep_core::build_mode()
    );

    let storage = Arc::new(SqliteStorage::open(db_path)?);
    let factory = PersistedStoreFactory::new(Arc::new(StoreRegistry::new()), storage)
        .with_error_handler(|err| eprintln!("persistence error: {err}"));

    let descriptor = StoreDescriptor::<TodoListState>::builder(TODO_STORE_NAME, TODO_STORE_VERSION)
        .migration_step(0, each_in_array("todos", add_field("done", false.into())))
        .persist_fields(["todos"])
        .build()?;
    let store = factory.create(
        descriptor,
        || TodoListState {
            todos: Vec::new(),
            selected: None,
        },
        CreateOptions::new(),
    )?;

    let outcome = store.hydrated().await;
    println!("hydration outcome={outcome}");

    if !title.is_empty() {
        let todo = Todo {
            id: Uuid::new_v4(),
            title: title.to_string(),
            done: false,
        };
        store.set(move |state| {
            state.selected = Some(todo.id);
            state.todos.push(todo);
        });
    }
    store.flush().await;

    store.with(|state| {
        info!(
            "event=cli_run module=cli status=ok store={} todos={}",
            TODO_STORE_NAME,
            state.todos.len()
        );
        println!("todos count={}", state.todos.len());
        for todo in &state.todos {
            let mark = if todo.done { "x" } else { " " };
            println!("[{mark}] {} {}", todo.id, todo.title);
        }
    });
    Ok(())
}
