//! In-memory warehouse for tests.
//!
//! Understands just enough statement shapes to exercise the stage
//! operators: `DELETE FROM t`, `INSERT INTO t <select>`
//! (rows come from a registered select source), `COPY t FROM '<location>' ...`
//! (rows come from a registered object) and `SELECT COUNT(*) FROM t`.
//! Anything else can be scripted with [`MemoryWarehouse::on_query`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Row, Scalar, Warehouse, WarehouseError, WarehouseSession};

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    selects: HashMap<String, Vec<Row>>,
    objects: HashMap<String, Vec<Row>>,
    queries: HashMap<String, Vec<Row>>,
    failures: Vec<(String, usize)>,
    delays: Vec<(String, Duration)>,
    statements: Vec<String>,
    open_sessions: usize,
    sessions_opened: usize,
    unavailable: bool,
}

#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    pub fn with_table(self, table: &str, rows: Vec<Row>) -> Self {
        self.state().tables.insert(table.to_string(), rows);
        self
    }

    /// Rows produced by `INSERT INTO <table> <select>`.
    pub fn with_select(self, select: &str, rows: Vec<Row>) -> Self {
        self.state().selects.insert(normalize(select), rows);
        self
    }

    /// Rows produced by a `COPY` from `location`.
    pub fn with_object(self, location: &str, rows: Vec<Row>) -> Self {
        self.state().objects.insert(location.to_string(), rows);
        self
    }

    pub fn on_query(self, query: &str, rows: Vec<Row>) -> Self {
        self.state().queries.insert(normalize(query), rows);
        self
    }

    /// The next `times` statements containing `pattern` fail.
    pub fn fail_matching(self, pattern: &str, times: usize) -> Self {
        self.state().failures.push((pattern.to_string(), times));
        self
    }

    /// Statements containing `pattern` take `delay` before they run.
    pub fn delay_matching(self, pattern: &str, delay: Duration) -> Self {
        self.state().delays.push((pattern.to_string(), delay));
        self
    }

    /// Session acquisition fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state().tables.get(table).map_or(0, Vec::len)
    }

    /// Every statement and query seen, in order, including failed ones.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn session(&self) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
        let mut state = self.state();
        if state.unavailable {
            return Err(WarehouseError::Rejected("warehouse unavailable".into()));
        }
        state.open_sessions += 1;
        state.sessions_opened += 1;

        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<State>>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        lock(&self.state).open_sessions -= 1;
    }
}

impl MemorySession {
    async fn before(&self, sql: &str) -> Result<(), WarehouseError> {
        let delay = {
            let mut state = lock(&self.state);
            state.statements.push(sql.to_string());
            state
                .delays
                .iter()
                .find(|(pattern, _)| sql.contains(pattern.as_str()))
                .map(|(_, delay)| *delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if let Some((pattern, remaining)) = state
            .failures
            .iter_mut()
            .find(|(pattern, remaining)| *remaining > 0 && sql.contains(pattern.as_str()))
        {
            *remaining -= 1;
            return Err(WarehouseError::Rejected(format!(
                "injected failure for `{pattern}`"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl WarehouseSession for MemorySession {
    async fn run(&mut self, sql: &str) -> Result<u64, WarehouseError> {
        self.before(sql).await?;
        let mut state = lock(&self.state);
        apply(&mut state, sql)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        self.before(sql).await?;
        let state = lock(&self.state);
        let sql = normalize(sql);

        if let Some(rows) = state.queries.get(&sql) {
            return Ok(rows.clone());
        }

        let upper = sql.to_uppercase();
        if let Some(table) = upper.strip_prefix("SELECT COUNT(*) FROM ") {
            if !table.contains(char::is_whitespace) {
                let table = &sql[sql.len() - table.len()..];
                let count = state.tables.get(table).map_or(0, Vec::len);
                return Ok(vec![vec![Scalar::Int(count as i64)]]);
            }
        }

        Err(WarehouseError::Rejected(format!("unscripted query `{sql}`")))
    }

    async fn run_atomic(&mut self, statements: &[String]) -> Result<u64, WarehouseError> {
        // Only the unit's own tables roll back; concurrent sessions keep their writes.
        let snapshot: HashMap<String, Option<Vec<Row>>> = {
            let state = lock(&self.state);
            statements
                .iter()
                .filter_map(|statement| target_table(statement))
                .map(|table| {
                    let rows = state.tables.get(&table).cloned();
                    (table, rows)
                })
                .collect()
        };
        let mut affected = 0;

        for statement in statements {
            let applied = match self.before(statement).await {
                Ok(()) => apply(&mut lock(&self.state), statement),
                Err(error) => Err(error),
            };

            match applied {
                Ok(rows) => affected += rows,
                Err(error) => {
                    let mut state = lock(&self.state);
                    for (table, rows) in snapshot {
                        match rows {
                            Some(rows) => state.tables.insert(table, rows),
                            None => state.tables.remove(&table),
                        };
                    }
                    return Err(error);
                }
            }
        }

        Ok(affected)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_string()
}

fn split_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| sql[keyword.len()..].trim_start())
}

fn first_token(rest: &str) -> (&str, &str) {
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    (&rest[..end], rest[end..].trim())
}

/// Table written by a statement the fake understands.
fn target_table(sql: &str) -> Option<String> {
    let sql = normalize(sql);
    ["DELETE FROM ", "INSERT INTO ", "COPY "]
        .into_iter()
        .find_map(|keyword| split_keyword(&sql, keyword))
        .map(|rest| first_token(rest).0.to_string())
}

fn apply(state: &mut State, sql: &str) -> Result<u64, WarehouseError> {
    let sql = normalize(sql);

    if let Some(rest) = split_keyword(&sql, "DELETE FROM ") {
        let (table, _) = first_token(rest);
        let removed = state.tables.insert(table.to_string(), Vec::new());
        return Ok(removed.map_or(0, |rows| rows.len() as u64));
    }

    if let Some(rest) = split_keyword(&sql, "INSERT INTO ") {
        let (table, select) = first_token(rest);
        let rows = state
            .selects
            .get(select)
            .cloned()
            .ok_or_else(|| WarehouseError::Rejected(format!("no source for `{select}`")))?;
        let count = rows.len() as u64;
        state.tables.entry(table.to_string()).or_default().extend(rows);
        return Ok(count);
    }

    if let Some(rest) = split_keyword(&sql, "COPY ") {
        let (table, rest) = first_token(rest);
        let location = rest
            .strip_prefix("FROM '")
            .and_then(|rest| rest.split('\'').next())
            .ok_or_else(|| WarehouseError::Rejected("malformed COPY".into()))?;
        let rows = state
            .objects
            .get(location)
            .cloned()
            .ok_or_else(|| WarehouseError::Rejected(format!("no such object `{location}`")))?;
        let count = rows.len() as u64;
        state.tables.entry(table.to_string()).or_default().extend(rows);
        return Ok(count);
    }

    Ok(0)
}
