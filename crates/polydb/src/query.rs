//! Query intent: what a builder has accumulated, before compilation.

use crate::condition::Condition;
use serde_json::{Map, Value};

/// Row payload for mutations.
pub type Payload = Map<String, Value>;

/// Statement kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Select(SelectOptions),
    Insert(Vec<Payload>),
    Update(Payload),
    Upsert {
        rows: Vec<Payload>,
        options: UpsertOptions,
    },
    Delete,
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Select(_) => "select",
            Operation::Insert(_) => "insert",
            Operation::Update(_) => "update",
            Operation::Upsert { .. } => "upsert",
            Operation::Delete => "delete",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::Select(_))
    }
}

/// Row-count strategy for selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Count every matching row, ignoring `limit`/`range`.
    Exact,
}

/// Options for `select()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectOptions {
    pub count: Option<CountMode>,
    /// Return only the count, no rows.
    pub head: bool,
}

impl SelectOptions {
    pub fn exact_count() -> Self {
        Self {
            count: Some(CountMode::Exact),
            head: false,
        }
    }

    pub fn head(mut self) -> Self {
        self.head = true;
        self
    }
}

/// Options for `upsert()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Conflict target columns.
    pub on_conflict: Vec<String>,
    /// `ON CONFLICT ... DO NOTHING` instead of updating.
    pub ignore_duplicates: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            on_conflict: vec!["id".to_string()],
            ignore_duplicates: false,
        }
    }
}

impl UpsertOptions {
    /// Conflict target from a comma-separated list, e.g. `"a,b"`.
    pub fn on_conflict(columns: &str) -> Self {
        Self {
            on_conflict: columns
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            ignore_duplicates: false,
        }
    }

    pub fn ignore_duplicates(mut self) -> Self {
        self.ignore_duplicates = true;
        self
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
    pub nulls_first: Option<bool>,
}

/// Options for `order()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderOptions {
    pub ascending: bool,
    pub nulls_first: Option<bool>,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self {
            ascending: true,
            nulls_first: None,
        }
    }
}

impl OrderOptions {
    pub fn asc() -> Self {
        Self::default()
    }

    pub fn desc() -> Self {
        Self {
            ascending: false,
            nulls_first: None,
        }
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls_first = Some(true);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls_first = Some(false);
        self
    }
}

/// Accumulated intent for one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub operation: Operation,
    pub conditions: Vec<Condition>,
    pub order: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Select list for reads, RETURNING list for mutations.
    pub columns: String,
    /// Permit UPDATE/DELETE without conditions.
    pub allow_unfiltered: bool,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operation: Operation::Select(SelectOptions::default()),
            conditions: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            columns: "*".to_string(),
            allow_unfiltered: false,
        }
    }
}
