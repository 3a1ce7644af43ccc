use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{ChangeEvent, ChangeOp, Filter, Gateway, Order, StoreError, Subscription};

const CHANGE_BUS_CAPACITY: usize = 256;

/// In-process store used when no remote store is configured: demo
/// operation and the integration tests. Implements the same gateway
/// surface and fans writes out on a change bus so realtime behavior is
/// observable without a hosted backend.
pub struct LocalGateway {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl LocalGateway {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| StoreError::Db(format!("create data dir: {e}")))?;
        let conn = Connection::open(data_dir.join("school.sqlite3"))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        bootstrap_schema(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Ok(LocalGateway {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Db("connection poisoned".into()))
    }

    fn emit(&self, table: &str, op: ChangeOp, row: Value) {
        // No subscribers is fine; send only fails when nobody listens.
        let _ = self.changes.send(ChangeEvent {
            table: table.to_string(),
            op,
            row,
        });
    }

    /// Deterministic fixture data for demo mode. Idempotent.
    pub fn seed_demo(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let seed = [
            "INSERT OR IGNORE INTO academic_years(id, name, is_current) VALUES
                ('year-2024', '2024', 1)",
            "INSERT OR IGNORE INTO terms(id, name, is_current) VALUES
                ('term-1', 'Term 1', 0),
                ('term-2', 'Term 2', 1),
                ('term-3', 'Term 3', 0)",
            "INSERT OR IGNORE INTO class_levels(id, name, level) VALUES
                ('class-s3', 'S.3', 3)",
            "INSERT OR IGNORE INTO streams(id, name, class_id) VALUES
                ('stream-s3-north', 'S.3 North', 'class-s3'),
                ('stream-s3-south', 'S.3 South', 'class-s3')",
            "INSERT OR IGNORE INTO subjects(id, code, name) VALUES
                ('subj-math', 'MAT', 'Mathematics'),
                ('subj-history', 'HIS', 'History')",
            "INSERT OR IGNORE INTO students(id, student_id_human, full_name, current_stream_id, gender, is_active) VALUES
                ('stu-nassozi', 'SJN/23/045', 'Nassozi Jane', 'stream-s3-north', 'F', 1),
                ('stu-opio', 'SJN/23/112', 'Opio David', 'stream-s3-north', 'M', 1),
                ('stu-kato', 'SJN/23/008', 'Kato John', 'stream-s3-north', 'M', 1),
                ('stu-akers', 'SJN/23/099', 'Akers Patricia', 'stream-s3-north', 'F', 1),
                ('stu-left', 'SJN/22/001', 'Left School', 'stream-s3-north', 'M', 0),
                ('stu-mugisha', 'SJN/23/130', 'Mugisha Brian', 'stream-s3-south', 'M', 1)",
            "INSERT OR IGNORE INTO teacher_allocations(id, teacher_id, subject_id, stream_id, academic_year_id) VALUES
                ('alloc-math-north', 'teacher-okello', 'subj-math', 'stream-s3-north', 'year-2024'),
                ('alloc-history-south', 'teacher-okello', 'subj-history', 'stream-s3-south', 'year-2024')",
            "INSERT OR IGNORE INTO marks(id, student_id, teacher_allocation_id, term_id, assessment_type, score, updated_at) VALUES
                ('mark-kato-math', 'stu-kato', 'alloc-math-north', 'term-2', 'EOT', 91, '2024-06-01T08:00:00Z')",
            "INSERT OR IGNORE INTO discipline_cases(id, student_id, category, notes, occurred_at) VALUES
                ('case-1', 'stu-opio', 'minor', 'late for prep', '2024-05-20'),
                ('case-2', 'stu-akers', 'major', 'skipped assembly', '2024-05-27')",
        ];
        for sql in seed {
            conn.execute(sql, [])?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Gateway for LocalGateway {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, StoreError> {
        check_ident(table)?;
        let mut sql = format!("SELECT * FROM {table}");
        let params = push_where(&mut sql, filters)?;
        if let Some(o) = order {
            check_ident(&o.column)?;
            sql.push_str(&format!(
                " ORDER BY {} {}",
                o.column,
                if o.ascending { "ASC" } else { "DESC" }
            ));
        }
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                let mut obj = Map::new();
                for (i, name) in columns.iter().enumerate() {
                    obj.insert(name.clone(), sql_cell_to_json(name, row.get_ref(i)?));
                }
                Ok(Value::Object(obj))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        check_ident(table)?;
        let mut sql = format!("SELECT COUNT(*) FROM {table}");
        let params = push_where(&mut sql, filters)?;
        let conn = self.lock()?;
        let n: i64 = conn.query_row(&sql, params_from_iter(params), |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        check_ident(table)?;
        let Value::Object(mut obj) = row else {
            return Err(StoreError::Decode("insert payload must be an object".into()));
        };
        if !obj.contains_key("id") {
            obj.insert("id".into(), json!(Uuid::new_v4().to_string()));
        }

        let mut cols = Vec::with_capacity(obj.len());
        let mut params = Vec::with_capacity(obj.len());
        for (k, v) in &obj {
            check_ident(k)?;
            cols.push(k.clone());
            params.push(json_to_sql(v)?);
        }
        let placeholders = vec!["?"; cols.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table}({}) VALUES({placeholders})",
            cols.join(", ")
        );
        {
            let conn = self.lock()?;
            conn.execute(&sql, params_from_iter(params))?;
        }

        let stored = Value::Object(obj);
        self.emit(table, ChangeOp::Insert, stored.clone());
        Ok(stored)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        check_ident(table)?;
        let Value::Object(obj) = patch else {
            return Err(StoreError::Decode("update payload must be an object".into()));
        };
        if obj.is_empty() {
            return Ok(());
        }

        let mut sets = Vec::with_capacity(obj.len());
        let mut params = Vec::with_capacity(obj.len() + 1);
        for (k, v) in &obj {
            check_ident(k)?;
            sets.push(format!("{k} = ?"));
            params.push(json_to_sql(v)?);
        }
        params.push(SqlValue::Text(id.to_string()));
        let sql = format!("UPDATE {table} SET {} WHERE id = ?", sets.join(", "));

        let updated_row = {
            let conn = self.lock()?;
            let changed = conn.execute(&sql, params_from_iter(params))?;
            if changed == 0 {
                return Err(StoreError::Db(format!("no row {id} in {table}")));
            }
            // Reload the row so subscribers can filter on it.
            let fetch = format!("SELECT * FROM {table} WHERE id = ?");
            let mut stmt = conn.prepare(&fetch)?;
            let columns: Vec<String> =
                stmt.column_names().iter().map(|c| c.to_string()).collect();
            stmt.query_row([id], |row| {
                let mut out = Map::new();
                for (i, name) in columns.iter().enumerate() {
                    out.insert(name.clone(), sql_cell_to_json(name, row.get_ref(i)?));
                }
                Ok(Value::Object(out))
            })?
        };

        self.emit(table, ChangeOp::Update, updated_row);
        Ok(())
    }

    fn subscribe(&self, table: &str, filter: Option<Filter>) -> Subscription {
        let mut bus = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(64);
        let table = table.to_string();
        let task = tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(ev) => {
                        if ev.table != table {
                            continue;
                        }
                        if let Some(f) = &filter {
                            if !f.matches(&ev.row) {
                                continue;
                            }
                        }
                        if tx.send(ev).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::new(rx, task)
    }
}

fn bootstrap_schema(conn: &Connection) -> Result<(), StoreError> {
    let ddl = [
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS class_levels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS streams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_id TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES class_levels(id)
        )",
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_id_human TEXT NOT NULL,
            full_name TEXT NOT NULL,
            current_stream_id TEXT NOT NULL,
            gender TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(current_stream_id) REFERENCES streams(id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_students_stream ON students(current_stream_id)",
        "CREATE TABLE IF NOT EXISTS teacher_allocations(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            stream_id TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(stream_id) REFERENCES streams(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_allocations_teacher ON teacher_allocations(teacher_id)",
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_allocation_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            assessment_type TEXT NOT NULL,
            score REAL NOT NULL,
            comments TEXT,
            updated_at TEXT,
            UNIQUE(student_id, teacher_allocation_id, term_id, assessment_type),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(teacher_allocation_id) REFERENCES teacher_allocations(id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_marks_allocation ON marks(teacher_allocation_id)",
        "CREATE TABLE IF NOT EXISTS discipline_cases(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            category TEXT NOT NULL,
            notes TEXT,
            occurred_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
    ];
    for sql in ddl {
        conn.execute(sql, [])?;
    }
    Ok(())
}

/// Table and column names come from our own code, but everything is
/// interpolated into SQL, so reject anything that is not a bare ident.
fn check_ident(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::Db(format!("invalid identifier: {name:?}")))
    }
}

fn push_where(sql: &mut String, filters: &[Filter]) -> Result<Vec<SqlValue>, StoreError> {
    let mut params = Vec::with_capacity(filters.len());
    for (i, f) in filters.iter().enumerate() {
        check_ident(&f.column)?;
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(&f.column);
        sql.push_str(" = ?");
        params.push(json_to_sql(&f.value)?);
    }
    Ok(params)
}

fn json_to_sql(v: &Value) -> Result<SqlValue, StoreError> {
    match v {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(StoreError::Decode(format!("unrepresentable number {n}")))
            }
        }
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        other => Err(StoreError::Decode(format!(
            "cannot store nested value {other}"
        ))),
    }
}

/// sqlite has no boolean type; `is_*` columns round-trip as 0/1.
fn sql_cell_to_json(column: &str, cell: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => {
            if column.starts_with("is_") {
                Value::Bool(i != 0)
            } else {
                json!(i)
            }
        }
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}
