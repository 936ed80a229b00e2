use anyhow::Result;
use pretty_assertions::assert_eq;
use rust_sqlite_tables::{
    ColumnSpec, DatabaseError, DatabaseManager, ExecutionChannel, Params, Row, Schema,
    SqliteConfig, Value,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Helper function to create an in-memory database with a users table
fn create_test_db() -> Result<DatabaseManager> {
    init_tracing();
    let mut db = DatabaseManager::open_in_memory()?;
    db.create_dynamic_table("Users", &users_columns())?;
    Ok(db)
}

// Helper function to create a file-based database in a fresh temporary directory
fn create_temp_db() -> Result<(DatabaseManager, TempDir)> {
    init_tracing();
    let dir = TempDir::new()?;
    let config = SqliteConfig::new(dir.path().join("nested/data/app.db"), Schema::new());
    let mut db = DatabaseManager::open(config)?;
    db.create_dynamic_table("Users", &users_columns())?;
    Ok((db, dir))
}

fn users_columns() -> ColumnSpec {
    ColumnSpec::new()
        .with_column("Name", "TEXT NOT NULL")
        .with_column("E-mail", "TEXT UNIQUE")
        .with_column("age", "INTEGER")
}

fn reopen(dir: &TempDir) -> Result<DatabaseManager> {
    let config = SqliteConfig::new(dir.path().join("nested/data/app.db"), Schema::new());
    Ok(DatabaseManager::open(config)?)
}

fn count(db: &DatabaseManager, table: &str) -> Result<i64> {
    let rows = db.query(&format!("SELECT COUNT(*) AS n FROM \"{table}\""), &Params::new())?;
    match rows[0]["n"] {
        Value::Integer(n) => Ok(n),
        ref other => anyhow::bail!("unexpected count value {other:?}"),
    }
}

fn column_names(db: &DatabaseManager, table: &str) -> Result<Vec<String>> {
    let rows = db.query(&format!("PRAGMA table_info(\"{table}\")"), &Params::new())?;
    Ok(rows
        .iter()
        .map(|row| match &row["name"] {
            Value::Text(name) => name.clone(),
            other => panic!("unexpected column name {other:?}"),
        })
        .collect())
}

#[test]
fn test_basic_operations() {
    test_basic_operations_impl().unwrap();
}

fn test_basic_operations_impl() -> Result<()> {
    let db = create_test_db()?;
    assert_eq!(column_names(&db, "users")?, vec!["id", "name", "e_mail", "age"]);

    // Insert a new user
    let changed = db.execute(
        "INSERT INTO users (name, e_mail, age) VALUES (?1, ?2, ?3)",
        &Params::new().with_arg("John Doe").with_arg("john@example.com").with_arg(30),
        true,
    )?;
    assert_eq!(changed, 1);

    // Query a user
    let users = db.query(
        "SELECT id, name, e_mail, age FROM users WHERE id = ?",
        &Params::positional([1_i64]),
    )?;
    let mut expected = Row::new();
    expected.insert("id".into(), Value::Integer(1));
    expected.insert("name".into(), Value::Text("John Doe".into()));
    expected.insert("e_mail".into(), Value::Text("john@example.com".into()));
    expected.insert("age".into(), Value::Integer(30));
    assert_eq!(users, vec![expected]);

    // Update the user
    db.execute(
        "UPDATE users SET age = :age WHERE id = :id",
        &Params::new().with_value("age", 31).with_value(":id", 1),
        true,
    )?;
    let age = db.query("SELECT age FROM users WHERE id = 1", &Params::new())?;
    assert_eq!(age[0]["age"], Value::Integer(31));

    // Delete the user
    db.execute("DELETE FROM users WHERE id = ?", &Params::positional([1_i64]), true)?;
    assert_eq!(count(&db, "users")?, 0);
    assert!(!db.in_transaction());
    Ok(())
}

#[test]
fn test_pending_write_committed_on_close() {
    test_pending_write_committed_on_close_impl().unwrap();
}

fn test_pending_write_committed_on_close_impl() -> Result<()> {
    let (mut db, dir) = create_temp_db()?;
    assert!(db.path().starts_with(dir.path()));

    db.execute(
        "INSERT INTO users (name) VALUES (?)",
        &Params::positional(["pending"]),
        false,
    )?;
    assert!(db.in_transaction());

    db.close()?;
    assert!(!db.is_connected());
    // closing twice is harmless
    db.close()?;

    let db = reopen(&dir)?;
    assert_eq!(count(&db, "users")?, 1);
    Ok(())
}

#[test]
fn test_drop_commits_pending_write() {
    test_drop_commits_pending_write_impl().unwrap();
}

fn test_drop_commits_pending_write_impl() -> Result<()> {
    let (db, dir) = create_temp_db()?;
    db.execute(
        "INSERT INTO users (name) VALUES (?)",
        &Params::positional(["scoped"]),
        false,
    )?;
    drop(db);

    let db = reopen(&dir)?;
    let rows = db.query("SELECT name FROM users", &Params::new())?;
    assert_eq!(rows[0]["name"], Value::Text("scoped".into()));
    Ok(())
}

#[test]
fn test_error_rolls_back_pending_transaction() {
    test_error_rolls_back_pending_transaction_impl().unwrap();
}

fn test_error_rolls_back_pending_transaction_impl() -> Result<()> {
    let db = create_test_db()?;
    db.execute(
        "INSERT INTO users (name) VALUES (?)",
        &Params::positional(["doomed"]),
        false,
    )?;
    assert!(db.in_transaction());

    let err = db
        .execute("INSERT INTO missing (x) VALUES (1)", &Params::new(), true)
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Sqlite(_)), "{err:?}");
    assert!(!db.in_transaction());
    assert_eq!(count(&db, "users")?, 0);

    // constraint violations surface the engine error too
    db.execute("INSERT INTO users (name, e_mail) VALUES ('a', 'x@y')", &Params::new(), true)?;
    let err = db
        .execute("INSERT INTO users (name, e_mail) VALUES ('b', 'x@y')", &Params::new(), true)
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Sqlite(_)), "{err:?}");
    assert_eq!(count(&db, "users")?, 1);
    Ok(())
}

#[test]
fn test_explicit_commit_and_rollback() {
    test_explicit_commit_and_rollback_impl().unwrap();
}

fn test_explicit_commit_and_rollback_impl() -> Result<()> {
    let db = create_test_db()?;
    db.execute("INSERT INTO users (name) VALUES ('kept')", &Params::new(), false)?;
    db.commit()?;
    assert!(!db.in_transaction());

    db.execute("INSERT INTO users (name) VALUES ('dropped')", &Params::new(), false)?;
    db.rollback()?;
    assert!(!db.in_transaction());
    assert_eq!(count(&db, "users")?, 1);

    // nothing pending: both are no-ops
    db.commit()?;
    db.rollback()?;
    Ok(())
}

#[test]
fn test_parameter_errors() {
    test_parameter_errors_impl().unwrap();
}

fn test_parameter_errors_impl() -> Result<()> {
    let db = create_test_db()?;
    let err = db
        .execute("INSERT INTO users (name, age) VALUES (?, ?)", &Params::positional(["x"]), true)
        .unwrap_err();
    assert!(
        matches!(err, DatabaseError::ParameterCount { expected: 2, actual: 1 }),
        "{err:?}"
    );

    let err = db
        .execute(
            "INSERT INTO users (name) VALUES (:name)",
            &Params::new().with_value("nickname", "x"),
            true,
        )
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UnknownParameter(ref name) if name == "nickname"));

    // a named placeholder left unbound must not be written as NULL
    let err = db
        .execute(
            "INSERT INTO users (name, age) VALUES (:name, :age)",
            &Params::new().with_value("name", "x"),
            true,
        )
        .unwrap_err();
    assert!(
        matches!(err, DatabaseError::MissingParameter(ref name) if name == ":age"),
        "{err:?}"
    );

    let err = db
        .execute(
            "INSERT INTO users (name, age) VALUES (?1, :age)",
            &Params::new().with_value("age", 3),
            true,
        )
        .unwrap_err();
    assert!(
        matches!(err, DatabaseError::MissingParameter(ref name) if name == "?1"),
        "{err:?}"
    );

    let err = db
        .execute(
            "INSERT INTO users (name, age) VALUES (?1, :age)",
            &Params::new()
                .with_arg("a")
                .with_arg(1)
                .with_arg("extra")
                .with_value("age", 3),
            true,
        )
        .unwrap_err();
    assert!(
        matches!(err, DatabaseError::ParameterCount { expected: 2, actual: 3 }),
        "{err:?}"
    );

    db.execute(
        "INSERT INTO users (name, age) VALUES (?1, :age)",
        &Params::new().with_arg("mixed").with_value("age", 3),
        true,
    )?;
    assert_eq!(count(&db, "users")?, 1);
    Ok(())
}

#[test]
fn test_failed_final_commit_rolls_back() {
    test_failed_final_commit_rolls_back_impl().unwrap();
}

fn test_failed_final_commit_rolls_back_impl() -> Result<()> {
    let (mut db, dir) = create_temp_db()?;
    db.execute("CREATE TABLE parent (id INTEGER PRIMARY KEY)", &Params::new(), true)?;
    db.execute(
        "CREATE TABLE child (id INTEGER PRIMARY KEY, \
         parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED)",
        &Params::new(),
        true,
    )?;

    // the foreign key is only checked at commit time
    db.execute(
        "INSERT INTO child (parent_id) VALUES (?)",
        &Params::positional([99_i64]),
        false,
    )?;
    assert!(db.in_transaction());

    let err = db.close().unwrap_err();
    assert!(matches!(err, DatabaseError::Sqlite(_)), "{err:?}");
    assert!(!db.is_connected());

    let db = reopen(&dir)?;
    assert_eq!(count(&db, "child")?, 0);
    Ok(())
}

#[test]
fn test_only_dml_opens_implicit_transaction() {
    test_only_dml_opens_implicit_transaction_impl().unwrap();
}

fn test_only_dml_opens_implicit_transaction_impl() -> Result<()> {
    let (db, _dir) = create_temp_db()?;

    db.execute("PRAGMA foreign_keys = OFF", &Params::new(), false)?;
    assert!(!db.in_transaction());
    let rows = db.query("PRAGMA foreign_keys", &Params::new())?;
    assert_eq!(rows[0]["foreign_keys"], Value::Integer(0));

    db.execute("CREATE TABLE audit (entry TEXT)", &Params::new(), false)?;
    assert!(!db.in_transaction());

    db.execute("VACUUM", &Params::new(), false)?;
    assert!(!db.in_transaction());

    db.execute("UPDATE users SET age = 1", &Params::new(), false)?;
    assert!(db.in_transaction());
    db.rollback()?;
    Ok(())
}

#[test]
fn test_row_returning_statements_succeed() {
    test_row_returning_statements_succeed_impl().unwrap();
}

fn test_row_returning_statements_succeed_impl() -> Result<()> {
    let (mut db, _dir) = create_temp_db()?;
    assert!(db.submit("PRAGMA journal_mode = WAL"));
    let rows = db.query("PRAGMA journal_mode", &Params::new())?;
    assert_eq!(rows[0]["journal_mode"], Value::Text("wal".into()));

    assert_eq!(db.execute("SELECT 1", &Params::new(), false)?, 0);
    let changed = db.execute(
        "INSERT INTO users (name) VALUES ('r') RETURNING id",
        &Params::new(),
        true,
    )?;
    assert_eq!(changed, 1);
    assert_eq!(count(&db, "users")?, 1);
    Ok(())
}

#[test]
fn test_value_round_trip() {
    test_value_round_trip_impl().unwrap();
}

fn test_value_round_trip_impl() -> Result<()> {
    let mut db = DatabaseManager::open_in_memory()?;
    let columns = ColumnSpec::new()
        .with_column("flag", "INTEGER")
        .with_column("ratio", "REAL")
        .with_column("payload", "BLOB")
        .with_column("note", "TEXT");
    db.create_dynamic_table("samples", &columns)?;
    db.execute(
        "INSERT INTO samples (flag, ratio, payload, note) VALUES (?, ?, ?, ?)",
        &Params::new()
            .with_arg(true)
            .with_arg(0.25)
            .with_arg(vec![0_u8, 159, 255])
            .with_arg(None::<String>),
        true,
    )?;
    let rows = db.query("SELECT flag, ratio, payload, note FROM samples", &Params::new())?;
    let row = &rows[0];
    assert_eq!(row["flag"], Value::Integer(1));
    assert_eq!(row["ratio"], Value::Real(0.25));
    assert_eq!(row["payload"], Value::Blob(vec![0, 159, 255]));
    assert_eq!(row["note"], Value::Null);
    Ok(())
}

#[test]
fn test_submit_reports_failure() {
    let mut db = DatabaseManager::open_in_memory().unwrap();
    assert!(db.submit("CREATE TABLE t (a TEXT)"));
    assert!(!db.submit("CREATE TABLE t (a TEXT)"));
    assert!(!db.submit("NOT SQL AT ALL"));
}

#[test]
fn test_missing_directory_without_creation() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = SqliteConfig::new(dir.path().join("absent/app.db"), Schema::new())
        .with_create_missing_dirs(false);
    let err = DatabaseManager::open(config).unwrap_err();
    assert!(matches!(err, DatabaseError::Open { .. }), "{err:?}");
}
