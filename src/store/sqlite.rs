use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database. Used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Error::from)
}

fn text_column<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{raw}'").into(),
        )
    })
}

const META_COLUMNS: &str =
    "created_on, updated_on, created_by, last_modified_by, archived, archived_on, archived_by";

fn read_meta(row: &Row<'_>, start: usize) -> rusqlite::Result<Metadata> {
    Ok(Metadata {
        created_on: parse_datetime(&row.get::<_, String>(start)?),
        updated_on: parse_datetime(&row.get::<_, String>(start + 1)?),
        created_by: row.get(start + 2)?,
        last_modified_by: row.get(start + 3)?,
        archived: row.get(start + 4)?,
        archived_on: row
            .get::<_, Option<String>>(start + 5)?
            .map(|s| parse_datetime(&s)),
        archived_by: row.get(start + 6)?,
    })
}

/// Maps a primary key violation on insert to `AlreadyExists`.
fn insert_result(result: rusqlite::Result<usize>, what: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::AlreadyExists(what.to_string()))
        }
        Err(e) => Err(Error::from(e)),
    }
}

fn updated_rows(rows: usize, what: &str) -> Result<()> {
    if rows == 0 {
        return Err(Error::not_found(what));
    }
    Ok(())
}

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

const USER_COLUMNS: &str = "username, admin, password_hash, fname, lname, email, custom";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        username: row.get(0)?,
        admin: row.get(1)?,
        password_hash: row.get(2)?,
        fname: row.get(3)?,
        lname: row.get(4)?,
        email: row.get(5)?,
        custom: json_column(row, 6)?,
        meta: read_meta(row, 7)?,
    })
}

const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, username, created_at, expires_at, last_used_at";

fn row_to_token(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        username: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        expires_at: row.get::<_, Option<String>>(5)?.map(|s| parse_datetime(&s)),
        last_used_at: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
    })
}

const ORG_COLUMNS: &str = "id, name, permissions, custom";

fn row_to_org(row: &Row<'_>) -> rusqlite::Result<Org> {
    Ok(Org {
        id: row.get(0)?,
        name: row.get(1)?,
        permissions: json_column(row, 2)?,
        custom: json_column(row, 3)?,
        meta: read_meta(row, 4)?,
    })
}

const PROJECT_COLUMNS: &str = "id, org, name, permissions, visibility, custom";

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        org: row.get(1)?,
        name: row.get(2)?,
        permissions: json_column(row, 3)?,
        visibility: text_column(row, 4, Visibility::parse)?,
        custom: json_column(row, 5)?,
        meta: read_meta(row, 6)?,
    })
}

const BRANCH_COLUMNS: &str = "id, project, name, source, tag, custom";

fn row_to_branch(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        project: row.get(1)?,
        name: row.get(2)?,
        source: row.get(3)?,
        tag: row.get(4)?,
        custom: json_column(row, 5)?,
        meta: read_meta(row, 6)?,
    })
}

const ELEMENT_COLUMNS: &str =
    "id, project, branch, name, type, documentation, parent, source, target, custom";

fn row_to_element(row: &Row<'_>) -> rusqlite::Result<Element> {
    Ok(Element {
        id: row.get(0)?,
        project: row.get(1)?,
        branch: row.get(2)?,
        name: row.get(3)?,
        element_type: row.get(4)?,
        documentation: row.get(5)?,
        parent: row.get(6)?,
        source: row.get(7)?,
        target: row.get(8)?,
        custom: json_column(row, 9)?,
        meta: read_meta(row, 10)?,
    })
}

const ARTIFACT_COLUMNS: &str =
    "id, project, branch, name, location, filename, strategy, size, custom";

fn row_to_artifact(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    Ok(Artifact {
        id: row.get(0)?,
        project: row.get(1)?,
        branch: row.get(2)?,
        name: row.get(3)?,
        location: row.get(4)?,
        filename: row.get(5)?,
        strategy: row.get(6)?,
        size: row.get(7)?,
        custom: json_column(row, 8)?,
        meta: read_meta(row, 9)?,
    })
}

const WEBHOOK_COLUMNS: &str =
    "id, name, type, reference, triggers, url, token_hash, token_location, custom";

fn row_to_webhook(row: &Row<'_>) -> rusqlite::Result<Webhook> {
    Ok(Webhook {
        id: row.get(0)?,
        name: row.get(1)?,
        webhook_type: text_column(row, 2, WebhookType::parse)?,
        reference: row.get(3)?,
        triggers: json_column(row, 4)?,
        url: row.get(5)?,
        token_hash: row.get(6)?,
        token_location: row.get(7)?,
        custom: json_column(row, 8)?,
        meta: read_meta(row, 9)?,
    })
}

fn insert_element(conn: &Connection, element: &Element) -> Result<()> {
    let result = conn.execute(
        &format!(
            "INSERT INTO elements ({ELEMENT_COLUMNS}, {META_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            element.id,
            element.project,
            element.branch,
            element.name,
            element.element_type,
            element.documentation,
            element.parent,
            element.source,
            element.target,
            to_json(&element.custom)?,
            format_datetime(&element.meta.created_on),
            format_datetime(&element.meta.updated_on),
            element.meta.created_by,
            element.meta.last_modified_by,
            element.meta.archived,
            element.meta.archived_on.as_ref().map(format_datetime),
            element.meta.archived_by,
        ],
    );
    insert_result(result, &format!("element [{}]", element.id))
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO users ({USER_COLUMNS}, {META_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                user.username,
                user.admin,
                user.password_hash,
                user.fname,
                user.lname,
                user.email,
                to_json(&user.custom)?,
                format_datetime(&user.meta.created_on),
                format_datetime(&user.meta.updated_on),
                user.meta.created_by,
                user.meta.last_modified_by,
                user.meta.archived,
                user.meta.archived_on.as_ref().map(format_datetime),
                user.meta.archived_by,
            ],
        );
        insert_result(result, &format!("user [{}]", user.username))
    }

    fn get_user(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS}, {META_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self, include_archived: bool) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS}, {META_COLUMNS} FROM users
             WHERE ?1 OR archived = 0 ORDER BY username"
        ))?;
        let rows = stmt.query_map(params![include_archived], row_to_user)?;
        collect(rows)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET admin = ?1, password_hash = ?2, fname = ?3, lname = ?4, email = ?5,
                custom = ?6, updated_on = ?7, last_modified_by = ?8, archived = ?9,
                archived_on = ?10, archived_by = ?11
             WHERE username = ?12",
            params![
                user.admin,
                user.password_hash,
                user.fname,
                user.lname,
                user.email,
                to_json(&user.custom)?,
                format_datetime(&user.meta.updated_on),
                user.meta.last_modified_by,
                user.meta.archived,
                user.meta.archived_on.as_ref().map(format_datetime),
                user.meta.archived_by,
                user.username,
            ],
        )?;
        updated_rows(rows, "user")
    }

    fn delete_user(&self, username: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE username = ?1", params![username])?;
        Ok(rows > 0)
    }

    fn has_admin_user(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE admin = 1 AND archived = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        let result = self.conn().execute(
            &format!("INSERT INTO tokens ({TOKEN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                token.id,
                token.token_hash,
                token.token_lookup,
                token.username,
                format_datetime(&token.created_at),
                token.expires_at.as_ref().map(format_datetime),
                token.last_used_at.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::TokenLookupCollision)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            row_to_token,
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_token_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Org operations

    fn create_org(&self, org: &Org) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO orgs ({ORG_COLUMNS}, {META_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                org.id,
                org.name,
                to_json(&org.permissions)?,
                to_json(&org.custom)?,
                format_datetime(&org.meta.created_on),
                format_datetime(&org.meta.updated_on),
                org.meta.created_by,
                org.meta.last_modified_by,
                org.meta.archived,
                org.meta.archived_on.as_ref().map(format_datetime),
                org.meta.archived_by,
            ],
        );
        insert_result(result, &format!("org [{}]", org.id))
    }

    fn get_org(&self, id: &str) -> Result<Option<Org>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ORG_COLUMNS}, {META_COLUMNS} FROM orgs WHERE id = ?1"),
            params![id],
            row_to_org,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_orgs(&self, include_archived: bool) -> Result<Vec<Org>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORG_COLUMNS}, {META_COLUMNS} FROM orgs
             WHERE ?1 OR archived = 0 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![include_archived], row_to_org)?;
        collect(rows)
    }

    fn update_org(&self, org: &Org) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE orgs SET name = ?1, permissions = ?2, custom = ?3, updated_on = ?4,
                last_modified_by = ?5, archived = ?6, archived_on = ?7, archived_by = ?8
             WHERE id = ?9",
            params![
                org.name,
                to_json(&org.permissions)?,
                to_json(&org.custom)?,
                format_datetime(&org.meta.updated_on),
                org.meta.last_modified_by,
                org.meta.archived,
                org.meta.archived_on.as_ref().map(format_datetime),
                org.meta.archived_by,
                org.id,
            ],
        )?;
        updated_rows(rows, "org")
    }

    fn delete_org(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM orgs WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Project operations

    fn create_project(&self, project: &Project) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO projects ({PROJECT_COLUMNS}, {META_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                project.id,
                project.org,
                project.name,
                to_json(&project.permissions)?,
                project.visibility.as_str(),
                to_json(&project.custom)?,
                format_datetime(&project.meta.created_on),
                format_datetime(&project.meta.updated_on),
                project.meta.created_by,
                project.meta.last_modified_by,
                project.meta.archived,
                project.meta.archived_on.as_ref().map(format_datetime),
                project.meta.archived_by,
            ],
        );
        insert_result(result, &format!("project [{}]", project.id))
    }

    fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS}, {META_COLUMNS} FROM projects WHERE id = ?1"),
            params![id],
            row_to_project,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_projects(&self, org: &str, include_archived: bool) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS}, {META_COLUMNS} FROM projects
             WHERE org = ?1 AND (?2 OR archived = 0) ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![org, include_archived], row_to_project)?;
        collect(rows)
    }

    fn list_all_projects(&self, include_archived: bool) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS}, {META_COLUMNS} FROM projects
             WHERE ?1 OR archived = 0 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![include_archived], row_to_project)?;
        collect(rows)
    }

    fn update_project(&self, project: &Project) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE projects SET name = ?1, permissions = ?2, visibility = ?3, custom = ?4,
                updated_on = ?5, last_modified_by = ?6, archived = ?7, archived_on = ?8,
                archived_by = ?9
             WHERE id = ?10",
            params![
                project.name,
                to_json(&project.permissions)?,
                project.visibility.as_str(),
                to_json(&project.custom)?,
                format_datetime(&project.meta.updated_on),
                project.meta.last_modified_by,
                project.meta.archived,
                project.meta.archived_on.as_ref().map(format_datetime),
                project.meta.archived_by,
                project.id,
            ],
        )?;
        updated_rows(rows, "project")
    }

    fn delete_project(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Branch operations

    fn create_branch(&self, branch: &Branch) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO branches ({BRANCH_COLUMNS}, {META_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                branch.id,
                branch.project,
                branch.name,
                branch.source,
                branch.tag,
                to_json(&branch.custom)?,
                format_datetime(&branch.meta.created_on),
                format_datetime(&branch.meta.updated_on),
                branch.meta.created_by,
                branch.meta.last_modified_by,
                branch.meta.archived,
                branch.meta.archived_on.as_ref().map(format_datetime),
                branch.meta.archived_by,
            ],
        );
        insert_result(result, &format!("branch [{}]", branch.id))
    }

    fn get_branch(&self, id: &str) -> Result<Option<Branch>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {BRANCH_COLUMNS}, {META_COLUMNS} FROM branches WHERE id = ?1"),
            params![id],
            row_to_branch,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_branches(&self, project: &str, include_archived: bool) -> Result<Vec<Branch>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BRANCH_COLUMNS}, {META_COLUMNS} FROM branches
             WHERE project = ?1 AND (?2 OR archived = 0) ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![project, include_archived], row_to_branch)?;
        collect(rows)
    }

    fn update_branch(&self, branch: &Branch) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE branches SET name = ?1, custom = ?2, updated_on = ?3, last_modified_by = ?4,
                archived = ?5, archived_on = ?6, archived_by = ?7
             WHERE id = ?8",
            params![
                branch.name,
                to_json(&branch.custom)?,
                format_datetime(&branch.meta.updated_on),
                branch.meta.last_modified_by,
                branch.meta.archived,
                branch.meta.archived_on.as_ref().map(format_datetime),
                branch.meta.archived_by,
                branch.id,
            ],
        )?;
        updated_rows(rows, "branch")
    }

    fn delete_branch(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM branches WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Element operations

    fn create_elements(&self, elements: &[Element]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for element in elements {
            insert_element(&tx, element)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_element(&self, id: &str) -> Result<Option<Element>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ELEMENT_COLUMNS}, {META_COLUMNS} FROM elements WHERE id = ?1"),
            params![id],
            row_to_element,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_elements(&self, branch: &str, include_archived: bool) -> Result<Vec<Element>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ELEMENT_COLUMNS}, {META_COLUMNS} FROM elements
             WHERE branch = ?1 AND (?2 OR archived = 0) ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![branch, include_archived], row_to_element)?;
        collect(rows)
    }

    fn list_children(&self, parent: &str, include_archived: bool) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM elements WHERE parent = ?1 AND (?2 OR archived = 0) ORDER BY id",
        )?;
        let rows = stmt.query_map(params![parent, include_archived], |row| row.get(0))?;
        collect(rows)
    }

    fn element_subtree(&self, id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT ?1
                 UNION
                 SELECT e.id FROM elements e JOIN subtree s ON e.parent = s.id
             )
             SELECT id FROM subtree",
        )?;
        let rows = stmt.query_map(params![id], |row| row.get(0))?;
        collect(rows)
    }

    fn update_element(&self, element: &Element) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE elements SET name = ?1, type = ?2, documentation = ?3, parent = ?4,
                source = ?5, target = ?6, custom = ?7, updated_on = ?8, last_modified_by = ?9,
                archived = ?10, archived_on = ?11, archived_by = ?12
             WHERE id = ?13",
            params![
                element.name,
                element.element_type,
                element.documentation,
                element.parent,
                element.source,
                element.target,
                to_json(&element.custom)?,
                format_datetime(&element.meta.updated_on),
                element.meta.last_modified_by,
                element.meta.archived,
                element.meta.archived_on.as_ref().map(format_datetime),
                element.meta.archived_by,
                element.id,
            ],
        )?;
        updated_rows(rows, "element")
    }

    fn delete_elements(&self, ids: &[String], placeholder: &str) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut repoint_source =
                tx.prepare("UPDATE elements SET source = ?1 WHERE source = ?2")?;
            let mut repoint_target =
                tx.prepare("UPDATE elements SET target = ?1 WHERE target = ?2")?;
            let mut delete = tx.prepare("DELETE FROM elements WHERE id = ?1")?;
            for id in ids {
                repoint_source.execute(params![placeholder, id])?;
                repoint_target.execute(params![placeholder, id])?;
                deleted += delete.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    // Artifact operations

    fn create_artifact(&self, artifact: &Artifact) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO artifacts ({ARTIFACT_COLUMNS}, {META_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                artifact.id,
                artifact.project,
                artifact.branch,
                artifact.name,
                artifact.location,
                artifact.filename,
                artifact.strategy,
                artifact.size,
                to_json(&artifact.custom)?,
                format_datetime(&artifact.meta.created_on),
                format_datetime(&artifact.meta.updated_on),
                artifact.meta.created_by,
                artifact.meta.last_modified_by,
                artifact.meta.archived,
                artifact.meta.archived_on.as_ref().map(format_datetime),
                artifact.meta.archived_by,
            ],
        );
        insert_result(result, &format!("artifact [{}]", artifact.id))
    }

    fn get_artifact(&self, id: &str) -> Result<Option<Artifact>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ARTIFACT_COLUMNS}, {META_COLUMNS} FROM artifacts WHERE id = ?1"),
            params![id],
            row_to_artifact,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_artifacts(&self, branch: &str, include_archived: bool) -> Result<Vec<Artifact>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARTIFACT_COLUMNS}, {META_COLUMNS} FROM artifacts
             WHERE branch = ?1 AND (?2 OR archived = 0) ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![branch, include_archived], row_to_artifact)?;
        collect(rows)
    }

    fn update_artifact(&self, artifact: &Artifact) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE artifacts SET name = ?1, location = ?2, filename = ?3, strategy = ?4,
                size = ?5, custom = ?6, updated_on = ?7, last_modified_by = ?8, archived = ?9,
                archived_on = ?10, archived_by = ?11
             WHERE id = ?12",
            params![
                artifact.name,
                artifact.location,
                artifact.filename,
                artifact.strategy,
                artifact.size,
                to_json(&artifact.custom)?,
                format_datetime(&artifact.meta.updated_on),
                artifact.meta.last_modified_by,
                artifact.meta.archived,
                artifact.meta.archived_on.as_ref().map(format_datetime),
                artifact.meta.archived_by,
                artifact.id,
            ],
        )?;
        updated_rows(rows, "artifact")
    }

    fn delete_artifact(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM artifacts WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Webhook operations

    fn create_webhook(&self, webhook: &Webhook) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO webhooks ({WEBHOOK_COLUMNS}, {META_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                webhook.id,
                webhook.name,
                webhook.webhook_type.as_str(),
                webhook.reference,
                to_json(&webhook.triggers)?,
                webhook.url,
                webhook.token_hash,
                webhook.token_location,
                to_json(&webhook.custom)?,
                format_datetime(&webhook.meta.created_on),
                format_datetime(&webhook.meta.updated_on),
                webhook.meta.created_by,
                webhook.meta.last_modified_by,
                webhook.meta.archived,
                webhook.meta.archived_on.as_ref().map(format_datetime),
                webhook.meta.archived_by,
            ],
        );
        insert_result(result, &format!("webhook [{}]", webhook.id))
    }

    fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {WEBHOOK_COLUMNS}, {META_COLUMNS} FROM webhooks WHERE id = ?1"),
            params![id],
            row_to_webhook,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_webhooks(&self, include_archived: bool) -> Result<Vec<Webhook>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {WEBHOOK_COLUMNS}, {META_COLUMNS} FROM webhooks
             WHERE ?1 OR archived = 0 ORDER BY created_on, id"
        ))?;
        let rows = stmt.query_map(params![include_archived], row_to_webhook)?;
        collect(rows)
    }

    fn update_webhook(&self, webhook: &Webhook) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE webhooks SET name = ?1, triggers = ?2, url = ?3, token_hash = ?4,
                token_location = ?5, custom = ?6, updated_on = ?7, last_modified_by = ?8,
                archived = ?9, archived_on = ?10, archived_by = ?11
             WHERE id = ?12",
            params![
                webhook.name,
                to_json(&webhook.triggers)?,
                webhook.url,
                webhook.token_hash,
                webhook.token_location,
                to_json(&webhook.custom)?,
                format_datetime(&webhook.meta.updated_on),
                webhook.meta.last_modified_by,
                webhook.meta.archived,
                webhook.meta.archived_on.as_ref().map(format_datetime),
                webhook.meta.archived_by,
                webhook.id,
            ],
        )?;
        updated_rows(rows, "webhook")
    }

    fn delete_webhook(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM webhooks WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_webhooks_in_scope(&self, scope: &str) -> Result<usize> {
        let nested = format!("{scope}{}", crate::id::ID_DELIMITER);
        let rows = self.conn().execute(
            "DELETE FROM webhooks
             WHERE reference = ?1 OR substr(reference, 1, length(?2)) = ?2",
            params![scope, nested],
        )?;
        Ok(rows)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
