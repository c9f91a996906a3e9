//! Question Catalog: read-only store over questions tagged by dataset and
//! source split, plus compact schema-text rendering for prompt assembly.
//!
//! Backed by the same read-only SQLite file the sandbox queries, with a
//! Spider-style table layout: `questions`, `spider_tables`,
//! `spider_columns`, `spider_primary_keys`, `spider_foreign_keys`.

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;
use tsql_schemas::{Question, SchemaTextOptions};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unknown db_id or no tables found: {0}")]
    UnknownDbId(String),
}

pub struct QuestionCatalog {
    conn: Mutex<Connection>,
    schema_cache: Mutex<HashMap<(String, CacheKey), String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    use_original_names: bool,
    include_types: bool,
    max_columns_per_table: Option<usize>,
    max_total_chars: Option<usize>,
}

impl From<&SchemaTextOptions> for CacheKey {
    fn from(o: &SchemaTextOptions) -> Self {
        Self {
            use_original_names: o.use_original_names,
            include_types: o.include_types,
            max_columns_per_table: o.max_columns_per_table,
            max_total_chars: o.max_total_chars,
        }
    }
}

impl QuestionCatalog {
    pub fn open(path: &std::path::Path) -> Result<Self, CatalogError> {
        let uri = format!("file:{}?mode=ro", path.display());
        let conn = Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            schema_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Ordered by `(split, source_index)` ascending, paginated by
    /// `(limit, offset)`.
    pub fn list(
        &self,
        split: Option<&str>,
        db_id: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Question>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(s) = split {
            clauses.push("split = ?");
            params.push(Box::new(s.to_string()));
        }
        if let Some(d) = db_id {
            clauses.push("db_id = ?");
            params.push(Box::new(d.to_string()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT id, db_id, question, gold_sql, split, source_index FROM questions \
             {where_sql} ORDER BY split ASC, source_index ASC LIMIT ? OFFSET ?"
        );
        params.push(Box::new(limit));
        params.push(Box::new(offset));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_question)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn by_id(&self, id: &str) -> Result<Option<Question>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, db_id, question, gold_sql, split, source_index FROM questions WHERE id = ?",
        )?;
        let mut rows = stmt.query_map([id], row_to_question)?;
        match rows.next() {
            Some(r) => Ok(Some(r?)),
            None => Ok(None),
        }
    }

    /// Deterministic for fixed `(db_id, options)`, memoized per process.
    pub fn schema_text(
        &self,
        db_id: &str,
        options: &SchemaTextOptions,
    ) -> Result<String, CatalogError> {
        let key = CacheKey::from(options);
        {
            let cache = self.schema_cache.lock().unwrap();
            if let Some(cached) = cache.get(&(db_id.to_string(), key.clone())) {
                return Ok(cached.clone());
            }
        }

        let text = self.render_schema_text(db_id, options)?;

        let mut cache = self.schema_cache.lock().unwrap();
        cache.insert((db_id.to_string(), key), text.clone());
        Ok(text)
    }

    fn render_schema_text(
        &self,
        db_id: &str,
        options: &SchemaTextOptions,
    ) -> Result<String, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let name_field = if options.use_original_names { "name_original" } else { "name" };

        let mut tables_stmt = conn.prepare(&format!(
            "SELECT table_id, {name_field} FROM spider_tables WHERE db_id = ? ORDER BY table_id"
        ))?;
        let tables: Vec<(i64, String)> = tables_stmt
            .query_map([db_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<_, _>>()?;

        if tables.is_empty() {
            return Err(CatalogError::UnknownDbId(db_id.to_string()));
        }

        let table_id_to_name: HashMap<i64, String> = tables.iter().cloned().collect();

        let mut cols_stmt = conn.prepare(&format!(
            "SELECT table_id, {name_field}, col_type FROM spider_columns \
             WHERE db_id = ? AND table_id IS NOT NULL ORDER BY table_id, column_id"
        ))?;
        let mut cols_by_table: HashMap<i64, Vec<(String, String)>> = HashMap::new();
        for row in cols_stmt.query_map([db_id], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })? {
            let (tid, cname, ctype) = row?;
            cols_by_table.entry(tid).or_default().push((cname, ctype));
        }

        let mut pks_stmt = conn.prepare(&format!(
            "SELECT c.table_id, c.{name_field} FROM spider_primary_keys pk \
             JOIN spider_columns c ON c.db_id = pk.db_id AND c.column_id = pk.column_id \
             WHERE pk.db_id = ? AND c.table_id IS NOT NULL ORDER BY c.table_id, c.column_id"
        ))?;
        let mut pks_by_table: HashMap<i64, Vec<String>> = HashMap::new();
        for row in pks_stmt.query_map([db_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))? {
            let (tid, cname) = row?;
            pks_by_table.entry(tid).or_default().push(cname);
        }

        let mut fks_stmt = conn.prepare(&format!(
            "SELECT c_from.table_id, c_from.{name_field}, c_to.table_id, c_to.{name_field} \
             FROM spider_foreign_keys fk \
             JOIN spider_columns c_from ON c_from.db_id = fk.db_id AND c_from.column_id = fk.from_column_id \
             JOIN spider_columns c_to ON c_to.db_id = fk.db_id AND c_to.column_id = fk.to_column_id \
             WHERE fk.db_id = ? AND c_from.table_id IS NOT NULL AND c_to.table_id IS NOT NULL \
             ORDER BY c_from.table_id, c_from.column_id"
        ))?;
        let fks: Vec<(i64, String, i64, String)> = fks_stmt
            .query_map([db_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut lines: Vec<String> = Vec::new();
        lines.push("You are given the following database schema.".to_string());
        lines.push(String::new());
        lines.push(format!("Database: {db_id}"));
        lines.push(String::new());
        lines.push("Tables:".to_string());

        for (tid, tname) in &tables {
            let cols = cols_by_table.get(tid).cloned().unwrap_or_default();
            let (shown, omitted) = match options.max_columns_per_table {
                Some(max) if cols.len() > max => (cols[..max].to_vec(), cols.len() - max),
                _ => (cols.clone(), 0),
            };

            let mut cols_txt = if options.include_types {
                shown
                    .iter()
                    .map(|(c, t)| format!("{c}:{t}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                shown.iter().map(|(c, _)| c.clone()).collect::<Vec<_>>().join(", ")
            };
            if omitted > 0 {
                cols_txt = format!("{cols_txt}, … (+{omitted} more)");
            }
            lines.push(format!("- {tname}({cols_txt})"));
        }

        lines.push(String::new());
        if fks.is_empty() {
            lines.push("Foreign keys: (none)".to_string());
        } else {
            lines.push("Foreign keys:".to_string());
            for (from_tid, from_col, to_tid, to_col) in &fks {
                let from_table = table_id_to_name
                    .get(from_tid)
                    .cloned()
                    .unwrap_or_else(|| format!("table_{from_tid}"));
                let to_table = table_id_to_name
                    .get(to_tid)
                    .cloned()
                    .unwrap_or_else(|| format!("table_{to_tid}"));
                lines.push(format!(
                    "- {from_table}.{from_col} references {to_table}.{to_col}"
                ));
            }
        }

        lines.push(String::new());
        let any_pk = pks_by_table.values().any(|v| !v.is_empty());
        if any_pk {
            lines.push("Primary keys:".to_string());
            for (tid, _) in &tables {
                if let Some(pk_cols) = pks_by_table.get(tid) {
                    if !pk_cols.is_empty() {
                        let tname = table_id_to_name.get(tid).cloned().unwrap();
                        lines.push(format!("- {tname}: {}", pk_cols.join(", ")));
                    }
                }
            }
        } else {
            lines.push("Primary keys: (none)".to_string());
        }

        let mut text = lines.join("\n");
        if let Some(cap) = options.max_total_chars {
            if text.chars().count() > cap {
                let truncated: String = text.chars().take(cap.saturating_sub(1)).collect();
                text = format!("{truncated}…");
            }
        }
        Ok(text)
    }
}

fn row_to_question(row: &rusqlite::Row) -> rusqlite::Result<Question> {
    Ok(Question {
        id: row.get(0)?,
        db_id: row.get(1)?,
        question: row.get(2)?,
        gold_sql: row.get(3)?,
        split: row.get(4)?,
        source_index: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> QuestionCatalog {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        std::mem::forget(tmp); // keep file alive for the life of the test
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE questions(id TEXT, db_id TEXT, question TEXT, gold_sql TEXT, split TEXT, source_index INTEGER);
             INSERT INTO questions VALUES ('q1','shop_sqlite','how many orders?','SELECT COUNT(*) FROM orders;','train',0);
             INSERT INTO questions VALUES ('q2','shop_sqlite','list customers','SELECT * FROM customers;','train',1);
             CREATE TABLE spider_tables(db_id TEXT, table_id INTEGER, name TEXT, name_original TEXT);
             INSERT INTO spider_tables VALUES ('shop_sqlite',1,'orders','Orders');
             INSERT INTO spider_tables VALUES ('shop_sqlite',2,'customers','Customers');
             CREATE TABLE spider_columns(db_id TEXT, column_id INTEGER, table_id INTEGER, name TEXT, name_original TEXT, col_type TEXT);
             INSERT INTO spider_columns VALUES ('shop_sqlite',1,1,'order_id','OrderId','int');
             INSERT INTO spider_columns VALUES ('shop_sqlite',2,1,'customer_id','CustomerId','int');
             INSERT INTO spider_columns VALUES ('shop_sqlite',3,2,'customer_id','CustomerId','int');
             CREATE TABLE spider_primary_keys(db_id TEXT, column_id INTEGER);
             INSERT INTO spider_primary_keys VALUES ('shop_sqlite',1);
             CREATE TABLE spider_foreign_keys(db_id TEXT, from_column_id INTEGER, to_column_id INTEGER);
             INSERT INTO spider_foreign_keys VALUES ('shop_sqlite',2,3);"
        ).unwrap();
        QuestionCatalog::open(&path).unwrap()
    }

    #[test]
    fn lists_questions_ordered_by_split_then_index() {
        let cat = setup();
        let qs = cat.list(None, Some("shop_sqlite"), 100, 0).unwrap();
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].id, "q1");
    }

    #[test]
    fn schema_text_is_deterministic_and_memoized() {
        let cat = setup();
        let opts = SchemaTextOptions::default();
        let a = cat.schema_text("shop_sqlite", &opts).unwrap();
        let b = cat.schema_text("shop_sqlite", &opts).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("orders"));
        assert!(a.contains("references"));
    }

    #[test]
    fn use_original_names_switches_the_rendered_identifiers() {
        let cat = setup();
        let normalized = cat
            .schema_text(
                "shop_sqlite",
                &SchemaTextOptions {
                    use_original_names: false,
                    ..Default::default()
                },
            )
            .unwrap();
        let original = cat
            .schema_text(
                "shop_sqlite",
                &SchemaTextOptions {
                    use_original_names: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(normalized.contains("orders"));
        assert!(original.contains("Orders"));
        assert_ne!(normalized, original);
    }

    #[test]
    fn unknown_db_id_is_an_error() {
        let cat = setup();
        let err = cat.schema_text("nope", &SchemaTextOptions::default()).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownDbId(_)));
    }
}
