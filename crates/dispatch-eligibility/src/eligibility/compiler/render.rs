//! Renders predicate nodes to parameterised Postgres SQL.
//!
//! Every value reaches the statement as a bind parameter; only identifiers
//! from [`FactTable`] and [`WorkerTable`] are interpolated.

use serde::Serialize;

use super::ir::Predicate;
use super::Page;
use crate::eligibility::records::WorkerTable;
use crate::eligibility::store::FactTable;

const WORKER_ALIAS: &str = "w";
const FACT_ALIAS: &str = "f";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

struct SqlWriter<'a> {
    facts: &'a FactTable,
    workers: &'a WorkerTable,
    params: Vec<SqlParam>,
}

impl<'a> SqlWriter<'a> {
    fn new(facts: &'a FactTable, workers: &'a WorkerTable) -> Self {
        Self {
            facts,
            workers,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    fn bind_text(&mut self, value: &str) -> String {
        self.bind(SqlParam::Text(value.to_string()))
    }

    fn fact_subquery(&mut self, category: &str, value_clause: Option<(&str, String)>) -> String {
        let FactTable {
            table,
            worker_column,
            category_column,
            value_column,
        } = *self.facts;
        let category = self.bind_text(category);
        let mut sql = format!(
            "SELECT 1 FROM {table} {FACT_ALIAS} WHERE {FACT_ALIAS}.{worker_column} = {WORKER_ALIAS}.{id} AND {FACT_ALIAS}.{category_column} = {category}",
            id = self.workers.id_column,
        );
        if let Some((operator, value)) = value_clause {
            let placeholder = self.bind_text(&value);
            sql.push_str(&format!(
                " AND {FACT_ALIAS}.{value_column} {operator} {placeholder}"
            ));
            if operator == "LIKE" {
                sql.push_str(" ESCAPE '\\'");
            }
        }
        sql
    }

    fn predicate(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::HasFact { category, value } => {
                let subquery = self.fact_subquery(category, Some(("=", value.clone())));
                format!("EXISTS ({subquery})")
            }
            Predicate::LacksFact { category, value } => {
                let subquery = self.fact_subquery(category, Some(("=", value.clone())));
                format!("NOT EXISTS ({subquery})")
            }
            Predicate::LacksFactWithPrefix { category, prefix } if prefix.is_empty() => {
                let subquery = self.fact_subquery(category, None);
                format!("NOT EXISTS ({subquery})")
            }
            Predicate::LacksFactWithPrefix { category, prefix } => {
                let pattern = format!("{}%", escape_like(prefix));
                let subquery = self.fact_subquery(category, Some(("LIKE", pattern)));
                format!("NOT EXISTS ({subquery})")
            }
            Predicate::LacksOtherFact { category, value } => {
                let subquery = self.fact_subquery(category, Some(("<>", value.clone())));
                format!("NOT EXISTS ({subquery})")
            }
            Predicate::AttributeEquals { attribute, value } => {
                let placeholder = self.bind_text(value);
                format!(
                    "{WORKER_ALIAS}.{} = {placeholder}",
                    attribute.column(self.workers)
                )
            }
        }
    }

    fn where_clause<'p, I>(&mut self, predicates: I) -> String
    where
        I: IntoIterator<Item = &'p Predicate>,
    {
        let clauses: Vec<String> = predicates
            .into_iter()
            .map(|predicate| self.predicate(predicate))
            .collect();

        if clauses.is_empty() {
            String::new()
        } else {
            format!("\nWHERE {}", clauses.join("\n  AND "))
        }
    }
}

/// Escape `LIKE` metacharacters so a prefix matches literally.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub fn render_select<'p, I>(
    predicates: I,
    page: Page,
    facts: &FactTable,
    workers: &WorkerTable,
) -> RenderedSql
where
    I: IntoIterator<Item = &'p Predicate>,
{
    let mut writer = SqlWriter::new(facts, workers);
    let where_clause = writer.where_clause(predicates);
    let limit = writer.bind(SqlParam::Integer(clamp_i64(page.limit)));
    let offset = writer.bind(SqlParam::Integer(clamp_i64(page.offset)));

    let WorkerTable {
        table,
        id_column,
        display_name_column,
        work_status_column,
    } = *workers;
    let sql = format!(
        "SELECT {w}.{id_column}, {w}.{display_name_column}, {w}.{work_status_column}\nFROM {table} {w}{where_clause}\nORDER BY {w}.{display_name_column}, {w}.{id_column}\nLIMIT {limit} OFFSET {offset}",
        w = WORKER_ALIAS,
    );

    RenderedSql {
        sql,
        params: writer.params,
    }
}

pub fn render_count<'p, I>(predicates: I, facts: &FactTable, workers: &WorkerTable) -> RenderedSql
where
    I: IntoIterator<Item = &'p Predicate>,
{
    let mut writer = SqlWriter::new(facts, workers);
    let where_clause = writer.where_clause(predicates);
    let sql = format!(
        "SELECT COUNT(*)\nFROM {table} {w}{where_clause}",
        table = workers.table,
        w = WORKER_ALIAS,
    );

    RenderedSql {
        sql,
        params: writer.params,
    }
}

fn clamp_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
