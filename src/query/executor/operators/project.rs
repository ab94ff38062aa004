// Projection Operator Implementation
//
// Produces the output rows of a plan: visible columns under their labels,
// in projection order. `SELECT *` returns every bin the record carries,
// joined bins without their qualifier unless the bare name is taken.

use crate::common::types::{PRIMARY_KEY, PRIMARY_KEY_DIGEST};
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Row};
use crate::query::planner::plan::{ColumnRole, QueryPlan};

/// Projection operator that selects specific columns from input rows
pub struct ProjectionOperator {
    input: Box<dyn Operator>,
    /// (row key, label) of the visible columns
    columns: Vec<(String, String)>,
    wildcard: bool,
    /// Row keys and aliases of computed values, never part of `*`
    computed: Vec<String>,
    /// Qualifiers of joined tables
    qualifiers: Vec<String>,
    /// Rows come from a sub-query; a missing column is an error
    strict: bool,
}

impl ProjectionOperator {
    pub fn new(input: Box<dyn Operator>, plan: &QueryPlan) -> Self {
        ProjectionOperator {
            input,
            columns: plan
                .visible_columns()
                .map(|c| (c.source.clone(), c.label.clone()))
                .collect(),
            wildcard: plan.wildcard,
            computed: plan
                .columns
                .iter()
                .filter(|c| matches!(c.role, ColumnRole::Expression | ColumnRole::Aggregated) || c.expr.is_some())
                .flat_map(|c| {
                    let alias = (c.role == ColumnRole::Expression && c.label != c.source).then(|| c.label.clone());
                    std::iter::once(c.source.clone()).chain(alias)
                })
                .collect(),
            qualifiers: plan.joins.iter().map(|j| j.qualifier.clone()).collect(),
            strict: plan.source.is_some(),
        }
    }

    fn project_row(&self, row: Row) -> QueryResult<Row> {
        let mut projected = Row::new();
        if self.wildcard {
            for name in row.columns() {
                if self.computed.contains(name) {
                    continue;
                }
                let bare = self.strip_qualifier(name);
                if bare == PRIMARY_KEY || bare == PRIMARY_KEY_DIGEST {
                    continue;
                }
                let label = if bare.len() != name.len() && (row.contains(bare) || projected.contains(bare)) {
                    name.clone()
                } else {
                    bare.to_string()
                };
                if let Some(value) = row.get(name) {
                    projected.set(label, value.clone());
                }
            }
        }

        for (source, label) in &self.columns {
            if self.wildcard && projected.contains(label) {
                continue;
            }
            let value = match row.get(source) {
                Some(value) => value.clone(),
                None if self.strict => {
                    return Err(QueryError::ProjectionMismatch(format!(
                        "column {} is not returned by the sub-query",
                        source
                    )));
                }
                // Records are schema-less: an absent bin is NULL
                None => DataValue::Null,
            };
            projected.set(label.clone(), value);
        }
        Ok(projected)
    }

    fn strip_qualifier<'a>(&self, name: &'a str) -> &'a str {
        for qualifier in &self.qualifiers {
            if let Some(bare) = name.strip_prefix(qualifier.as_str()).and_then(|rest| rest.strip_prefix('.')) {
                return bare;
            }
        }
        name
    }
}

impl Operator for ProjectionOperator {
    fn init(&mut self) -> QueryResult<()> {
        self.input.init()
    }

    fn next(&mut self) -> QueryResult<Option<Row>> {
        match self.input.next()? {
            Some(row) => Ok(Some(self.project_row(row)?)),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.input.close()
    }
}
