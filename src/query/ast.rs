// Statement Tree
//
// The tree produced by the SQL front end. Expression nodes live in an arena
// owned by the statement and refer to each other through `ExprId` handles.

use std::fmt;

use crate::common::types::{PRIMARY_KEY, PRIMARY_KEY_DIGEST};

/// Handle of an expression node inside an `ExprArena`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

impl ExprId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOperator::Plus
                | BinaryOperator::Minus
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Minus,
    Not,
}

/// Column reference, optionally qualified by a table name or alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn is_primary_key(&self) -> bool {
        self.name == PRIMARY_KEY
    }

    pub fn is_digest(&self) -> bool {
        self.name == PRIMARY_KEY_DIGEST
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Column(ColumnRef),
    /// Positional parameter, numbered from 1
    Placeholder(usize),
    BinaryOp {
        left: ExprId,
        op: BinaryOperator,
        right: ExprId,
    },
    Unary {
        op: UnaryOperator,
        expr: ExprId,
    },
    IsNull {
        expr: ExprId,
        negated: bool,
    },
    Between {
        expr: ExprId,
        low: ExprId,
        high: ExprId,
        negated: bool,
    },
    InList {
        expr: ExprId,
        list: Vec<ExprId>,
        negated: bool,
    },
    InSubquery {
        expr: ExprId,
        subquery: Box<Query>,
        negated: bool,
    },
    Subquery(Box<Query>),
    Function {
        name: String,
        args: Vec<ExprId>,
        distinct: bool,
    },
    /// `*` inside a function call such as `count(*)`
    Wildcard,
    Parenthesis(ExprId),
    Array(Vec<ExprId>),
    /// Bracket access such as `tags[0]`
    FieldAccess {
        expr: ExprId,
        key: ExprId,
    },
}

/// Arena holding every expression node of one statement
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        self.nodes.push(expr);
        ExprId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn column(&mut self, name: &str) -> ExprId {
        self.alloc(Expr::Column(ColumnRef {
            table: None,
            name: name.to_string(),
        }))
    }

    pub fn qualified(&mut self, table: &str, name: &str) -> ExprId {
        self.alloc(Expr::Column(ColumnRef {
            table: Some(table.to_string()),
            name: name.to_string(),
        }))
    }

    pub fn int(&mut self, value: i64) -> ExprId {
        self.alloc(Expr::Literal(Literal::Integer(value)))
    }

    pub fn float(&mut self, value: f64) -> ExprId {
        self.alloc(Expr::Literal(Literal::Float(value)))
    }

    pub fn string(&mut self, value: &str) -> ExprId {
        self.alloc(Expr::Literal(Literal::String(value.to_string())))
    }

    pub fn null(&mut self) -> ExprId {
        self.alloc(Expr::Literal(Literal::Null))
    }

    pub fn placeholder(&mut self, index: usize) -> ExprId {
        self.alloc(Expr::Placeholder(index))
    }

    pub fn binary(&mut self, left: ExprId, op: BinaryOperator, right: ExprId) -> ExprId {
        self.alloc(Expr::BinaryOp { left, op, right })
    }

    pub fn eq(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(left, BinaryOperator::Eq, right)
    }

    pub fn and(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(left, BinaryOperator::And, right)
    }

    pub fn or(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.binary(left, BinaryOperator::Or, right)
    }

    pub fn between(&mut self, expr: ExprId, low: ExprId, high: ExprId) -> ExprId {
        self.alloc(Expr::Between {
            expr,
            low,
            high,
            negated: false,
        })
    }

    pub fn in_list(&mut self, expr: ExprId, list: Vec<ExprId>) -> ExprId {
        self.alloc(Expr::InList {
            expr,
            list,
            negated: false,
        })
    }

    pub fn in_subquery(&mut self, expr: ExprId, subquery: Query) -> ExprId {
        self.alloc(Expr::InSubquery {
            expr,
            subquery: Box::new(subquery),
            negated: false,
        })
    }

    pub fn function(&mut self, name: &str, args: Vec<ExprId>) -> ExprId {
        self.alloc(Expr::Function {
            name: name.to_string(),
            args,
            distinct: false,
        })
    }

    pub fn count_star(&mut self) -> ExprId {
        let star = self.alloc(Expr::Wildcard);
        self.function("count", vec![star])
    }

    pub fn paren(&mut self, inner: ExprId) -> ExprId {
        self.alloc(Expr::Parenthesis(inner))
    }

    /// Strip any number of enclosing parentheses
    pub fn unwrap_parens(&self, mut id: ExprId) -> ExprId {
        while let Expr::Parenthesis(inner) = self.get(id) {
            id = *inner;
        }
        id
    }

    /// Every column referenced below `id`, in first-seen order without duplicates.
    /// Sub-query bodies are not entered.
    pub fn referenced_columns(&self, id: ExprId) -> Vec<ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(id, &mut out);
        out
    }

    fn collect_columns(&self, id: ExprId, out: &mut Vec<ColumnRef>) {
        match self.get(id) {
            Expr::Column(col) => {
                if !out.contains(col) {
                    out.push(col.clone());
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                self.collect_columns(*left, out);
                self.collect_columns(*right, out);
            }
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Parenthesis(expr) => {
                self.collect_columns(*expr, out)
            }
            Expr::Between { expr, low, high, .. } => {
                self.collect_columns(*expr, out);
                self.collect_columns(*low, out);
                self.collect_columns(*high, out);
            }
            Expr::InList { expr, list, .. } => {
                self.collect_columns(*expr, out);
                for item in list {
                    self.collect_columns(*item, out);
                }
            }
            Expr::InSubquery { expr, .. } => self.collect_columns(*expr, out),
            Expr::Function { args, .. } | Expr::Array(args) => {
                for arg in args {
                    self.collect_columns(*arg, out);
                }
            }
            Expr::FieldAccess { expr, key } => {
                self.collect_columns(*expr, out);
                self.collect_columns(*key, out);
            }
            Expr::Literal(_) | Expr::Placeholder(_) | Expr::Subquery(_) | Expr::Wildcard => {}
        }
    }

    /// Whether any node below `id` satisfies `pred`. Sub-query bodies are not entered.
    pub fn any(&self, id: ExprId, pred: &dyn Fn(&Expr) -> bool) -> bool {
        let node = self.get(id);
        if pred(node) {
            return true;
        }
        match node {
            Expr::BinaryOp { left, right, .. } => self.any(*left, pred) || self.any(*right, pred),
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Parenthesis(expr) => {
                self.any(*expr, pred)
            }
            Expr::Between { expr, low, high, .. } => {
                self.any(*expr, pred) || self.any(*low, pred) || self.any(*high, pred)
            }
            Expr::InList { expr, list, .. } => {
                self.any(*expr, pred) || list.iter().any(|item| self.any(*item, pred))
            }
            Expr::InSubquery { expr, .. } => self.any(*expr, pred),
            Expr::Function { args, .. } | Expr::Array(args) => args.iter().any(|arg| self.any(*arg, pred)),
            Expr::FieldAccess { expr, key } => self.any(*expr, pred) || self.any(*key, pred),
            Expr::Literal(_) | Expr::Placeholder(_) | Expr::Subquery(_) | Expr::Column(_) | Expr::Wildcard => {
                false
            }
        }
    }

    /// Highest placeholder index used below `id`, sub-queries included
    pub fn max_placeholder(&self, id: ExprId) -> usize {
        match self.get(id) {
            Expr::Placeholder(index) => *index,
            Expr::BinaryOp { left, right, .. } => self.max_placeholder(*left).max(self.max_placeholder(*right)),
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Parenthesis(expr) => {
                self.max_placeholder(*expr)
            }
            Expr::Between { expr, low, high, .. } => self
                .max_placeholder(*expr)
                .max(self.max_placeholder(*low))
                .max(self.max_placeholder(*high)),
            Expr::InList { expr, list, .. } => list
                .iter()
                .map(|item| self.max_placeholder(*item))
                .fold(self.max_placeholder(*expr), usize::max),
            Expr::InSubquery { expr, subquery, .. } => {
                self.max_placeholder(*expr).max(self.query_max_placeholder(subquery))
            }
            Expr::Subquery(subquery) => self.query_max_placeholder(subquery),
            Expr::Function { args, .. } | Expr::Array(args) => {
                args.iter().map(|arg| self.max_placeholder(*arg)).max().unwrap_or(0)
            }
            Expr::FieldAccess { expr, key } => self.max_placeholder(*expr).max(self.max_placeholder(*key)),
            Expr::Literal(_) | Expr::Column(_) | Expr::Wildcard => 0,
        }
    }

    /// Highest placeholder index used anywhere in `query`
    pub fn query_max_placeholder(&self, query: &Query) -> usize {
        let mut ids = Vec::new();
        query.body.collect_expressions(&mut ids);
        for item in &query.order_by {
            ids.push(item.expr);
        }
        ids.extend(query.limit);
        ids.extend(query.offset);
        let mut max = ids.iter().map(|id| self.max_placeholder(*id)).max().unwrap_or(0);
        query.body.for_each_derived(&mut |inner| max = max.max(self.query_max_placeholder(inner)));
        max
    }

    /// Render an expression back to SQL text
    pub fn render(&self, id: ExprId) -> String {
        match self.get(id) {
            Expr::Literal(Literal::Integer(i)) => i.to_string(),
            Expr::Literal(Literal::Float(f)) => f.to_string(),
            Expr::Literal(Literal::String(s)) => format!("'{}'", s.replace('\'', "''")),
            Expr::Literal(Literal::Boolean(b)) => if *b { "true" } else { "false" }.to_string(),
            Expr::Literal(Literal::Null) => "NULL".to_string(),
            Expr::Column(col) => col.to_string(),
            Expr::Placeholder(_) => "?".to_string(),
            Expr::BinaryOp { left, op, right } => {
                format!("{} {} {}", self.render(*left), op.symbol(), self.render(*right))
            }
            Expr::Unary { op: UnaryOperator::Minus, expr } => format!("-{}", self.render(*expr)),
            Expr::Unary { op: UnaryOperator::Not, expr } => format!("NOT {}", self.render(*expr)),
            Expr::IsNull { expr, negated } => {
                let not = if *negated { " NOT" } else { "" };
                format!("{} IS{} NULL", self.render(*expr), not)
            }
            Expr::Between { expr, low, high, negated } => {
                let not = if *negated { " NOT" } else { "" };
                format!(
                    "{}{} BETWEEN {} AND {}",
                    self.render(*expr),
                    not,
                    self.render(*low),
                    self.render(*high)
                )
            }
            Expr::InList { expr, list, negated } => {
                let not = if *negated { " NOT" } else { "" };
                let items: Vec<String> = list.iter().map(|item| self.render(*item)).collect();
                format!("{}{} IN ({})", self.render(*expr), not, items.join(", "))
            }
            Expr::InSubquery { expr, negated, .. } => {
                let not = if *negated { " NOT" } else { "" };
                format!("{}{} IN (SELECT ...)", self.render(*expr), not)
            }
            Expr::Subquery(_) => "(SELECT ...)".to_string(),
            Expr::Function { name, args, distinct } => {
                let args: Vec<String> = args.iter().map(|arg| self.render(*arg)).collect();
                let distinct = if *distinct { "distinct " } else { "" };
                format!("{}({}{})", name, distinct, args.join(", "))
            }
            Expr::Wildcard => "*".to_string(),
            Expr::Parenthesis(inner) => format!("({})", self.render(*inner)),
            Expr::Array(items) => {
                let items: Vec<String> = items.iter().map(|item| self.render(*item)).collect();
                format!("[{}]", items.join(", "))
            }
            Expr::FieldAccess { expr, key } => format!("{}[{}]", self.render(*expr), self.render(*key)),
        }
    }
}

/// Possibly schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    pub schema: Option<String>,
    pub name: String,
}

impl ObjectName {
    pub fn new(name: &str) -> Self {
        ObjectName {
            schema: None,
            name: name.to_string(),
        }
    }

    pub fn qualified(schema: &str, name: &str) -> Self {
        ObjectName {
            schema: Some(schema.to_string()),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableFactor {
    Table {
        name: ObjectName,
        alias: Option<String>,
    },
    Derived {
        subquery: Box<Query>,
        alias: Option<String>,
    },
}

impl TableFactor {
    pub fn table(name: &str) -> Self {
        TableFactor::Table {
            name: ObjectName::new(name),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        TableFactor::Table {
            name: ObjectName::new(name),
            alias: Some(alias.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub relation: TableFactor,
    pub kind: JoinKind,
    pub constraint: Option<ExprId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    Expr { expr: ExprId, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: ExprId,
    pub asc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: TableFactor,
    pub joins: Vec<Join>,
    pub selection: Option<ExprId>,
    pub group_by: Vec<ExprId>,
    pub having: Option<ExprId>,
}

impl Select {
    pub fn new(from: TableFactor) -> Self {
        Select {
            distinct: false,
            projection: Vec::new(),
            from,
            joins: Vec::new(),
            selection: None,
            group_by: Vec::new(),
            having: None,
        }
    }

    fn collect_expressions(&self, out: &mut Vec<ExprId>) {
        for item in &self.projection {
            if let SelectItem::Expr { expr, .. } = item {
                out.push(*expr);
            }
        }
        out.extend(self.joins.iter().filter_map(|join| join.constraint));
        out.extend(self.selection);
        out.extend(self.group_by.iter().copied());
        out.extend(self.having);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    UnionAll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetExpr {
    Select(Box<Select>),
    SetOperation {
        op: SetOperator,
        left: Box<SetExpr>,
        right: Box<SetExpr>,
    },
}

impl SetExpr {
    fn collect_expressions(&self, out: &mut Vec<ExprId>) {
        match self {
            SetExpr::Select(select) => select.collect_expressions(out),
            SetExpr::SetOperation { left, right, .. } => {
                left.collect_expressions(out);
                right.collect_expressions(out);
            }
        }
    }

    fn for_each_derived(&self, visit: &mut dyn FnMut(&Query)) {
        match self {
            SetExpr::Select(select) => {
                if let TableFactor::Derived { subquery, .. } = &select.from {
                    visit(subquery);
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                left.for_each_derived(visit);
                right.for_each_derived(visit);
            }
        }
    }
}

/// A query body with its trailing ORDER BY / LIMIT / OFFSET
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub body: SetExpr,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<ExprId>,
    pub offset: Option<ExprId>,
}

impl Query {
    pub fn select(select: Select) -> Self {
        Query {
            body: SetExpr::Select(Box::new(select)),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn set_operation(left: Query, op: SetOperator, right: Query) -> Self {
        Query {
            body: SetExpr::SetOperation {
                op,
                left: Box::new(left.body),
                right: Box::new(right.body),
            },
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Numeric,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: ObjectName,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ExprId>>,
    pub ignore: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: ObjectName,
    pub assignments: Vec<(String, ExprId)>,
    pub selection: Option<ExprId>,
    pub limit: Option<ExprId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: ObjectName,
    pub selection: Option<ExprId>,
    pub limit: Option<ExprId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    pub name: String,
    pub table: ObjectName,
    pub column: String,
    pub index_type: IndexType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Box<Query>),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Truncate { table: ObjectName },
    CreateIndex(CreateIndex),
    DropIndex { name: String, table: ObjectName },
}

/// A statement together with the arena its expressions live in
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub arena: ExprArena,
    pub statement: Statement,
}

impl ParsedStatement {
    pub fn new(arena: ExprArena, statement: Statement) -> Self {
        ParsedStatement { arena, statement }
    }

    pub fn query(arena: ExprArena, query: Query) -> Self {
        ParsedStatement {
            arena,
            statement: Statement::Query(Box::new(query)),
        }
    }
}
