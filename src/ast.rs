/// 过滤表达式树, 代表一条完整的过滤语句
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// 逻辑与运算 (and)
    And(Box<FilterExpr>, Box<FilterExpr>),
    /// 逻辑或运算 (or)
    Or(Box<FilterExpr>, Box<FilterExpr>),
    /// 使用括号分组的表达式
    Grouped(Box<FilterExpr>),
    /// 单个字段的比较, 这是表达式的叶子节点, 例如：`level="error"`
    Comparison {
        field: Identifier,
        op: CompOp,
        value: Literal,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(pub String);

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,          // =
    NotEq,       // !=
    Gt,          // >
    Lt,          // <
    Gte,         // >=
    Lte,         // <=
    Contains,    // ~ (不区分大小写)
    NotContains, // !~
}

/// 字面量值
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
}
