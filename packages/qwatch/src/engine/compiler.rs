use crate::engine::fingerprint;
use crate::engine::lexer::{tokenize, Spanned, Symbol, Token};
use crate::engine::query::{
    Condition, Direction, Operand, Operator, OrderField, OrderSpec, Query, Selection,
    KEY_COLUMN, VALUE_COLUMN,
};
use crate::engine::types::JsonPath;
use crate::error::CompileError;
use smol_str::SmolStr;
use tracing::instrument;

const ONLY_KEY_VALUE: &str = "only $key and $value are supported in SELECT expressions";
const NO_ALIASES: &str = "aliases are not supported in SELECT expressions";

/// Words that may follow the selection list.
const CLAUSE_KEYWORDS: [&str; 6] = ["WHERE", "ORDER", "LIMIT", "GROUP", "HAVING", "FROM"];

/// Compile DSQL text into a [`Query`].
///
/// Grammar:
/// `SELECT $key|$value|$key,$value|* [WHERE cond] [ORDER BY target [ASC|DESC]] [LIMIT n]`
#[instrument(level = "debug", err)]
pub fn compile(text: &str) -> Result<Query, CompileError> {
    let tokens = tokenize(text)?;
    Parser::new(tokens, text.len()).statement()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, end: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.position).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_symbol(&mut self, symbol: Symbol) -> bool {
        if self.peek() == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), CompileError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", keyword)))
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        let found = match self.peek() {
            Some(token) => format!("'{}'", token),
            None => "end of input".to_string(),
        };
        CompileError::syntax(self.position(), format!("{}, found {}", expected, found))
    }

    fn statement(mut self) -> Result<Query, CompileError> {
        match self.peek() {
            Some(t) if t.is_keyword("SELECT") => {
                self.pos += 1;
            }
            Some(Token::Word(w)) => return Err(CompileError::UnsupportedStatement(w.to_uppercase())),
            _ => return Err(self.unexpected("expected SELECT")),
        }

        let selection = self.selection()?;

        let mut condition = None;
        let mut seen_where = false;
        let mut order_by: Option<OrderSpec> = None;
        let mut limit = None;
        let mut seen_limit = false;

        loop {
            let Some(token) = self.peek() else { break };

            if token.is_keyword("GROUP") || token.is_keyword("HAVING") {
                return Err(CompileError::UnsupportedClause);
            } else if token.is_keyword("WHERE") && !seen_where {
                self.pos += 1;
                seen_where = true;
                condition = Some(self.or_expr()?);
            } else if token.is_keyword("ORDER") {
                if order_by.is_some() {
                    return Err(CompileError::MultipleOrderBy);
                }
                self.pos += 1;
                self.expect_keyword("BY")?;
                order_by = Some(self.order_spec()?);
                if self.peek() == Some(&Token::Symbol(Symbol::Comma)) {
                    return Err(CompileError::MultipleOrderBy);
                }
            } else if token.is_keyword("LIMIT") && !seen_limit {
                self.pos += 1;
                seen_limit = true;
                limit = self.limit()?;
            } else if *token == Token::Symbol(Symbol::Semicolon) {
                self.pos += 1;
                if self.peek().is_some() {
                    return Err(self.unexpected("expected end of statement"));
                }
                break;
            } else {
                return Err(self.unexpected("expected WHERE, ORDER BY or LIMIT"));
            }
        }

        let key_pattern = fingerprint::key_pattern(condition.as_ref());
        let fingerprint = fingerprint::generate(condition.as_ref());

        Ok(Query {
            selection,
            condition,
            order_by,
            limit,
            key_pattern,
            fingerprint,
        })
    }

    fn selection(&mut self) -> Result<Selection, CompileError> {
        if self.eat_symbol(Symbol::Star) {
            return Ok(Selection {
                key: true,
                value: true,
            });
        }

        let mut selection = Selection::default();
        let mut count = 0;
        loop {
            match self.advance() {
                Some(Token::Key) => selection.key = true,
                Some(Token::Value) => selection.value = true,
                _ => return Err(CompileError::InvalidSelection(ONLY_KEY_VALUE.to_string())),
            }
            count += 1;
            if count > 2 {
                return Err(CompileError::InvalidSelection(ONLY_KEY_VALUE.to_string()));
            }

            if let Some(Token::Word(w)) = self.peek() {
                if !CLAUSE_KEYWORDS.iter().any(|k| w.eq_ignore_ascii_case(k)) {
                    return Err(CompileError::InvalidSelection(NO_ALIASES.to_string()));
                }
            }

            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        Ok(selection)
    }

    fn or_expr(&mut self) -> Result<Condition, CompileError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Condition::or(left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Condition, CompileError> {
        let mut left = self.primary()?;
        while self.eat_keyword("AND") {
            let right = self.primary()?;
            left = Condition::and(left, right);
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Condition, CompileError> {
        if self.eat_symbol(Symbol::LParen) {
            let inner = self.or_expr()?;
            if !self.eat_symbol(Symbol::RParen) {
                return Err(self.unexpected("expected ')'"));
            }
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Condition, CompileError> {
        let left = self.operand()?;

        let op = match self.peek() {
            Some(Token::Symbol(Symbol::Eq)) => Operator::Eq,
            Some(Token::Symbol(Symbol::Neq)) => Operator::Neq,
            Some(Token::Symbol(Symbol::Lt)) => Operator::Lt,
            Some(Token::Symbol(Symbol::Lte)) => Operator::Lte,
            Some(Token::Symbol(Symbol::Gt)) => Operator::Gt,
            Some(Token::Symbol(Symbol::Gte)) => Operator::Gte,
            Some(t) if t.is_keyword("LIKE") => Operator::Like,
            Some(t) if t.is_keyword("NOT") => {
                self.pos += 1;
                if !self.peek().is_some_and(|t| t.is_keyword("LIKE")) {
                    return Err(self.unexpected("expected LIKE"));
                }
                Operator::NotLike
            }
            Some(t) if t.is_keyword("IS") => {
                self.pos += 1;
                let op = if self.eat_keyword("NOT") {
                    Operator::IsNotNull
                } else {
                    Operator::IsNull
                };
                self.expect_keyword("NULL")?;
                return Ok(Condition::compare(left, op, Operand::Null));
            }
            _ => return Err(self.unexpected("expected comparison operator")),
        };
        self.pos += 1;

        let right = self.operand()?;
        Ok(Condition::compare(left, op, right))
    }

    fn operand(&mut self) -> Result<Operand, CompileError> {
        let position = self.position();
        let token = match self.advance() {
            Some(token) => token,
            None => return Err(CompileError::syntax(position, "expected operand, found end of input")),
        };

        match token {
            Token::Key => Ok(Operand::Key),
            Token::Value => Ok(Operand::Value),
            Token::ValuePath(raw) => json_path(&raw).map(Operand::JsonPath),
            // Quoted references are accepted, e.g. '$value.age'
            Token::Str(s) | Token::Quoted(s) => match reference(&s)? {
                Some(OrderField::Key) => Ok(Operand::Key),
                Some(OrderField::Value) => Ok(Operand::Value),
                Some(OrderField::JsonPath(path)) => Ok(Operand::JsonPath(path)),
                None => Ok(Operand::Str(s)),
            },
            Token::Number(n) => {
                if let Ok(i) = n.parse::<i64>() {
                    Ok(Operand::Int(i))
                } else if let Ok(f) = n.parse::<f64>() {
                    Ok(Operand::Float(f))
                } else {
                    Err(CompileError::syntax(position, format!("invalid number '{}'", n)))
                }
            }
            Token::Word(w) if w.eq_ignore_ascii_case("TRUE") => Ok(Operand::Bool(true)),
            Token::Word(w) if w.eq_ignore_ascii_case("FALSE") => Ok(Operand::Bool(false)),
            Token::Word(w) if w.eq_ignore_ascii_case("NULL") => Ok(Operand::Null),
            Token::Word(w) => Err(CompileError::syntax(position, format!("unknown column '{}'", w))),
            other => Err(CompileError::syntax(
                position,
                format!("expected operand, found '{}'", other),
            )),
        }
    }

    fn order_spec(&mut self) -> Result<OrderSpec, CompileError> {
        let field = match self.advance() {
            Some(Token::Key) => OrderField::Key,
            Some(Token::Value) => OrderField::Value,
            Some(Token::ValuePath(raw)) => OrderField::JsonPath(json_path(&raw)?),
            Some(Token::Str(s)) | Some(Token::Quoted(s)) => {
                reference(&s)?.ok_or(CompileError::InvalidOrderBy)?
            }
            _ => return Err(CompileError::InvalidOrderBy),
        };

        let direction = if self.eat_keyword("DESC") {
            Direction::Desc
        } else {
            self.eat_keyword("ASC");
            Direction::Asc
        };

        Ok(OrderSpec { field, direction })
    }

    /// `LIMIT 0` means no limit.
    fn limit(&mut self) -> Result<Option<usize>, CompileError> {
        match self.advance() {
            Some(Token::Number(n)) => {
                let limit = n
                    .parse::<usize>()
                    .map_err(|_| CompileError::InvalidLimit(n.to_string()))?;
                Ok((limit > 0).then_some(limit))
            }
            Some(other) => Err(CompileError::InvalidLimit(other.to_string())),
            None => Err(CompileError::InvalidLimit(String::new())),
        }
    }
}

fn json_path(raw: &str) -> Result<JsonPath, CompileError> {
    JsonPath::parse(raw).ok_or_else(|| CompileError::InvalidJsonPath(raw.to_string()))
}

/// Interpret quoted text as a pseudo-column reference, if it is one.
fn reference(s: &SmolStr) -> Result<Option<OrderField>, CompileError> {
    if s == KEY_COLUMN {
        return Ok(Some(OrderField::Key));
    }
    if s == VALUE_COLUMN {
        return Ok(Some(OrderField::Value));
    }
    match s.strip_prefix(VALUE_COLUMN).and_then(|rest| rest.strip_prefix('.')) {
        Some(raw) => json_path(raw).map(|p| Some(OrderField::JsonPath(p))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod compiler_tests {
    use super::*;

    #[test]
    fn test_compile_full_query() {
        let q = compile("SELECT $key, $value WHERE $key LIKE 'k*' AND $value > 10 ORDER BY $value DESC LIMIT 5")
            .unwrap();
        assert_eq!(q.selection, Selection { key: true, value: true });
        assert_eq!(
            q.condition,
            Some(Condition::and(
                Condition::compare(Operand::Key, Operator::Like, Operand::Str("k*".into())),
                Condition::compare(Operand::Value, Operator::Gt, Operand::Int(10)),
            ))
        );
        assert_eq!(
            q.order_by,
            Some(OrderSpec { field: OrderField::Value, direction: Direction::Desc })
        );
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.key_pattern, "k*");
        assert!(q.fingerprint.starts_with("f_"));
    }

    #[test]
    fn test_compile_star_and_lowercase_keywords() {
        let q = compile("select * where $value = 'x' order by $key limit 2;").unwrap();
        assert_eq!(q.selection, Selection { key: true, value: true });
        assert_eq!(q.order_by.unwrap().direction, Direction::Asc);
        assert_eq!(q.key_pattern, "*");
    }

    #[test]
    fn test_compile_operator_variants() {
        let q = compile("SELECT $key WHERE $value <> 1 OR $value != 2.5 OR $key NOT LIKE 'a?'").unwrap();
        assert_eq!(
            q.to_string(),
            "SELECT $key WHERE $value != 1 OR $value != 2.5 OR $key NOT LIKE 'a?'"
        );
    }

    #[test]
    fn test_compile_is_null() {
        let q = compile("SELECT $key WHERE $value.age IS NULL OR $value.name IS NOT NULL").unwrap();
        assert_eq!(
            q.to_string(),
            "SELECT $key WHERE $value.age IS NULL OR $value.name IS NOT NULL"
        );
    }

    #[test]
    fn test_compile_quoted_json_path_matches_unquoted() {
        let quoted = compile("SELECT $key WHERE '$value.age' > 18 ORDER BY `$value.age`").unwrap();
        let bare = compile("SELECT $key WHERE $value.age > 18 ORDER BY $value.age").unwrap();
        assert_eq!(quoted.condition, bare.condition);
        assert_eq!(quoted.order_by, bare.order_by);
        assert_eq!(quoted.to_string(), bare.to_string());
        assert_eq!(quoted.fingerprint, bare.fingerprint);
    }

    #[test]
    fn test_compile_parentheses_round_trip() {
        let q = compile("SELECT $value WHERE ($value > 10 OR $value < 5) AND $key LIKE 'n*'").unwrap();
        assert_eq!(
            q.to_string(),
            "SELECT $value WHERE ($value > 10 OR $value < 5) AND $key LIKE 'n*'"
        );
        assert_eq!(compile(&q.to_string()).unwrap(), q);
    }

    #[test]
    fn test_compile_rejects_non_select() {
        assert_eq!(
            compile("DELETE FROM x"),
            Err(CompileError::UnsupportedStatement("DELETE".into()))
        );
    }

    #[test]
    fn test_compile_rejects_invalid_selection() {
        let err = compile("SELECT field1, field2 WHERE $key = 'a'").unwrap_err();
        assert_eq!(
            err.to_string(),
            "only $key and $value are supported in SELECT expressions"
        );
        assert!(matches!(
            compile("SELECT $key, $value, $key"),
            Err(CompileError::InvalidSelection(_))
        ));
        assert_eq!(
            compile("SELECT $key AS k"),
            Err(CompileError::InvalidSelection(NO_ALIASES.into()))
        );
    }

    #[test]
    fn test_compile_rejects_group_by_and_having() {
        let err = compile("SELECT $key WHERE $value > 1 GROUP BY $value").unwrap_err();
        assert_eq!(err.to_string(), "HAVING and GROUP BY clauses are not supported");
        assert_eq!(
            compile("SELECT $key HAVING $value > 1"),
            Err(CompileError::UnsupportedClause)
        );
    }

    #[test]
    fn test_compile_rejects_multiple_order_by() {
        assert_eq!(
            compile("SELECT $key ORDER BY $key, $value"),
            Err(CompileError::MultipleOrderBy)
        );
        assert_eq!(
            compile("SELECT $key ORDER BY $key ORDER BY $value"),
            Err(CompileError::MultipleOrderBy)
        );
    }

    #[test]
    fn test_compile_rejects_bad_order_target() {
        assert_eq!(compile("SELECT $key ORDER BY age"), Err(CompileError::InvalidOrderBy));
        assert_eq!(compile("SELECT $key ORDER BY 'name'"), Err(CompileError::InvalidOrderBy));
    }

    #[test]
    fn test_compile_rejects_bad_limit() {
        assert!(matches!(compile("SELECT $key LIMIT -1"), Err(CompileError::InvalidLimit(_))));
        assert!(matches!(compile("SELECT $key LIMIT 2.5"), Err(CompileError::InvalidLimit(_))));
        assert!(matches!(compile("SELECT $key LIMIT ten"), Err(CompileError::InvalidLimit(_))));
        assert_eq!(compile("SELECT $key LIMIT 0").unwrap().limit, None);
    }

    #[test]
    fn test_compile_reports_syntax_position() {
        assert_eq!(
            compile("SELECT $key WHERE $value >"),
            Err(CompileError::syntax(26, "expected operand, found end of input"))
        );
        assert!(matches!(
            compile("SELECT $key WHERE ($value > 1"),
            Err(CompileError::Syntax { position: 29, .. })
        ));
        assert!(matches!(
            compile("SELECT $key WHERE $value.a..b = 1"),
            Err(CompileError::InvalidJsonPath(_))
        ));
    }

    #[test]
    fn test_compile_float_literal_kept_distinct() {
        let int = compile("SELECT $key WHERE $value = 10").unwrap();
        let float = compile("SELECT $key WHERE $value = 10.0").unwrap();
        assert_ne!(int.fingerprint, float.fingerprint);
        assert_eq!(float.to_string(), "SELECT $key WHERE $value = 10.0");
    }
}
