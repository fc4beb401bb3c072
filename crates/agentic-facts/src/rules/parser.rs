//! Rule language parser — hand-written tokenizer and recursive descent.
//!
//! Grammar:
//! ```text
//! program   := clause*
//! clause    := decl | atom [":-" literal ("," literal)*] "."
//! decl      := "Decl" IDENT "(" [field ("," field)*] ")" "."
//! field     := [IDENT ":"] TYPE
//! literal   := atom | ("not" | "!") atom | expr OP expr | VAR "=" AGG ["(" VAR ")"] "{" atom ("," atom)* "}"
//! expr      := mul (("+" | "-") mul)*
//! mul       := primary (("*" | "/" | "%") primary)*
//! primary   := term | "(" expr ")"
//! atom      := IDENT ["(" [term ("," term)*] ")"]
//! term      := VAR | "_" | STRING | NUMBER | "/"IDENT | true | false | list | map
//! ```
//!
//! `#` starts a comment running to the end of the line.

use std::collections::BTreeMap;

use crate::rules::ast::{
    AggFunc, Aggregate, ArithOp, Atom, CmpOp, Decl, Expr, FieldDecl, Literal, Program, Rule,
    Term, ValueType,
};
use crate::types::ParseError;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Var(String),
    Wildcard,
    Str(String),
    Int(i64),
    Float(f64),
    AtomLit(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Implies,
    Bang,
    Cmp(CmpOp),
    Arith(ArithOp),
    Eof,
}

impl Token {
    /// Tokens after which `/` and `-` are binary operators.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Var(_)
                | Token::Int(_)
                | Token::Float(_)
                | Token::Str(_)
                | Token::AtomLit(_)
                | Token::RParen
                | Token::RBracket
        )
    }

    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier `{s}`"),
            Token::Var(s) => format!("variable `{s}`"),
            Token::Wildcard => "`_`".to_string(),
            Token::Str(s) => format!("string {s:?}"),
            Token::Int(i) => format!("number {i}"),
            Token::Float(f) => format!("number {f}"),
            Token::AtomLit(a) => format!("atom `/{a}`"),
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
            Token::LBracket => "`[`".to_string(),
            Token::RBracket => "`]`".to_string(),
            Token::LBrace => "`{`".to_string(),
            Token::RBrace => "`}`".to_string(),
            Token::Comma => "`,`".to_string(),
            Token::Dot => "`.`".to_string(),
            Token::Colon => "`:`".to_string(),
            Token::Implies => "`:-`".to_string(),
            Token::Bang => "`!`".to_string(),
            Token::Cmp(op) => format!("`{}`", op.symbol()),
            Token::Arith(_) => "arithmetic operator".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
    column: usize,
}

/// Parse a program: declarations, rules, and ground facts.
pub fn parse_program(text: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(text)?;
    let mut pos = 0;
    let mut program = Program::default();

    while !matches!(tokens[pos].token, Token::Eof) {
        if matches!(&tokens[pos].token, Token::Ident(kw) if kw == "Decl") {
            pos += 1;
            program.decls.push(parse_decl(&tokens, &mut pos)?);
        } else {
            program.rules.push(parse_rule(&tokens, &mut pos)?);
        }
    }

    Ok(program)
}

/// Parse a query pattern: one atom with an optional trailing `.`.
pub fn parse_query(text: &str) -> Result<Atom, ParseError> {
    let tokens = tokenize(text)?;
    let mut pos = 0;
    if matches!(tokens[pos].token, Token::Eof) {
        return Err(error_at(&tokens[pos], "empty query".to_string()));
    }
    let atom = parse_atom(&tokens, &mut pos)?;
    if matches!(tokens[pos].token, Token::Dot) {
        pos += 1;
    }
    if !matches!(tokens[pos].token, Token::Eof) {
        return Err(unexpected(&tokens[pos], "end of query"));
    }
    Ok(atom)
}

// ── Tokenizer ──

fn tokenize(input: &str) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut line_start = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i - line_start + 1;

        if c == '\n' {
            i += 1;
            line += 1;
            line_start = i;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comment
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let after_operand = tokens.last().is_some_and(|t| t.token.ends_operand());
        let mut push = |token: Token| {
            tokens.push(Spanned {
                token,
                line,
                column,
            })
        };

        // String literal
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                match chars.get(i) {
                    None | Some('\n') => {
                        return Err(ParseError {
                            line,
                            column,
                            message: "unterminated string literal".to_string(),
                        })
                    }
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = match chars.get(i + 1) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some('r') => '\r',
                            Some(&other) => other,
                            None => '\\',
                        };
                        s.push(escaped);
                        i += 2;
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            push(Token::Str(s));
            continue;
        }

        // Number, with a leading minus only where an operand is expected
        let negative = c == '-'
            && !after_operand
            && chars.get(i + 1).is_some_and(|ch| ch.is_ascii_digit());
        if c.is_ascii_digit() || negative {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_float = false;
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                is_float = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    is_float = true;
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let token = if is_float {
                text.parse().map(Token::Float).ok()
            } else {
                text.parse().map(Token::Int).ok()
            };
            match token {
                Some(t) => push(t),
                None => {
                    return Err(ParseError {
                        line,
                        column,
                        message: format!("invalid number: {text}"),
                    })
                }
            }
            continue;
        }

        // Atom literal `/name`
        if c == '/'
            && !after_operand
            && chars.get(i + 1).is_some_and(|ch| ch.is_alphabetic())
        {
            i += 1;
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            push(Token::AtomLit(chars[start..i].iter().collect()));
            continue;
        }

        // Identifier, variable, or wildcard
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if word == "_" {
                push(Token::Wildcard);
            } else if c == '_' || (c.is_uppercase() && word != "Decl") {
                push(Token::Var(word));
            } else {
                push(Token::Ident(word));
            }
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            (':', Some('-')) => (Token::Implies, 2),
            (':', _) => (Token::Colon, 1),
            ('!', Some('=')) => (Token::Cmp(CmpOp::Ne), 2),
            ('!', _) => (Token::Bang, 1),
            ('<', Some('=')) => (Token::Cmp(CmpOp::Le), 2),
            ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
            ('>', Some('=')) => (Token::Cmp(CmpOp::Ge), 2),
            ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
            ('=', Some('=')) => (Token::Cmp(CmpOp::Eq), 2),
            ('=', _) => (Token::Cmp(CmpOp::Eq), 1),
            ('+', _) => (Token::Arith(ArithOp::Add), 1),
            ('-', _) => (Token::Arith(ArithOp::Sub), 1),
            ('*', _) => (Token::Arith(ArithOp::Mul), 1),
            ('/', _) => (Token::Arith(ArithOp::Div), 1),
            ('%', _) => (Token::Arith(ArithOp::Mod), 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            _ => {
                return Err(ParseError {
                    line,
                    column,
                    message: format!("unexpected character '{c}'"),
                })
            }
        };
        push(token);
        i += width;
    }

    let column = chars.len() - line_start + 1;
    tokens.push(Spanned {
        token: Token::Eof,
        line,
        column,
    });
    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ── Parser helpers ──

/// Deepest bracket or parenthesis nesting accepted in a constant or expression.
pub const MAX_NESTING: usize = 64;

fn check_depth(at: &Spanned, depth: usize) -> Result<(), ParseError> {
    if depth > MAX_NESTING {
        return Err(error_at(
            at,
            format!("nesting deeper than {MAX_NESTING} levels"),
        ));
    }
    Ok(())
}

fn error_at(at: &Spanned, message: String) -> ParseError {
    ParseError {
        line: at.line,
        column: at.column,
        message,
    }
}

fn unexpected(at: &Spanned, expected: &str) -> ParseError {
    error_at(
        at,
        format!("expected {expected}, found {}", at.token.describe()),
    )
}

fn expect(tokens: &[Spanned], pos: &mut usize, token: Token, what: &str) -> Result<(), ParseError> {
    if tokens[*pos].token == token {
        *pos += 1;
        Ok(())
    } else {
        Err(unexpected(&tokens[*pos], what))
    }
}

fn eat(tokens: &[Spanned], pos: &mut usize, token: &Token) -> bool {
    if &tokens[*pos].token == token {
        *pos += 1;
        true
    } else {
        false
    }
}

// ── Clauses ──

fn parse_decl(tokens: &[Spanned], pos: &mut usize) -> Result<Decl, ParseError> {
    let predicate = match &tokens[*pos].token {
        Token::Ident(name) => name.clone(),
        _ => return Err(unexpected(&tokens[*pos], "predicate name after `Decl`")),
    };
    *pos += 1;
    expect(tokens, pos, Token::LParen, "`(`")?;

    let mut fields = Vec::new();
    if !eat(tokens, pos, &Token::RParen) {
        loop {
            fields.push(parse_field(tokens, pos)?);
            if eat(tokens, pos, &Token::Comma) {
                continue;
            }
            expect(tokens, pos, Token::RParen, "`,` or `)`")?;
            break;
        }
    }
    expect(tokens, pos, Token::Dot, "`.` after declaration")?;
    Ok(Decl { predicate, fields })
}

fn parse_field(tokens: &[Spanned], pos: &mut usize) -> Result<FieldDecl, ParseError> {
    let at = &tokens[*pos];
    let first = match &at.token {
        Token::Ident(s) | Token::Var(s) => s.clone(),
        _ => return Err(unexpected(at, "field name or type")),
    };
    *pos += 1;

    let (name, type_at, type_name) = if eat(tokens, pos, &Token::Colon) {
        let type_at = &tokens[*pos];
        let type_name = match &type_at.token {
            Token::Ident(s) => s.clone(),
            _ => return Err(unexpected(type_at, "field type")),
        };
        *pos += 1;
        (Some(first), type_at, type_name)
    } else {
        (None, at, first)
    };

    let ty = ValueType::from_name(&type_name)
        .ok_or_else(|| error_at(type_at, format!("unknown field type `{type_name}`")))?;
    Ok(FieldDecl { name, ty })
}

fn parse_rule(tokens: &[Spanned], pos: &mut usize) -> Result<Rule, ParseError> {
    let head = parse_atom(tokens, pos)?;
    let mut body = Vec::new();
    if eat(tokens, pos, &Token::Implies) {
        loop {
            body.push(parse_literal(tokens, pos)?);
            if !eat(tokens, pos, &Token::Comma) {
                break;
            }
        }
    }
    expect(tokens, pos, Token::Dot, "`.` at end of clause")?;
    Ok(Rule { head, body })
}

fn parse_literal(tokens: &[Spanned], pos: &mut usize) -> Result<Literal, ParseError> {
    match &tokens[*pos].token {
        Token::Bang => {
            *pos += 1;
            Ok(Literal::Negative(parse_atom(tokens, pos)?))
        }
        Token::Ident(kw) if kw == "not" && matches!(tokens[*pos + 1].token, Token::Ident(_)) => {
            *pos += 1;
            Ok(Literal::Negative(parse_atom(tokens, pos)?))
        }
        Token::Ident(name) if name != "true" && name != "false" => {
            Ok(Literal::Positive(parse_atom(tokens, pos)?))
        }
        Token::Var(result) if is_aggregate_start(tokens, *pos) => {
            let result = result.clone();
            *pos += 2;
            parse_aggregate(result, tokens, pos).map(Literal::Aggregate)
        }
        _ => {
            let lhs = parse_expr(tokens, pos, 0)?;
            let op = match &tokens[*pos].token {
                Token::Cmp(op) => *op,
                _ => return Err(unexpected(&tokens[*pos], "comparison operator")),
            };
            *pos += 1;
            let rhs = parse_expr(tokens, pos, 0)?;
            Ok(Literal::Compare { op, lhs, rhs })
        }
    }
}

/// `VAR = count{` or `VAR = sum(`.
fn is_aggregate_start(tokens: &[Spanned], pos: usize) -> bool {
    let is_eq = matches!(tokens.get(pos + 1).map(|t| &t.token), Some(Token::Cmp(CmpOp::Eq)));
    let is_agg = matches!(
        tokens.get(pos + 2).map(|t| &t.token),
        Some(Token::Ident(name)) if AggFunc::from_name(name).is_some()
    );
    let opens = matches!(
        tokens.get(pos + 3).map(|t| &t.token),
        Some(Token::LBrace) | Some(Token::LParen)
    );
    is_eq && is_agg && opens
}

fn parse_aggregate(
    result: String,
    tokens: &[Spanned],
    pos: &mut usize,
) -> Result<Aggregate, ParseError> {
    let func_at = &tokens[*pos];
    let func = match &func_at.token {
        Token::Ident(name) => AggFunc::from_name(name),
        _ => None,
    }
    .ok_or_else(|| unexpected(func_at, "aggregate function"))?;
    *pos += 1;

    let target = if eat(tokens, pos, &Token::LParen) {
        let at = &tokens[*pos];
        let var = match &at.token {
            Token::Var(v) => v.clone(),
            _ => return Err(unexpected(at, "aggregated variable")),
        };
        *pos += 1;
        expect(tokens, pos, Token::RParen, "`)`")?;
        Some(var)
    } else {
        None
    };

    match (func, &target) {
        (AggFunc::Count, _) => {}
        (_, None) => {
            return Err(error_at(
                func_at,
                format!("{} needs an aggregated variable, e.g. {}(X)", func.name(), func.name()),
            ))
        }
        _ => {}
    }

    expect(tokens, pos, Token::LBrace, "`{`")?;
    let mut body = Vec::new();
    loop {
        body.push(parse_atom(tokens, pos)?);
        if eat(tokens, pos, &Token::Comma) {
            continue;
        }
        expect(tokens, pos, Token::RBrace, "`,` or `}`")?;
        break;
    }

    Ok(Aggregate {
        result,
        func,
        target,
        body,
    })
}

fn parse_atom(tokens: &[Spanned], pos: &mut usize) -> Result<Atom, ParseError> {
    let predicate = match &tokens[*pos].token {
        Token::Ident(name) => name.clone(),
        _ => return Err(unexpected(&tokens[*pos], "predicate name")),
    };
    *pos += 1;

    let mut args = Vec::new();
    if eat(tokens, pos, &Token::LParen) && !eat(tokens, pos, &Token::RParen) {
        loop {
            args.push(parse_term(tokens, pos)?);
            if eat(tokens, pos, &Token::Comma) {
                continue;
            }
            expect(tokens, pos, Token::RParen, "`,` or `)`")?;
            break;
        }
    }
    Ok(Atom { predicate, args })
}

// ── Terms and expressions ──

fn parse_term(tokens: &[Spanned], pos: &mut usize) -> Result<Term, ParseError> {
    match &tokens[*pos].token {
        Token::Var(v) => {
            let v = v.clone();
            *pos += 1;
            Ok(Term::Var(v))
        }
        Token::Wildcard => {
            *pos += 1;
            Ok(Term::Wildcard)
        }
        _ => parse_constant(tokens, pos, 0).map(Term::Const),
    }
}

fn parse_constant(tokens: &[Spanned], pos: &mut usize, depth: usize) -> Result<Value, ParseError> {
    let at = &tokens[*pos];
    check_depth(at, depth)?;
    let value = match &at.token {
        Token::Str(s) => Value::String(s.clone()),
        Token::Int(i) => Value::Int(*i),
        Token::Float(f) => Value::Float(*f),
        Token::AtomLit(a) => Value::Atom(a.clone()),
        Token::Ident(b) if b == "true" => Value::Bool(true),
        Token::Ident(b) if b == "false" => Value::Bool(false),
        Token::LBracket => {
            *pos += 1;
            let mut items = Vec::new();
            if !eat(tokens, pos, &Token::RBracket) {
                loop {
                    items.push(parse_constant(tokens, pos, depth + 1)?);
                    if eat(tokens, pos, &Token::Comma) {
                        continue;
                    }
                    expect(tokens, pos, Token::RBracket, "`,` or `]`")?;
                    break;
                }
            }
            return Ok(Value::List(items));
        }
        Token::LBrace => {
            *pos += 1;
            let mut fields = BTreeMap::new();
            if !eat(tokens, pos, &Token::RBrace) {
                loop {
                    let key_at = &tokens[*pos];
                    let key = match &key_at.token {
                        Token::Str(s) | Token::Ident(s) => s.clone(),
                        _ => return Err(unexpected(key_at, "map key")),
                    };
                    *pos += 1;
                    expect(tokens, pos, Token::Colon, "`:`")?;
                    fields.insert(key, parse_constant(tokens, pos, depth + 1)?);
                    if eat(tokens, pos, &Token::Comma) {
                        continue;
                    }
                    expect(tokens, pos, Token::RBrace, "`,` or `}`")?;
                    break;
                }
            }
            return Ok(Value::Map(fields));
        }
        Token::Var(_) | Token::Wildcard => {
            return Err(error_at(
                at,
                "variables are not allowed inside list or map constants".to_string(),
            ))
        }
        _ => return Err(unexpected(at, "a term")),
    };
    *pos += 1;
    Ok(value)
}

fn parse_expr(tokens: &[Spanned], pos: &mut usize, depth: usize) -> Result<Expr, ParseError> {
    check_depth(&tokens[*pos], depth)?;
    let mut lhs = parse_mul(tokens, pos, depth)?;
    let mut chain = depth;
    while let Token::Arith(op @ (ArithOp::Add | ArithOp::Sub)) = tokens[*pos].token {
        chain += 1;
        check_depth(&tokens[*pos], chain)?;
        *pos += 1;
        let rhs = parse_mul(tokens, pos, depth)?;
        lhs = Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
    }
    Ok(lhs)
}

fn parse_mul(tokens: &[Spanned], pos: &mut usize, depth: usize) -> Result<Expr, ParseError> {
    let mut lhs = parse_primary(tokens, pos, depth)?;
    let mut chain = depth;
    while let Token::Arith(op @ (ArithOp::Mul | ArithOp::Div | ArithOp::Mod)) = tokens[*pos].token
    {
        chain += 1;
        check_depth(&tokens[*pos], chain)?;
        *pos += 1;
        let rhs = parse_primary(tokens, pos, depth)?;
        lhs = Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
    }
    Ok(lhs)
}

fn parse_primary(tokens: &[Spanned], pos: &mut usize, depth: usize) -> Result<Expr, ParseError> {
    if eat(tokens, pos, &Token::LParen) {
        let inner = parse_expr(tokens, pos, depth + 1)?;
        expect(tokens, pos, Token::RParen, "`)`")?;
        return Ok(inner);
    }
    if matches!(tokens[*pos].token, Token::Wildcard) {
        return Err(error_at(
            &tokens[*pos],
            "`_` cannot be used in an expression".to_string(),
        ));
    }
    parse_term(tokens, pos).map(Expr::Term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule_with_negation() {
        let program = parse_program("good(X) :- base(X), not other(X).").unwrap();
        assert_eq!(program.rules.len(), 1);
        let rule = &program.rules[0];
        assert_eq!(rule.head.predicate, "good");
        assert!(matches!(rule.body[1], Literal::Negative(_)));
        assert_eq!(rule.to_string(), "good(X) :- base(X), not other(X).");
    }

    #[test]
    fn test_parse_bang_negation_and_comments() {
        let text = "# ready when loaded and idle\nready() :- loaded(), !busy().\n";
        let program = parse_program(text).unwrap();
        assert_eq!(program.rules[0].body.len(), 2);
        assert!(matches!(program.rules[0].body[1], Literal::Negative(_)));
    }

    #[test]
    fn test_parse_decl() {
        let program = parse_program("Decl user_click(ref: string, ts: number).\nDecl idle().").unwrap();
        assert_eq!(program.decls.len(), 2);
        assert_eq!(program.decls[0].arity(), 2);
        assert_eq!(program.decls[0].fields[1].ty, ValueType::Number);
        assert_eq!(program.decls[1].arity(), 0);
    }

    #[test]
    fn test_parse_constants() {
        let atom = parse_query("p(/ok, \"s\", -3, 2.5, true, [1, 2], {a: 1})").unwrap();
        assert_eq!(
            atom.args,
            vec![
                Term::Const(Value::atom("ok")),
                Term::Const(Value::from("s")),
                Term::Const(Value::Int(-3)),
                Term::Const(Value::Float(2.5)),
                Term::Const(Value::Bool(true)),
                Term::Const(Value::List(vec![Value::Int(1), Value::Int(2)])),
                Term::Const(Value::Map(
                    [("a".to_string(), Value::Int(1))].into_iter().collect()
                )),
            ]
        );
    }

    #[test]
    fn test_parse_query_trailing_dot_optional() {
        let a = parse_query("user_click(Ref, _)").unwrap();
        let b = parse_query("user_click(Ref, _).").unwrap();
        assert_eq!(a, b);
        assert!(a.has_wildcard());
        assert!(parse_query("user_click(Ref) extra").is_err());
        assert!(parse_query("   ").is_err());
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let program = parse_program("total(T) :- price(P), qty(Q), T = P * Q + 1.").unwrap();
        let Literal::Compare { op, lhs, rhs } = &program.rules[0].body[2] else {
            panic!("expected comparison");
        };
        assert_eq!(*op, CmpOp::Eq);
        assert_eq!(lhs.as_var(), Some("T"));
        assert!(matches!(rhs, Expr::Binary { op: ArithOp::Add, .. }));
        assert_eq!(rhs.to_string(), "P * Q + 1");
    }

    #[test]
    fn test_minus_and_slash_after_operands() {
        let program = parse_program("d(Z) :- v(X, Y), Z = X-1, W = X/Y, W > 0.").unwrap();
        let Literal::Compare { rhs, .. } = &program.rules[0].body[1] else {
            panic!("expected comparison");
        };
        assert!(matches!(rhs, Expr::Binary { op: ArithOp::Sub, .. }));
        let Literal::Compare { rhs, .. } = &program.rules[0].body[2] else {
            panic!("expected comparison");
        };
        assert!(matches!(rhs, Expr::Binary { op: ArithOp::Div, .. }));
    }

    #[test]
    fn test_parse_aggregates() {
        let program = parse_program(
            "n(C) :- C = count{item(_)}.\ntotal(U, S) :- user(U), S = sum(A){order(U, A)}.",
        )
        .unwrap();
        let Literal::Aggregate(count) = &program.rules[0].body[0] else {
            panic!("expected aggregate");
        };
        assert_eq!(count.func, AggFunc::Count);
        assert!(count.target.is_none());
        let Literal::Aggregate(sum) = &program.rules[1].body[1] else {
            panic!("expected aggregate");
        };
        assert_eq!(sum.target.as_deref(), Some("A"));
        assert!(parse_program("t(S) :- S = sum{order(_, A)}.").is_err());
    }

    #[test]
    fn test_error_positions() {
        let err = parse_program("ok() :- a().\nbad( :- b().").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("expected"), "{}", err.message);

        let err = parse_program("p(\"open").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let lists = format!("p({}", "[".repeat(100_000));
        let err = parse_query(&lists).unwrap_err();
        assert!(err.message.contains("nesting"), "{}", err.message);

        let parens = format!("q(X) :- p(X), X = {}1.", "(".repeat(100_000));
        let err = parse_program(&parens).unwrap_err();
        assert!(err.message.contains("nesting"), "{}", err.message);

        let sum = format!("q(X) :- p(X), X = 1{}.", " + 1".repeat(100_000));
        assert!(parse_program(&sum).is_err());

        let ok = format!("p({}1{})", "[".repeat(MAX_NESTING), "]".repeat(MAX_NESTING));
        assert!(parse_query(&ok).is_ok());
        let ok = format!("q(X) :- p(X), X = {}1{}.", "(".repeat(10), ")".repeat(10));
        assert!(parse_program(&ok).is_ok());
    }

    #[test]
    fn test_ground_fact_clause() {
        let program = parse_program("config(/mode, \"fast\").").unwrap();
        assert!(program.rules[0].body.is_empty());
    }
}
