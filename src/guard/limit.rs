//! LIMIT enforcement.
//!
//! The outermost query must end up with exactly one literal LIMIT no larger than
//! the policy cap. A missing LIMIT is appended; an oversized one is replaced in
//! the original text so the rest of the statement keeps its exact spelling.

use crate::error::ValidationError;
use sqlparser::ast::{Expr, Query, Value};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, TokenWithLocation, Whitespace};

/// Return `sql` with its top-level LIMIT clamped to `max_limit`.
pub fn enforce(
    sql: &str,
    query: &Query,
    tokens: &[TokenWithLocation],
    max_limit: u64,
) -> Result<String, ValidationError> {
    // FETCH FIRST is a second row cap we would have to reconcile with LIMIT.
    if query.fetch.is_some() {
        return Err(ValidationError::InvalidLimit);
    }

    let clauses = top_level_limit_keywords(tokens);
    match (&query.limit, clauses.as_slice()) {
        (None, []) => Ok(append_limit(sql, tokens, max_limit)),
        (Some(expr), [keyword]) => {
            let (digits, value) = literal_limit(expr)?;
            if value <= max_limit {
                Ok(sql.to_string())
            } else {
                replace_literal(sql, tokens, *keyword, digits, max_limit)
            }
        }
        // LIMIT ALL parses to no limit at all, and any other disagreement
        // between tree and tokens is refused.
        _ => Err(ValidationError::InvalidLimit),
    }
}

fn literal_limit(expr: &Expr) -> Result<(&str, u64), ValidationError> {
    match expr {
        Expr::Value(Value::Number(digits, _)) => digits
            .parse::<u64>()
            .map(|value| (digits.as_str(), value))
            .map_err(|_| ValidationError::InvalidLimit),
        _ => Err(ValidationError::InvalidLimit),
    }
}

/// Indexes of LIMIT keywords outside any parentheses.
fn top_level_limit_keywords(tokens: &[TokenWithLocation]) -> Vec<usize> {
    let mut depth = 0usize;
    let mut after_period = false;
    let mut positions = Vec::new();

    for (index, item) in tokens.iter().enumerate() {
        match &item.token {
            Token::Whitespace(_) => continue,
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(word)
                if depth == 0
                    && !after_period
                    && word.quote_style.is_none()
                    && word.keyword == Keyword::LIMIT =>
            {
                positions.push(index);
            }
            _ => {}
        }
        after_period = item.token == Token::Period;
    }

    positions
}

fn append_limit(sql: &str, tokens: &[TokenWithLocation], max_limit: u64) -> String {
    let ends_in_line_comment = tokens
        .iter()
        .rev()
        .find(|item| item.token != Token::EOF)
        .map_or(false, |item| {
            matches!(
                item.token,
                Token::Whitespace(Whitespace::SingleLineComment { .. })
            )
        });

    if ends_in_line_comment {
        format!("{}\nLIMIT {}", sql, max_limit)
    } else {
        format!("{} LIMIT {}", sql, max_limit)
    }
}

fn replace_literal(
    sql: &str,
    tokens: &[TokenWithLocation],
    keyword: usize,
    digits: &str,
    max_limit: u64,
) -> Result<String, ValidationError> {
    let literal = tokens
        .iter()
        .skip(keyword + 1)
        .find(|item| !matches!(item.token, Token::Whitespace(_)))
        .ok_or(ValidationError::InvalidLimit)?;

    match &literal.token {
        Token::Number(text, _) if text == digits => {}
        _ => return Err(ValidationError::InvalidLimit),
    }

    let start = byte_offset(sql, &literal.location).ok_or(ValidationError::InvalidLimit)?;
    let end = start + digits.len();
    if sql.get(start..end) != Some(digits) {
        return Err(ValidationError::InvalidLimit);
    }

    Ok(format!("{}{}{}", &sql[..start], max_limit, &sql[end..]))
}

/// Byte offset of a 1-based line/column location, columns counted in chars.
fn byte_offset(sql: &str, location: &Location) -> Option<usize> {
    let mut line = 1;
    let mut column = 1;
    for (offset, ch) in sql.char_indices() {
        if line == location.line && column == location.column {
            return Some(offset);
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    None
}
