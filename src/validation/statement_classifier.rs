use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Whether a SQL statement is expected to produce rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Fetch rows and return them as mappings
    Read,
    /// Execute and report the affected-row count
    Write,
}

const READ_KEYWORDS: [Keyword; 5] = [
    Keyword::SELECT,
    Keyword::WITH,
    Keyword::SHOW,
    Keyword::EXPLAIN,
    Keyword::VALUES,
];

/// Classifies generated SQL into reads and writes before execution
pub struct StatementClassifier;

impl StatementClassifier {
    /// A statement is a read when it starts with a read keyword, when the
    /// caller declared `action = "read"`, or when it carries a RETURNING clause.
    pub fn classify(sql: &str, action: Option<&str>) -> StatementKind {
        if action.is_some_and(|a| a.trim().eq_ignore_ascii_case("read")) {
            return StatementKind::Read;
        }

        let (leading, has_returning) = match Self::scan_keywords(sql) {
            Some(scan) => scan,
            None => Self::scan_text(sql),
        };

        if leading || has_returning {
            StatementKind::Read
        } else {
            StatementKind::Write
        }
    }

    /// Uses the tokenizer so keywords inside literals, quoted identifiers and
    /// comments are ignored. Returns None when the text cannot be tokenized.
    fn scan_keywords(sql: &str) -> Option<(bool, bool)> {
        let dialect = PostgreSqlDialect {};
        let tokens = Tokenizer::new(&dialect, sql).tokenize().ok()?;

        let mut words = tokens.iter().filter_map(|token| match token {
            Token::Word(word) if word.quote_style.is_none() => Some(word.keyword),
            _ => None,
        });

        let leading = tokens
            .iter()
            .find(|token| !matches!(token, Token::Whitespace(_) | Token::LParen))
            .map(|token| match token {
                Token::Word(word) => READ_KEYWORDS.contains(&word.keyword),
                _ => false,
            })
            .unwrap_or(false);

        let has_returning = words.any(|keyword| keyword == Keyword::RETURNING);

        Some((leading, has_returning))
    }

    fn scan_text(sql: &str) -> (bool, bool) {
        let lowered = sql.trim().to_lowercase();
        let leading = ["select", "with", "show", "explain", "values"]
            .iter()
            .any(|keyword| lowered.starts_with(keyword));
        (leading, lowered.contains("returning"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_by_leading_keyword() {
        assert_eq!(StatementClassifier::classify("SELECT * FROM users", None), StatementKind::Read);
        assert_eq!(StatementClassifier::classify("  select 1", None), StatementKind::Read);
        assert_eq!(
            StatementClassifier::classify("WITH t AS (SELECT 1) SELECT * FROM t", None),
            StatementKind::Read
        );
        assert_eq!(
            StatementClassifier::classify("-- list users\nSELECT * FROM users", None),
            StatementKind::Read
        );
        assert_eq!(StatementClassifier::classify("(SELECT 1)", None), StatementKind::Read);
    }

    #[test]
    fn test_writes() {
        assert_eq!(
            StatementClassifier::classify("INSERT INTO users (name) VALUES ('a')", None),
            StatementKind::Write
        );
        assert_eq!(
            StatementClassifier::classify("UPDATE users SET active = false", None),
            StatementKind::Write
        );
        assert_eq!(StatementClassifier::classify("DELETE FROM users", None), StatementKind::Write);
    }

    #[test]
    fn test_returning_clause_makes_read() {
        assert_eq!(
            StatementClassifier::classify("INSERT INTO users (name) VALUES ('a') RETURNING id", None),
            StatementKind::Read
        );
        assert_eq!(
            StatementClassifier::classify("delete from users where id = $1 returning *", None),
            StatementKind::Read
        );
    }

    #[test]
    fn test_returning_inside_literal_is_ignored() {
        assert_eq!(
            StatementClassifier::classify(
                "UPDATE tickets SET note = 'customer returning soon' WHERE id = 1",
                None
            ),
            StatementKind::Write
        );
        assert_eq!(
            StatementClassifier::classify("UPDATE \"returning\" SET x = 1", None),
            StatementKind::Write
        );
    }

    #[test]
    fn test_explicit_read_action() {
        assert_eq!(
            StatementClassifier::classify("CALL refresh_report()", Some("READ")),
            StatementKind::Read
        );
        assert_eq!(
            StatementClassifier::classify("CALL refresh_report()", Some("write")),
            StatementKind::Write
        );
    }

    #[test]
    fn test_untokenizable_falls_back_to_text() {
        // Unterminated literal cannot be tokenized
        assert_eq!(
            StatementClassifier::classify("SELECT 'oops FROM users", None),
            StatementKind::Read
        );
        assert_eq!(
            StatementClassifier::classify("UPDATE users SET name = 'x RETURNING", None),
            StatementKind::Read
        );
    }
}
