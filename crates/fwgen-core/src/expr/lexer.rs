//! Tokenizer for formula text.
//!
//! Formulas are split on whitespace. Single-quoted literals may contain
//! spaces, and parentheses are peeled off the words they touch so that
//! `(a + b)` and `( a + b )` tokenize the same way.

/// Token variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A bare word: an operator, a literal or a path reference.
    Word(String),
    /// Quoted string content (quotes stripped).
    Quoted(String),
    /// `(`
    LParen,
    /// `)`
    RParen,
}

impl Token {
    /// Returns the word text, if this is a bare word.
    pub fn word(&self) -> Option<&str> {
        match self {
            Self::Word(w) => Some(w),
            _ => None,
        }
    }
}

/// Tokenize formula text, checking that quotes and parentheses balance.
pub fn tokenize(formula: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = formula.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }

            '\'' => {
                chars.next(); // consume opening quote
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => s.push(c),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Quoted(s));
            }

            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }

            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }

            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '\'') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    let mut depth = 0usize;
    for token in &tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unmatched ')'".to_string())?;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unmatched '('".to_string());
    }

    Ok(tokens)
}
