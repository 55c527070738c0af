use std::error::Error;
use std::fmt::{self, Display};

const TOKEN_ENDERS: &str = ",) +-*/^&=><%(";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let bytes = TOKEN_ENDERS.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        tbl[bytes[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

/// Represents operator associativity.
#[derive(Debug, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

/// A custom error type for the tokenizer.
#[derive(Debug)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenizerError: {} at {}", self.message, self.pos)
    }
}

impl Error for TokenizerError {}

/// The type of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Operand,
    Func,
    Paren,
    Sep,
    OpPrefix,
    OpInfix,
    OpPostfix,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The subtype of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSubType {
    None,
    Text,
    Number,
    Logical,
    /// `{fieldId}` reference.
    Field,
    Open,
    Close,
    Arg,
}

impl Display for TokenSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A token of a field expression.
///
/// `value` holds the decoded payload: the unquoted text for strings, the
/// bare id for field references and the upper-cased name for functions.
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
    pub start: usize,
    pub end: usize,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} subtype: {:?} value: {}>",
            self.token_type, self.subtype, self.value
        )
    }
}

impl Token {
    pub fn new(value: String, token_type: TokenType, subtype: TokenSubType) -> Self {
        Token {
            value,
            token_type,
            subtype,
            start: 0,
            end: 0,
        }
    }

    pub fn new_with_span(
        value: String,
        token_type: TokenType,
        subtype: TokenSubType,
        start: usize,
        end: usize,
    ) -> Self {
        Token {
            value,
            token_type,
            subtype,
            start,
            end,
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self.token_type,
            TokenType::OpPrefix | TokenType::OpInfix | TokenType::OpPostfix
        )
    }

    pub fn get_precedence(&self) -> Option<(u8, Associativity)> {
        // For a prefix operator, use the 'u' key.
        let op = if self.token_type == TokenType::OpPrefix {
            "u"
        } else {
            self.value.as_str()
        };

        match op {
            "u" => Some((7, Associativity::Right)),
            "%" => Some((6, Associativity::Left)),
            "^" => Some((5, Associativity::Left)),
            "*" | "/" => Some((4, Associativity::Left)),
            "+" | "-" => Some((3, Associativity::Left)),
            "&" => Some((2, Associativity::Left)),
            "=" | "<" | ">" | "<=" | ">=" | "<>" | "!=" => Some((1, Associativity::Left)),
            _ => None,
        }
    }
}

/// Tokenizer for field expressions such as `{fldA} * 2 & "x"`.
pub struct Tokenizer {
    source: String,
    pub items: Vec<Token>,
    offset: usize,
}

impl Tokenizer {
    /// Create a new tokenizer and immediately tokenize the expression.
    pub fn new(source: &str) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer {
            source: source.to_string(),
            items: Vec::with_capacity(source.len() / 2),
            offset: 0,
        };
        tokenizer.tokenize()?;
        Ok(tokenizer)
    }

    #[inline]
    fn current_byte(&self) -> Option<u8> {
        self.source.as_bytes().get(self.offset).copied()
    }

    #[inline]
    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.source.as_bytes().get(self.offset + ahead).copied()
    }

    fn error(&self, message: impl Into<String>) -> TokenizerError {
        TokenizerError {
            message: message.into(),
            pos: self.offset,
        }
    }

    /// Whether the previous token ends an operand, which decides if `+`/`-`
    /// are infix or prefix.
    fn prev_ends_operand(&self) -> bool {
        match self.items.last() {
            None => false,
            Some(t) => match t.token_type {
                TokenType::Operand => true,
                TokenType::OpPostfix => true,
                TokenType::Paren | TokenType::Func => t.subtype == TokenSubType::Close,
                _ => false,
            },
        }
    }

    fn tokenize(&mut self) -> Result<(), TokenizerError> {
        let mut depth: Vec<TokenType> = Vec::new();

        while let Some(c) = self.current_byte() {
            match c {
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.offset += 1;
                }
                b'"' | b'\'' => self.read_string(c)?,
                b'{' => self.read_field_ref()?,
                b'(' => {
                    self.items.push(Token::new_with_span(
                        "(".to_string(),
                        TokenType::Paren,
                        TokenSubType::Open,
                        self.offset,
                        self.offset + 1,
                    ));
                    depth.push(TokenType::Paren);
                    self.offset += 1;
                }
                b')' => {
                    let kind = depth.pop().ok_or_else(|| self.error("Unmatched ')'"))?;
                    self.items.push(Token::new_with_span(
                        ")".to_string(),
                        kind,
                        TokenSubType::Close,
                        self.offset,
                        self.offset + 1,
                    ));
                    self.offset += 1;
                }
                b',' => {
                    if depth.last() != Some(&TokenType::Func) {
                        return Err(self.error("Argument separator outside of a function call"));
                    }
                    self.items.push(Token::new_with_span(
                        ",".to_string(),
                        TokenType::Sep,
                        TokenSubType::Arg,
                        self.offset,
                        self.offset + 1,
                    ));
                    self.offset += 1;
                }
                b'%' => {
                    self.items.push(Token::new_with_span(
                        "%".to_string(),
                        TokenType::OpPostfix,
                        TokenSubType::None,
                        self.offset,
                        self.offset + 1,
                    ));
                    self.offset += 1;
                }
                b'+' | b'-' => {
                    let token_type = if self.prev_ends_operand() {
                        TokenType::OpInfix
                    } else {
                        TokenType::OpPrefix
                    };
                    self.items.push(Token::new_with_span(
                        (c as char).to_string(),
                        token_type,
                        TokenSubType::None,
                        self.offset,
                        self.offset + 1,
                    ));
                    self.offset += 1;
                }
                b'*' | b'/' | b'^' | b'&' | b'=' => {
                    self.push_infix(1);
                }
                b'<' | b'>' | b'!' => {
                    let two = matches!(
                        (c, self.peek_byte(1)),
                        (b'<', Some(b'=')) | (b'>', Some(b'=')) | (b'<', Some(b'>')) | (b'!', Some(b'='))
                    );
                    if c == b'!' && !two {
                        return Err(self.error("Unexpected '!'"));
                    }
                    self.push_infix(if two { 2 } else { 1 });
                }
                b'0'..=b'9' | b'.' => self.read_number()?,
                c if c.is_ascii_alphabetic() || c == b'_' => self.read_word(&mut depth)?,
                _ => {
                    return Err(self.error(format!("Unexpected character '{}'", c as char)));
                }
            }
        }

        if !depth.is_empty() {
            return Err(self.error("Unclosed parenthesis"));
        }
        Ok(())
    }

    fn push_infix(&mut self, len: usize) {
        let start = self.offset;
        let end = start + len;
        self.items.push(Token::new_with_span(
            self.source[start..end].to_string(),
            TokenType::OpInfix,
            TokenSubType::None,
            start,
            end,
        ));
        self.offset = end;
    }

    fn read_string(&mut self, quote: u8) -> Result<(), TokenizerError> {
        let start = self.offset;
        self.offset += 1;
        let mut out = String::new();
        let mut chunk_start = self.offset;
        loop {
            match self.current_byte() {
                None => {
                    return Err(TokenizerError {
                        message: "Reached end of expression while parsing a string".to_string(),
                        pos: start,
                    });
                }
                Some(b'\\') => {
                    out.push_str(&self.source[chunk_start..self.offset]);
                    let escaped = self
                        .peek_byte(1)
                        .ok_or_else(|| self.error("Dangling escape in string"))?;
                    match escaped {
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        other => out.push(other as char),
                    }
                    self.offset += 2;
                    chunk_start = self.offset;
                }
                Some(b) if b == quote => {
                    out.push_str(&self.source[chunk_start..self.offset]);
                    self.offset += 1;
                    break;
                }
                Some(_) => self.offset += 1,
            }
        }
        self.items.push(Token::new_with_span(
            out,
            TokenType::Operand,
            TokenSubType::Text,
            start,
            self.offset,
        ));
        Ok(())
    }

    fn read_field_ref(&mut self) -> Result<(), TokenizerError> {
        let start = self.offset;
        let close = self.source[start..]
            .find('}')
            .map(|i| start + i)
            .ok_or_else(|| self.error("Unclosed field reference"))?;
        let id = self.source[start + 1..close].trim();
        if id.is_empty() {
            return Err(self.error("Empty field reference"));
        }
        self.items.push(Token::new_with_span(
            id.to_string(),
            TokenType::Operand,
            TokenSubType::Field,
            start,
            close + 1,
        ));
        self.offset = close + 1;
        Ok(())
    }

    fn read_number(&mut self) -> Result<(), TokenizerError> {
        let start = self.offset;
        while let Some(c) = self.current_byte() {
            if c.is_ascii_digit() || c == b'.' {
                self.offset += 1;
            } else if (c == b'e' || c == b'E')
                && matches!(self.peek_byte(1), Some(b'0'..=b'9' | b'+' | b'-'))
            {
                self.offset += 2;
            } else {
                break;
            }
        }
        let text = &self.source[start..self.offset];
        if text.parse::<f64>().is_err() {
            return Err(TokenizerError {
                message: format!("Invalid number '{text}'"),
                pos: start,
            });
        }
        self.items.push(Token::new_with_span(
            text.to_string(),
            TokenType::Operand,
            TokenSubType::Number,
            start,
            self.offset,
        ));
        Ok(())
    }

    fn read_word(&mut self, depth: &mut Vec<TokenType>) -> Result<(), TokenizerError> {
        let start = self.offset;
        while let Some(c) = self.current_byte() {
            if is_token_ender(c) || c == b'{' || c == b'"' || c == b'\'' {
                break;
            }
            self.offset += 1;
        }
        let word = self.source[start..self.offset].to_ascii_uppercase();

        if self.current_byte() == Some(b'(') {
            self.items.push(Token::new_with_span(
                word,
                TokenType::Func,
                TokenSubType::Open,
                start,
                self.offset + 1,
            ));
            depth.push(TokenType::Func);
            self.offset += 1;
            return Ok(());
        }

        match word.as_str() {
            "TRUE" | "FALSE" => {
                self.items.push(Token::new_with_span(
                    word,
                    TokenType::Operand,
                    TokenSubType::Logical,
                    start,
                    self.offset,
                ));
                Ok(())
            }
            _ => Err(TokenizerError {
                message: format!("Unknown identifier '{word}'"),
                pos: start,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenType, TokenSubType, String)> {
        Tokenizer::new(src)
            .unwrap()
            .items
            .into_iter()
            .map(|t| (t.token_type, t.subtype, t.value))
            .collect()
    }

    #[test]
    fn field_references_keep_bare_ids() {
        let toks = kinds("{fldA} & {fldB}");
        assert_eq!(toks[0], (TokenType::Operand, TokenSubType::Field, "fldA".into()));
        assert_eq!(toks[1], (TokenType::OpInfix, TokenSubType::None, "&".into()));
        assert_eq!(toks[2], (TokenType::Operand, TokenSubType::Field, "fldB".into()));
    }

    #[test]
    fn minus_is_prefix_after_operator_and_infix_after_operand() {
        let toks = kinds("-1 - -2");
        assert_eq!(toks[0].0, TokenType::OpPrefix);
        assert_eq!(toks[2].0, TokenType::OpInfix);
        assert_eq!(toks[3].0, TokenType::OpPrefix);
    }

    #[test]
    fn functions_are_uppercased_and_closed() {
        let toks = kinds("sum({a}, 2)");
        assert_eq!(toks[0], (TokenType::Func, TokenSubType::Open, "SUM".into()));
        assert_eq!(toks.last().unwrap().0, TokenType::Func);
        assert_eq!(toks.last().unwrap().1, TokenSubType::Close);
    }

    #[test]
    fn strings_decode_escapes() {
        let toks = kinds(r#""a\"b" & 'c'"#);
        assert_eq!(toks[0].2, "a\"b");
        assert_eq!(toks[2].2, "c");
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(Tokenizer::new("(1 + 2").is_err());
        assert!(Tokenizer::new("1 + 2)").is_err());
        assert!(Tokenizer::new("{fldA").is_err());
        assert!(Tokenizer::new("1, 2").is_err());
        assert!(Tokenizer::new("foo + 1").is_err());
    }
}
