use crate::tokenizer::{Associativity, Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
use std::error::Error;
use std::fmt::{self, Display};
use tabula_common::{CellValue, FieldId};

/// A custom error type for the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.position {
            write!(f, "ParserError at position {}: {}", pos, self.message)
        } else {
            write!(f, "ParserError: {}", self.message)
        }
    }
}

impl Error for ParserError {}

impl From<TokenizerError> for ParserError {
    fn from(err: TokenizerError) -> Self {
        ParserError {
            message: err.message,
            position: Some(err.pos),
        }
    }
}

/// The different types of AST nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ASTNodeType {
    Literal(CellValue),
    Reference {
        original: String, // Source text including braces, kept for display
        field_id: FieldId,
    },
    UnaryOp {
        op: String,
        expr: Box<ASTNode>,
    },
    BinaryOp {
        op: String,
        left: Box<ASTNode>,
        right: Box<ASTNode>,
    },
    Function {
        name: String,
        args: Vec<ASTNode>,
    },
}

impl Display for ASTNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ASTNodeType::Literal(value) => write!(f, "Literal({value:?})"),
            ASTNodeType::Reference { field_id, .. } => write!(f, "Reference({field_id})"),
            ASTNodeType::UnaryOp { op, expr } => write!(f, "UnaryOp({op}, {expr})"),
            ASTNodeType::BinaryOp { op, left, right } => {
                write!(f, "BinaryOp({op}, {left}, {right})")
            }
            ASTNodeType::Function { name, args } => {
                write!(f, "Function({name}")?;
                for arg in args {
                    write!(f, ", {arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// An AST node represents a parsed expression element
#[derive(Debug, Clone, PartialEq)]
pub struct ASTNode {
    pub node_type: ASTNodeType,
    pub source_token: Option<Token>,
}

impl ASTNode {
    pub fn new(node_type: ASTNodeType, source_token: Option<Token>) -> Self {
        ASTNode {
            node_type,
            source_token,
        }
    }

    /// Field ids referenced anywhere in this tree, in first-seen order.
    pub fn field_references(&self) -> Vec<FieldId> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<FieldId>) {
        match &self.node_type {
            ASTNodeType::Reference { field_id, .. } => {
                if !out.contains(field_id) {
                    out.push(field_id.clone());
                }
            }
            ASTNodeType::UnaryOp { expr, .. } => expr.collect_references(out),
            ASTNodeType::BinaryOp { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            ASTNodeType::Function { args, .. } => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
            ASTNodeType::Literal(_) => {}
        }
    }
}

impl Display for ASTNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_type)
    }
}

/// A parser for converting tokens into an AST.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    /// Parse the tokens into an AST.
    pub fn parse(&mut self) -> Result<ASTNode, ParserError> {
        if self.tokens.is_empty() {
            return Err(ParserError {
                message: "No tokens to parse".to_string(),
                position: None,
            });
        }

        let ast = self.parse_expression()?;
        if self.position < self.tokens.len() {
            return Err(ParserError {
                message: format!(
                    "Unexpected token at position {}: {}",
                    self.position, self.tokens[self.position]
                ),
                position: Some(self.tokens[self.position].start),
            });
        }
        Ok(ast)
    }

    fn parse_expression(&mut self) -> Result<ASTNode, ParserError> {
        self.parse_binary_op(0)
    }

    fn parse_binary_op(&mut self, min_precedence: u8) -> Result<ASTNode, ParserError> {
        let mut left = self.parse_unary_op()?;

        while self.position < self.tokens.len() {
            let token = &self.tokens[self.position];
            if token.token_type != TokenType::OpInfix {
                break;
            }

            let (precedence, associativity) =
                token.get_precedence().unwrap_or((0, Associativity::Left));
            if precedence < min_precedence {
                break;
            }

            let op_token = self.tokens[self.position].clone();
            self.position += 1;

            let next_min_precedence = if associativity == Associativity::Left {
                precedence + 1
            } else {
                precedence
            };

            let right = self.parse_binary_op(next_min_precedence)?;
            let op = if op_token.value == "!=" {
                "<>".to_string()
            } else {
                op_token.value.clone()
            };
            left = ASTNode::new(
                ASTNodeType::BinaryOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Some(op_token),
            );
        }

        Ok(left)
    }

    fn parse_unary_op(&mut self) -> Result<ASTNode, ParserError> {
        if self.position < self.tokens.len()
            && self.tokens[self.position].token_type == TokenType::OpPrefix
        {
            let op_token = self.tokens[self.position].clone();
            self.position += 1;
            let expr = self.parse_unary_op()?;
            return Ok(ASTNode::new(
                ASTNodeType::UnaryOp {
                    op: op_token.value.clone(),
                    expr: Box::new(expr),
                },
                Some(op_token),
            ));
        }
        self.parse_postfix_op()
    }

    fn parse_postfix_op(&mut self) -> Result<ASTNode, ParserError> {
        let mut expr = self.parse_primary()?;

        while self.position < self.tokens.len()
            && self.tokens[self.position].token_type == TokenType::OpPostfix
        {
            let op_token = self.tokens[self.position].clone();
            self.position += 1;
            expr = ASTNode::new(
                ASTNodeType::UnaryOp {
                    op: op_token.value.clone(),
                    expr: Box::new(expr),
                },
                Some(op_token),
            );
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ASTNode, ParserError> {
        let Some(token) = self.tokens.get(self.position).cloned() else {
            return Err(ParserError {
                message: "Unexpected end of expression".to_string(),
                position: self.tokens.last().map(|t| t.end),
            });
        };

        match token.token_type {
            TokenType::Operand => {
                self.position += 1;
                self.parse_operand(token)
            }
            TokenType::Func if token.subtype == TokenSubType::Open => {
                self.position += 1;
                self.parse_function(token)
            }
            TokenType::Paren if token.subtype == TokenSubType::Open => {
                self.position += 1;
                let expr = self.parse_expression()?;
                self.expect_close(TokenType::Paren)?;
                Ok(expr)
            }
            _ => Err(ParserError {
                message: format!("Unexpected token: {token}"),
                position: Some(token.start),
            }),
        }
    }

    fn parse_operand(&mut self, token: Token) -> Result<ASTNode, ParserError> {
        let node_type = match token.subtype {
            TokenSubType::Number => {
                let n = token.value.parse::<f64>().map_err(|_| ParserError {
                    message: format!("Invalid number '{}'", token.value),
                    position: Some(token.start),
                })?;
                ASTNodeType::Literal(CellValue::Number(n))
            }
            TokenSubType::Text => ASTNodeType::Literal(CellValue::Text(token.value.clone())),
            TokenSubType::Logical => {
                ASTNodeType::Literal(CellValue::Boolean(token.value == "TRUE"))
            }
            TokenSubType::Field => ASTNodeType::Reference {
                original: format!("{{{}}}", token.value),
                field_id: FieldId::new(token.value.clone()),
            },
            _ => {
                return Err(ParserError {
                    message: format!("Unexpected operand: {token}"),
                    position: Some(token.start),
                });
            }
        };
        Ok(ASTNode::new(node_type, Some(token)))
    }

    fn parse_function(&mut self, func_token: Token) -> Result<ASTNode, ParserError> {
        let name = func_token.value.clone();
        let mut args = Vec::new();

        if self.peek_close(TokenType::Func) {
            self.position += 1;
            return Ok(ASTNode::new(
                ASTNodeType::Function { name, args },
                Some(func_token),
            ));
        }

        loop {
            args.push(self.parse_expression()?);
            match self.tokens.get(self.position) {
                Some(t) if t.token_type == TokenType::Sep => {
                    self.position += 1;
                }
                Some(t) if t.token_type == TokenType::Func && t.subtype == TokenSubType::Close => {
                    self.position += 1;
                    break;
                }
                other => {
                    return Err(ParserError {
                        message: format!("Expected ',' or ')' in call to {name}"),
                        position: other.map(|t| t.start),
                    });
                }
            }
        }

        Ok(ASTNode::new(
            ASTNodeType::Function { name, args },
            Some(func_token),
        ))
    }

    fn peek_close(&self, kind: TokenType) -> bool {
        matches!(
            self.tokens.get(self.position),
            Some(t) if t.token_type == kind && t.subtype == TokenSubType::Close
        )
    }

    fn expect_close(&mut self, kind: TokenType) -> Result<(), ParserError> {
        if self.peek_close(kind) {
            self.position += 1;
            Ok(())
        } else {
            Err(ParserError {
                message: "Expected ')'".to_string(),
                position: self.tokens.get(self.position).map(|t| t.start),
            })
        }
    }
}

/// Parse an expression string into an AST.
pub fn parse<T: AsRef<str>>(expression: T) -> Result<ASTNode, ParserError> {
    let tokenizer = Tokenizer::new(expression.as_ref())?;
    let mut parser = Parser::new(tokenizer.items);
    parser.parse()
}
