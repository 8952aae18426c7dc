//! Boolean formula compiler
//!
//! Door formulas are small boolean expressions over named variables:
//!
//! ```text
//! A & (B | !C) ^ this
//! ```
//!
//! # Grammar
//!
//! Operator precedence, tightest first: `!` (not), `&` (and), `^` (xor),
//! `|` (or). Parentheses override precedence. The whole formula may only
//! contain letters, the four operators, parentheses and whitespace.
//! Variable names are letters only and are matched case-insensitively.
//!
//! # Validation
//!
//! [`compile`] (and its boolean shortcut [`can_build`]) rejects a formula when:
//! - it contains a character outside the allowed set
//! - parentheses are unbalanced
//! - a declared variable never appears in the formula text
//! - the formula references a token that is not a declared variable
//! - the expression is syntactically incomplete

mod cache;

pub use cache::FormulaCache;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
  #[error("Formula is empty")]
  Empty,

  #[error("Invalid char used: '{ch}' at position {position}")]
  InvalidChar { ch: char, position: usize },

  #[error("Invalid variable name '{0}': only letters are allowed")]
  InvalidVariableName(String),

  #[error("Variable '{0}' is declared more than once")]
  DuplicateVariable(String),

  #[error("Unbalanced parentheses")]
  UnbalancedParentheses,

  #[error("Variable '{0}' is not used in the formula")]
  UnusedVariable(String),

  #[error("Formula references unbound token '{0}'")]
  UnboundToken(String),

  #[error("Unexpected '{token}' at position {position}")]
  UnexpectedToken { token: String, position: usize },

  #[error("Unexpected end of formula")]
  UnexpectedEnd,
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
  Ident(String),
  Not,
  And,
  Xor,
  Or,
  Open,
  Close,
}

#[derive(Debug, Clone)]
struct Token {
  kind: TokenKind,
  position: usize,
}

impl Token {
  fn describe(&self) -> String {
    match &self.kind {
      TokenKind::Ident(name) => name.clone(),
      TokenKind::Not => "!".into(),
      TokenKind::And => "&".into(),
      TokenKind::Xor => "^".into(),
      TokenKind::Or => "|".into(),
      TokenKind::Open => "(".into(),
      TokenKind::Close => ")".into(),
    }
  }
}

fn tokenize(formula: &str) -> Result<Vec<Token>, FormulaError> {
  let mut tokens = Vec::new();
  let mut chars = formula.char_indices().peekable();

  while let Some((position, ch)) = chars.next() {
    let kind = match ch {
      c if c.is_whitespace() => continue,
      '!' => TokenKind::Not,
      '&' => TokenKind::And,
      '^' => TokenKind::Xor,
      '|' => TokenKind::Or,
      '(' => TokenKind::Open,
      ')' => TokenKind::Close,
      c if c.is_alphabetic() => {
        let mut ident = String::from(c);
        while let Some(&(_, next)) = chars.peek() {
          if !next.is_alphabetic() {
            break;
          }
          ident.push(next);
          chars.next();
        }
        TokenKind::Ident(ident)
      }
      ch => return Err(FormulaError::InvalidChar { ch, position }),
    };
    tokens.push(Token { kind, position });
  }

  Ok(tokens)
}

fn check_parentheses(tokens: &[Token]) -> Result<(), FormulaError> {
  let mut depth: i64 = 0;
  for token in tokens {
    match token.kind {
      TokenKind::Open => depth += 1,
      TokenKind::Close => {
        depth -= 1;
        if depth < 0 {
          return Err(FormulaError::UnbalancedParentheses);
        }
      }
      _ => {}
    }
  }
  if depth != 0 {
    return Err(FormulaError::UnbalancedParentheses);
  }
  Ok(())
}

// ============================================================================
// Expression tree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
  Var(usize),
  Not(Box<Expr>),
  And(Box<Expr>, Box<Expr>),
  Xor(Box<Expr>, Box<Expr>),
  Or(Box<Expr>, Box<Expr>),
}

impl Expr {
  fn eval(&self, values: &[bool]) -> bool {
    match self {
      Expr::Var(index) => values.get(*index).copied().unwrap_or(false),
      Expr::Not(inner) => !inner.eval(values),
      Expr::And(lhs, rhs) => lhs.eval(values) && rhs.eval(values),
      Expr::Xor(lhs, rhs) => lhs.eval(values) ^ rhs.eval(values),
      Expr::Or(lhs, rhs) => lhs.eval(values) || rhs.eval(values),
    }
  }
}

/// Recursive descent parser, one function per precedence level
struct Parser<'a> {
  tokens: &'a [Token],
  pos: usize,
  variables: &'a [String],
}

impl Parser<'_> {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn eat(&mut self, kind: &TokenKind) -> bool {
    if self.peek().is_some_and(|t| &t.kind == kind) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn parse(mut self) -> Result<Expr, FormulaError> {
    let expr = self.or()?;
    match self.peek() {
      None => Ok(expr),
      Some(token) => Err(FormulaError::UnexpectedToken {
        token: token.describe(),
        position: token.position,
      }),
    }
  }

  fn or(&mut self) -> Result<Expr, FormulaError> {
    let mut lhs = self.xor()?;
    while self.eat(&TokenKind::Or) {
      let rhs = self.xor()?;
      lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn xor(&mut self) -> Result<Expr, FormulaError> {
    let mut lhs = self.and()?;
    while self.eat(&TokenKind::Xor) {
      let rhs = self.and()?;
      lhs = Expr::Xor(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn and(&mut self) -> Result<Expr, FormulaError> {
    let mut lhs = self.unary()?;
    while self.eat(&TokenKind::And) {
      let rhs = self.unary()?;
      lhs = Expr::And(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn unary(&mut self) -> Result<Expr, FormulaError> {
    if self.eat(&TokenKind::Not) {
      return Ok(Expr::Not(Box::new(self.unary()?)));
    }
    self.primary()
  }

  fn primary(&mut self) -> Result<Expr, FormulaError> {
    let token = self.peek().cloned().ok_or(FormulaError::UnexpectedEnd)?;
    self.pos += 1;

    match token.kind {
      TokenKind::Ident(name) => {
        let lower = name.to_lowercase();
        self
          .variables
          .iter()
          .position(|v| v.to_lowercase() == lower)
          .map(Expr::Var)
          .ok_or(FormulaError::UnboundToken(name))
      }
      TokenKind::Open => {
        let inner = self.or()?;
        if !self.eat(&TokenKind::Close) {
          return Err(match self.peek() {
            Some(t) => FormulaError::UnexpectedToken {
              token: t.describe(),
              position: t.position,
            },
            None => FormulaError::UnexpectedEnd,
          });
        }
        Ok(inner)
      }
      _ => Err(FormulaError::UnexpectedToken {
        token: token.describe(),
        position: token.position,
      }),
    }
  }
}

// ============================================================================
// Compiled formula
// ============================================================================

/// A validated formula ready for evaluation
///
/// Variables are indexed in declaration order; [`CompiledFormula::evaluate`]
/// takes one bool per declared variable in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFormula {
  source: String,
  variables: Vec<String>,
  expr: Expr,
}

impl CompiledFormula {
  pub fn source(&self) -> &str {
    &self.source
  }

  pub fn variables(&self) -> &[String] {
    &self.variables
  }

  /// Case-insensitive lookup of a variable's index
  pub fn variable_index(&self, name: &str) -> Option<usize> {
    let lower = name.to_lowercase();
    self.variables.iter().position(|v| v.to_lowercase() == lower)
  }

  /// Evaluate with positional values. Missing values count as false.
  pub fn evaluate(&self, values: &[bool]) -> bool {
    self.expr.eval(values)
  }

  /// Evaluate by asking for each variable's value by name
  pub fn evaluate_with(&self, mut value_of: impl FnMut(&str) -> bool) -> bool {
    let values: Vec<bool> = self.variables.iter().map(|v| value_of(v)).collect();
    self.expr.eval(&values)
  }
}

/// Validate and compile `formula` over the declared variable names
pub fn compile<S: AsRef<str>>(formula: &str, variables: &[S]) -> Result<CompiledFormula, FormulaError> {
  if formula.trim().is_empty() {
    return Err(FormulaError::Empty);
  }

  let tokens = tokenize(formula)?;
  check_parentheses(&tokens)?;

  let mut declared: Vec<String> = Vec::with_capacity(variables.len());
  for variable in variables {
    let variable = variable.as_ref().trim();
    if variable.is_empty() || !variable.chars().all(char::is_alphabetic) {
      return Err(FormulaError::InvalidVariableName(variable.to_string()));
    }
    let lower = variable.to_lowercase();
    if declared.iter().any(|d| d.to_lowercase() == lower) {
      return Err(FormulaError::DuplicateVariable(variable.to_string()));
    }
    declared.push(variable.to_string());
  }

  // Every declared variable must be mentioned in the text
  let lower_formula = formula.to_lowercase();
  if let Some(unused) = declared.iter().find(|v| !lower_formula.contains(&v.to_lowercase())) {
    return Err(FormulaError::UnusedVariable(unused.clone()));
  }

  let expr = Parser {
    tokens: &tokens,
    pos: 0,
    variables: &declared,
  }
  .parse()?;

  Ok(CompiledFormula {
    source: formula.to_string(),
    variables: declared,
    expr,
  })
}

/// Check whether `formula` compiles over `variables`, returning the reason if not
pub fn can_build<S: AsRef<str>>(formula: &str, variables: &[S]) -> Result<(), FormulaError> {
  compile(formula, variables).map(|_| ())
}
