//! Structural queries over the content tree.
//!
//! A small path language: `/home/page` walks children from the roots,
//! `//news-item` matches at any depth, `*` matches any content type alias and
//! predicates filter on attributes (`[@id=3]`, `[@name='About']`,
//! `[@level=2]`, `[@key='…']`, `[@sortOrder=0]`) or property values
//! (`[title='Hello']`).

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use super::projection::ProjectedContent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,
    #[error("query must start with `/` or `//`")]
    Relative,
    #[error("expected {expected} at position {position}")]
    Expected {
        expected: &'static str,
        position: usize,
    },
    #[error("unknown attribute `@{name}` at position {position}")]
    UnknownAttribute { name: String, position: usize },
    #[error("attribute `@{name}` needs a number at position {position}")]
    NotANumber { name: &'static str, position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    Any,
    Alias(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Id(i64),
    Name(String),
    Level(i64),
    Key(String),
    SortOrder(i64),
    Property { alias: String, value: Literal },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Predicate>,
}

impl Step {
    pub fn matches(&self, content: &ProjectedContent) -> bool {
        let type_matches = match &self.test {
            NodeTest::Any => true,
            NodeTest::Alias(alias) => content.content_type_alias.eq_ignore_ascii_case(alias),
        };
        type_matches
            && self
                .predicates
                .iter()
                .all(|predicate| predicate.matches(content))
    }
}

impl Predicate {
    fn matches(&self, content: &ProjectedContent) -> bool {
        match self {
            Predicate::Id(id) => i64::from(content.id.get()) == *id,
            Predicate::Name(name) => content.name == *name,
            Predicate::Level(level) => i64::try_from(content.level).is_ok_and(|l| l == *level),
            Predicate::Key(key) => content.key.to_string().eq_ignore_ascii_case(key),
            Predicate::SortOrder(order) => i64::from(content.sort_order) == *order,
            Predicate::Property { alias, value } => match (content.values.get(alias), value) {
                (Some(Value::String(actual)), Literal::Text(expected)) => actual == expected,
                (Some(Value::Number(actual)), Literal::Number(expected)) => {
                    actual.as_i64() == Some(*expected)
                }
                (Some(Value::Bool(actual)), Literal::Text(expected)) => {
                    actual.to_string() == *expected
                }
                (Some(Value::Number(actual)), Literal::Text(expected)) => {
                    actual.to_string() == *expected
                }
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    steps: Vec<Step>,
}

impl Query {
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        Parser::new(input).parse()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            f.write_str(match step.axis {
                Axis::Child => "/",
                Axis::Descendant => "//",
            })?;
            match &step.test {
                NodeTest::Any => f.write_str("*")?,
                NodeTest::Alias(alias) => f.write_str(alias)?,
            }
            for predicate in &step.predicates {
                match predicate {
                    Predicate::Id(id) => write!(f, "[@id={id}]")?,
                    Predicate::Name(name) => write!(f, "[@name='{name}']")?,
                    Predicate::Level(level) => write!(f, "[@level={level}]")?,
                    Predicate::Key(key) => write!(f, "[@key='{key}']")?,
                    Predicate::SortOrder(order) => write!(f, "[@sortOrder={order}]")?,
                    Predicate::Property {
                        alias,
                        value: Literal::Number(n),
                    } => write!(f, "[{alias}={n}]")?,
                    Predicate::Property {
                        alias,
                        value: Literal::Text(text),
                    } => write!(f, "[{alias}='{text}']")?,
                }
            }
        }
        Ok(())
    }
}

struct Parser<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    fn parse(mut self) -> Result<Query, QueryError> {
        self.input = self.input.trim();
        if self.input.is_empty() {
            return Err(QueryError::Empty);
        }
        if !self.input.starts_with('/') {
            return Err(QueryError::Relative);
        }

        let mut steps = Vec::new();
        while self.position < self.input.len() {
            let axis = if self.eat("//") {
                Axis::Descendant
            } else if self.eat("/") {
                Axis::Child
            } else {
                return Err(self.expected("`/`"));
            };
            let test = self.node_test()?;
            let mut predicates = Vec::new();
            while self.eat("[") {
                predicates.push(self.predicate()?);
                if !self.eat("]") {
                    return Err(self.expected("`]`"));
                }
            }
            steps.push(Step {
                axis,
                test,
                predicates,
            });
        }
        Ok(Query { steps })
    }

    fn rest(&self) -> &'a str {
        &self.input[self.position..]
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.position += token.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.position += rest.len() - rest.trim_start().len();
    }

    fn expected(&self, expected: &'static str) -> QueryError {
        QueryError::Expected {
            expected,
            position: self.position,
        }
    }

    fn identifier(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest
            .find(|ch: char| !(ch.is_alphanumeric() || ch == '-' || ch == '_'))
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.position += len;
        Some(&rest[..len])
    }

    fn node_test(&mut self) -> Result<NodeTest, QueryError> {
        if self.eat("*") {
            return Ok(NodeTest::Any);
        }
        self.identifier()
            .map(|alias| NodeTest::Alias(alias.to_string()))
            .ok_or_else(|| self.expected("a content type alias or `*`"))
    }

    fn predicate(&mut self) -> Result<Predicate, QueryError> {
        self.skip_whitespace();
        let start = self.position;
        let attribute = self.eat("@");
        let name = self
            .identifier()
            .ok_or_else(|| self.expected("an attribute or property name"))?;
        self.skip_whitespace();
        if !self.eat("=") {
            return Err(self.expected("`=`"));
        }
        self.skip_whitespace();
        let value_position = self.position;
        let value = self.literal()?;
        self.skip_whitespace();

        if !attribute {
            return Ok(Predicate::Property {
                alias: name.to_string(),
                value,
            });
        }

        let number = |name: &'static str| match &value {
            Literal::Number(n) => Ok(*n),
            Literal::Text(text) => text.parse::<i64>().map_err(|_| QueryError::NotANumber {
                name,
                position: value_position,
            }),
        };
        let text = || match &value {
            Literal::Number(n) => n.to_string(),
            Literal::Text(text) => text.clone(),
        };
        match name {
            "id" => Ok(Predicate::Id(number("id")?)),
            "level" => Ok(Predicate::Level(number("level")?)),
            "sortOrder" => Ok(Predicate::SortOrder(number("sortOrder")?)),
            "name" => Ok(Predicate::Name(text())),
            "key" => Ok(Predicate::Key(text())),
            other => Err(QueryError::UnknownAttribute {
                name: other.to_string(),
                position: start,
            }),
        }
    }

    fn literal(&mut self) -> Result<Literal, QueryError> {
        for quote in ['\'', '"'] {
            if self.rest().starts_with(quote) {
                let body = &self.rest()[1..];
                let Some(end) = body.find(quote) else {
                    return Err(self.expected("a closing quote"));
                };
                let text = body[..end].to_string();
                self.position += end + 2;
                return Ok(Literal::Text(text));
            }
        }

        let rest = self.rest();
        let len = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '-'))
            .unwrap_or(rest.len());
        rest[..len]
            .parse::<i64>()
            .map(|n| {
                self.position += len;
                Literal::Number(n)
            })
            .map_err(|_| self.expected("a number or quoted string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_axes_tests_and_predicates() {
        let query = Query::parse("/home//news-item[@level=3][title='Launch']/*").expect("parse");
        let steps = query.steps();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].axis, Axis::Child);
        assert_eq!(steps[0].test, NodeTest::Alias("home".to_string()));
        assert_eq!(steps[1].axis, Axis::Descendant);
        assert_eq!(
            steps[1].predicates,
            vec![
                Predicate::Level(3),
                Predicate::Property {
                    alias: "title".to_string(),
                    value: Literal::Text("Launch".to_string()),
                },
            ]
        );
        assert_eq!(steps[2].test, NodeTest::Any);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let text = "//page[@id=4][@name='About us']/*[@sortOrder=0]";
        let query = Query::parse(text).expect("parse");
        assert_eq!(query.to_string(), text);
    }

    #[test]
    fn errors_carry_positions() {
        assert_eq!(Query::parse(""), Err(QueryError::Empty));
        assert_eq!(Query::parse("home"), Err(QueryError::Relative));
        assert_eq!(
            Query::parse("/home[@colour='red']"),
            Err(QueryError::UnknownAttribute {
                name: "colour".to_string(),
                position: 6,
            })
        );
        assert_eq!(
            Query::parse("/home[@id='x']"),
            Err(QueryError::NotANumber {
                name: "id",
                position: 10,
            })
        );
        assert!(matches!(
            Query::parse("/home[@id=1"),
            Err(QueryError::Expected { expected: "`]`", .. })
        ));
        assert!(matches!(
            Query::parse("/"),
            Err(QueryError::Expected { position: 1, .. })
        ));
    }
}
