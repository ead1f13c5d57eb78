//! The header map of an incoming message.
//!
//! Field names are stored lowercase, in first-seen order. Repeated fields fold by name:
//!
//! - `set-cookie` always holds a list, even for a single line
//! - names in [`COMMA_SEPARATED`] and names starting with `x-` are joined with `", "`
//! - any other name keeps the last value

use std::fmt;

/// Fields whose repeated lines are joined into one comma separated value.
pub const COMMA_SEPARATED: &[&str] = &[
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-language",
    "connection",
    "cookie",
    "pragma",
    "link",
    "www-authenticate",
    "proxy-authenticate",
    "sec-websocket-extensions",
    "sec-websocket-protocol",
];

const SET_COOKIE: &str = "set-cookie";
const EXTENSION_PREFIX: &str = "x-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(String),
    List(Vec<String>),
}

impl FieldValue {
    /// The value of a single field; `None` for a list.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Single(value) => Some(value),
            FieldValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::Single(_) => None,
            FieldValue::List(values) => Some(values),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Single(value) => f.write_str(value),
            FieldValue::List(values) => f.write_str(&values.join(", ")),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Single(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Single(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, FieldValue)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.position(name).map(|index| &self.entries[index].1)
    }

    /// The value of `name` when it is a single field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Replaces whatever `name` held.
    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        match self.position(name) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((name.to_ascii_lowercase(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.position(name).map(|index| self.entries.remove(index).1)
    }

    /// Adds one raw header line, folding it into an existing field of the same name.
    pub fn add_line(&mut self, name: &str, value: &str) {
        let field = name.to_ascii_lowercase();
        let index = self.position(&field);

        if field == SET_COOKIE {
            match index.map(|index| &mut self.entries[index].1) {
                Some(FieldValue::List(values)) => values.push(value.to_owned()),
                Some(slot) => *slot = FieldValue::List(vec![value.to_owned()]),
                None => self.entries.push((field, FieldValue::List(vec![value.to_owned()]))),
            }
            return;
        }

        if is_comma_separated(&field) {
            match index.map(|index| &mut self.entries[index].1) {
                Some(FieldValue::Single(joined)) => {
                    joined.push_str(", ");
                    joined.push_str(value);
                }
                Some(slot) => *slot = FieldValue::from(value),
                None => self.entries.push((field, FieldValue::from(value))),
            }
            return;
        }

        match index {
            Some(index) => self.entries[index].1 = FieldValue::from(value),
            None => self.entries.push((field, FieldValue::from(value))),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

fn is_comma_separated(field: &str) -> bool {
    field.starts_with(EXTENSION_PREFIX) || COMMA_SEPARATED.contains(&field)
}
