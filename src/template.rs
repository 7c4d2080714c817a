//! `{name}` / `{name:strftime}` placeholder rendering for paths, filename patterns,
//! URLs and command lines.
//!
//! `{{` and `}}` produce literal braces. Placeholders without a value in the
//! context are emitted verbatim, so regex quantifiers such as `\d{3}` survive.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Text(String),
    Time(DateTime<Utc>),
}

#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, TemplateValue>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values
            .insert(name.to_string(), TemplateValue::Text(value.into()));
        self
    }

    pub fn with_time(mut self, name: &str, value: DateTime<Utc>) -> Self {
        self.values
            .insert(name.to_string(), TemplateValue::Time(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.values.get(name)
    }
}

pub fn render(template: &str, context: &TemplateContext) -> String {
    render_with(template, context, |value| value.to_string())
}

pub fn render_with<E>(template: &str, context: &TemplateContext, escape: E) -> String
where
    E: Fn(&str) -> String,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        let field = &tail[1..close];
        match substitute(field, context) {
            Some(value) => out.push_str(&escape(&value)),
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    out
}

fn substitute(field: &str, context: &TemplateContext) -> Option<String> {
    let (name, spec) = match field.split_once(':') {
        Some((name, spec)) => (name, Some(spec)),
        None => (field, None),
    };
    match context.get(name)? {
        TemplateValue::Text(text) => Some(text.clone()),
        TemplateValue::Time(time) => format_time(*time, spec.unwrap_or(DEFAULT_TIME_FORMAT)),
    }
}

fn format_time(time: DateTime<Utc>, spec: &str) -> Option<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(spec).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }
    let mut out = String::new();
    write!(out, "{}", time.format_with_items(items.into_iter())).ok()?;
    Some(out)
}
