// SPDX-License-Identifier: MIT

//! Prompt template parser
//!
//! Parses templates like:
//! - `Tell me about {topic}`
//! - `Grade this {input} given {#notes}` (`#` marks a metavariable)
//! - `Literal \{braces\} stay literal`

/// A piece of a parsed template
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text, escape sequences kept as written
    Text(String),
    /// `{name}`
    Var(String),
    /// `{#name}`
    MetaVar(String),
}

/// A parsed prompt template
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template. Unbalanced or empty braces are kept as text.
    pub fn parse(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if c == '\\' && matches!(chars.get(i + 1), Some('{') | Some('}')) {
                text.push(c);
                text.push(chars[i + 1]);
                i += 2;
                continue;
            }

            if c == '{' {
                if let Some(close) = find_close(&chars, i + 1) {
                    let name: String = chars[i + 1..close].iter().collect();
                    let segment = match name.strip_prefix('#') {
                        Some(meta) if !meta.is_empty() => Some(Segment::MetaVar(meta.to_string())),
                        Some(_) => None,
                        None if !name.is_empty() => Some(Segment::Var(name)),
                        None => None,
                    };
                    if let Some(segment) = segment {
                        if !text.is_empty() {
                            segments.push(Segment::Text(std::mem::take(&mut text)));
                        }
                        segments.push(segment);
                        i = close + 1;
                        continue;
                    }
                }
            }

            text.push(c);
            i += 1;
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Self {
            source: input.to_string(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Distinct `{var}` names in order of first use
    pub fn var_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for segment in &self.segments {
            if let Segment::Var(name) = segment {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Distinct `{#meta}` names in order of first use
    pub fn metavar_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for segment in &self.segments {
            if let Segment::MetaVar(name) = segment {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Render with a lookup `(name, is_meta) -> value`; unresolved
    /// references are written back unchanged
    pub fn render<F>(&self, lookup: F) -> String
    where
        F: Fn(&str, bool) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(name) => match lookup(name, false) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                },
                Segment::MetaVar(name) => match lookup(name, true) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("{#");
                        out.push_str(name);
                        out.push('}');
                    }
                },
            }
        }
        out
    }
}

/// Index of the `}` closing a reference opened just before `start`
fn find_close(chars: &[char], start: usize) -> Option<usize> {
    for (offset, c) in chars[start..].iter().enumerate() {
        match c {
            '}' => return Some(start + offset),
            '{' | '\\' => return None,
            _ => {}
        }
    }
    None
}
