// SPDX-License-Identifier: MIT

//! Prompt templates
//!
//! `{var}` references are filled from pulled bindings, `{#meta}`
//! references from the metadata of the values used. `\{` and `\}` are
//! literal braces.

mod parser;
mod permute;

pub use parser::{PromptTemplate, Segment};
pub use permute::{generate_prompts, FilledPrompt};

/// Escape every unescaped brace so the text is never read as a template
pub fn escape_braces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_backslash = false;
    for c in text.chars() {
        if (c == '{' || c == '}') && !prev_backslash {
            out.push('\\');
        }
        out.push(c);
        prev_backslash = c == '\\' && !prev_backslash;
    }
    out
}

/// Turn `\{` and `\}` back into plain braces
pub fn unescape_braces(text: &str) -> String {
    text.replace("\\{", "{").replace("\\}", "}")
}
