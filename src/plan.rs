//! Test plan files
//!
//! A plan lists the tests of a campaign, one per line:
//!
//! ```text
//! # test, subtest, consoles, required consoles, state
//! hcalls,none,2,1,enabled
//! linux,e1000,3,2,disabled
//! ```
//!
//! Text after `#` is a comment. Lines that do not split into exactly five comma-separated fields are ignored, as
//! are blank lines. Any state other than `enabled` disables the test.

use std::path::Path;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::coordinator::TestSpec;

/// State keyword that enables a plan entry.
pub const ENABLED: &str = "enabled";

#[derive(Debug, Error, Diagnostic)]
pub enum PlanError {
    #[error("cannot read test plan {path}")]
    #[diagnostic(code(hvharness::plan::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {field} must be a whole number, found `{value}`")]
    #[diagnostic(
        code(hvharness::plan::count),
        help("plan lines are `test,subtest|none,consoles,required,enabled|disabled`")
    )]
    BadCount {
        line: usize,
        field: &'static str,
        value: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("not a number")]
        span: SourceSpan,
    },
}

/// One test of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// 1-based line number in the plan file.
    pub line: usize,
    pub name: String,
    /// Subtest as written; `none` means no subtest.
    pub subtest: String,
    pub console_count: usize,
    pub required_console_count: usize,
    pub enabled: bool,
}

impl PlanEntry {
    /// Test spec for running this entry on `target`. Quorum checks happen when the spec is validated.
    pub fn to_spec(&self, target: &str) -> TestSpec {
        TestSpec::new(
            &self.name,
            &self.subtest,
            self.console_count,
            self.required_console_count,
            target,
        )
    }

    /// `name` or `name-subtest`.
    pub fn full_name(&self) -> String {
        crate::coordinator::full_name(&self.name, &self.subtest)
    }

    /// State column as it would be written back.
    pub fn state(&self) -> &'static str {
        if self.enabled { ENABLED } else { "disabled" }
    }
}

/// Parse plan text. `origin` names the plan in diagnostics.
pub fn parse_plan(text: &str, origin: &str) -> Result<Vec<PlanEntry>, PlanError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    for (index, raw) in text.split_inclusive('\n').enumerate() {
        let line_start = offset;
        offset += raw.len();

        let content = raw.split('#').next().unwrap_or("").trim_end();
        let fields = split_fields(content);
        if fields.len() != 5 {
            continue;
        }
        let count = |(at, value): (usize, &str), field: &'static str| {
            value.parse::<usize>().map_err(|_| PlanError::BadCount {
                line: index + 1,
                field,
                value: value.to_string(),
                src: NamedSource::new(origin, text.to_string()),
                span: (line_start + at, value.len().max(1)).into(),
            })
        };
        entries.push(PlanEntry {
            line: index + 1,
            name: fields[0].1.to_string(),
            subtest: fields[1].1.to_string(),
            console_count: count(fields[2], "console count")?,
            required_console_count: count(fields[3], "required console count")?,
            enabled: fields[4].1 == ENABLED,
        });
    }
    Ok(entries)
}

/// Read and parse a plan file.
pub fn read_plan(path: &Path) -> Result<Vec<PlanEntry>, PlanError> {
    let origin = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
        path: origin.clone(),
        source,
    })?;
    parse_plan(&text, &origin)
}

/// Comma-separated fields with their byte offset in the line, surrounding whitespace trimmed.
fn split_fields(line: &str) -> Vec<(usize, &str)> {
    let mut fields = Vec::new();
    let mut start = 0;
    for piece in line.split(',') {
        let trimmed = piece.trim();
        let lead = piece.len() - piece.trim_start().len();
        fields.push((start + lead, trimmed));
        start += piece.len() + 1;
    }
    fields
}
