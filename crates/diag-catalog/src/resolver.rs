//! Resolution of catalog entries into concrete invocations.

use std::collections::HashMap;

use tracing::debug;

use diag_common::{DiagError, DiagResult, RunParams};
use diag_version::{resolve as resolve_range, Resolution, Version, VersionRange};

use crate::config::{Catalog, Category, OsId};

/// A concrete, ready-to-run invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// A child process: program plus arguments.
    Exec { program: String, args: Vec<String> },
    /// A REST call path handed to the caller's fetcher.
    Rest { path: String },
}

/// A catalog entry resolved for a specific OS, version, and parameter set.
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub id: String,
    pub category: Category,
    /// Output subdirectory inside the working directory.
    pub subdir: String,
    /// Output file extension, including the leading dot.
    pub extension: String,
    pub retries: u32,
    pub invocation: Invocation,
}

impl ResolvedCommand {
    /// Relative output path for this command's captured output.
    pub fn output_rel_path(&self) -> String {
        format!("{}/{}{}", self.subdir, self.id, self.extension)
    }
}

/// An entry that did not yield a command, with the reason recorded.
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub id: String,
    pub reason: String,
}

/// The full result of resolving a catalog.
#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    /// Commands in catalog order.
    pub commands: Vec<ResolvedCommand>,
    /// Entries that do not apply, in catalog order.
    pub skipped: Vec<SkippedEntry>,
}

/// Resolve every catalog entry against the target OS, product version, and
/// substitution parameters.
///
/// Entries with no matching template are recorded as skipped, never
/// dropped. A template set where more than one range matches is a catalog
/// defect and fails the whole resolution.
pub fn resolve(
    catalog: &Catalog,
    os: OsId,
    version: &Version,
    params: &RunParams,
) -> DiagResult<ResolveOutcome> {
    let substitutions = params.substitutions();
    let mut outcome = ResolveOutcome::default();

    for entry in &catalog.entries {
        let templates = entry.templates_for(os);
        if templates.is_empty() {
            outcome.skipped.push(SkippedEntry {
                id: entry.id.clone(),
                reason: format!("no templates for os {os}"),
            });
            continue;
        }

        let mut ranges = Vec::with_capacity(templates.len());
        for vt in templates {
            let range =
                VersionRange::parse(&vt.range, vt.template.as_str()).map_err(|err| {
                    DiagError::configuration(format!(
                        "entry '{}': invalid range {:?}: {err}",
                        entry.id, vt.range
                    ))
                })?;
            ranges.push(range);
        }

        let template = match resolve_range(version, &ranges) {
            Resolution::Match(range) => range.payload.as_str(),
            Resolution::NoMatch => {
                debug!(id = %entry.id, %version, "No template for version");
                outcome.skipped.push(SkippedEntry {
                    id: entry.id.clone(),
                    reason: format!("no template for version {version}"),
                });
                continue;
            }
            Resolution::Ambiguous { first, second } => {
                return Err(DiagError::configuration(format!(
                    "entry '{}': ranges {:?} and {:?} both match version {version}",
                    entry.id, first.expression, second.expression
                )));
            }
        };

        let substituted = substitute(template, &substitutions);
        if let Some(placeholder) = unresolved_placeholder(&substituted) {
            outcome.skipped.push(SkippedEntry {
                id: entry.id.clone(),
                reason: format!("unresolved placeholder {{{{{placeholder}}}}}"),
            });
            continue;
        }

        let invocation = match entry.category {
            Category::Rest => Invocation::Rest { path: substituted },
            Category::Syscall => {
                let mut parts = substituted.split_whitespace().map(str::to_string);
                match parts.next() {
                    Some(program) => Invocation::Exec {
                        program,
                        args: parts.collect(),
                    },
                    None => {
                        outcome.skipped.push(SkippedEntry {
                            id: entry.id.clone(),
                            reason: "empty command after substitution".to_string(),
                        });
                        continue;
                    }
                }
            }
        };

        outcome.commands.push(ResolvedCommand {
            id: entry.id.clone(),
            category: entry.category,
            subdir: entry.subdir().to_string(),
            extension: entry.extension().to_string(),
            retries: entry.retries,
            invocation,
        });
    }

    debug!(
        commands = outcome.commands.len(),
        skipped = outcome.skipped.len(),
        "Catalog resolved"
    );
    Ok(outcome)
}

/// Replace every known `{{KEY}}` placeholder.
fn substitute(template: &str, substitutions: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in substitutions {
        result = result.replace(&format!("{{{{{key}}}}}"), value);
    }
    result
}

/// The first `{{...}}` placeholder still present, if any.
fn unresolved_placeholder(text: &str) -> Option<&str> {
    let start = text.find("{{")?;
    let rest = &text[start + 2..];
    let end = rest.find("}}")?;
    Some(&rest[..end])
}
