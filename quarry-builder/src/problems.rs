//! Compiler problem collection and the final build summary.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub severity: Severity,
    /// Qualified name of the offending source, e.g. `org.app::Orders`.
    pub source: String,
    pub message: String,
}

/// Problems reported by the module compiler during one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemHandler {
    problems: Vec<Problem>,
}

impl ProblemHandler {
    pub fn error(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, source.into(), message.into());
    }

    pub fn warning(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, source.into(), message.into());
    }

    fn push(&mut self, severity: Severity, source: String, message: String) {
        match severity {
            Severity::Error => tracing::error!(source = %source, "{message}"),
            Severity::Warning => tracing::warn!(source = %source, "{message}"),
        }
        self.problems.push(Problem {
            severity,
            source,
            message,
        });
    }

    pub fn errors_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warnings_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.problems
            .iter()
            .filter(|p| p.severity == severity)
            .count()
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// How the build ended, with the aggregated report when anything was reported.
    pub fn outcome(&self) -> BuildOutcome {
        let errors = self.errors_count();
        let warnings = self.warnings_count();
        if errors > 0 {
            BuildOutcome::Failed(self.summary(
                &format!("Build failed. Total errors: {errors}, total warnings: {warnings}"),
                |_| true,
            ))
        } else if warnings > 0 {
            BuildOutcome::Warnings(self.summary(
                &format!("Build finished with warnings. Total warnings: {warnings}"),
                |p| p.severity == Severity::Warning,
            ))
        } else {
            BuildOutcome::Clean
        }
    }

    /// Headline followed by `[<source>]` blocks of ` - <message>` lines,
    /// sources in lexical order.
    fn summary(&self, headline: &str, include: impl Fn(&Problem) -> bool) -> String {
        let mut by_source: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for problem in self.problems.iter().filter(|p| include(p)) {
            by_source
                .entry(problem.source.as_str())
                .or_default()
                .push(problem.message.as_str());
        }

        let mut message = headline.to_string();
        for (source, messages) in by_source {
            message.push_str("\n[");
            message.push_str(source);
            message.push_str("]\n - ");
            message.push_str(&messages.join("\n - "));
        }
        message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Clean,
    /// Only warnings; reported as a non-fatal error before `finished`.
    Warnings(String),
    /// At least one error; reported through `failed`.
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_problems_is_clean() {
        assert_eq!(ProblemHandler::default().outcome(), BuildOutcome::Clean);
    }

    #[test]
    fn errors_are_grouped_by_source() {
        let mut problems = ProblemHandler::default();
        problems.error("org.app::Orders", "unknown type Customer");
        problems.warning("org.app::Billing", "deprecated call");
        problems.error("org.app::Billing", "missing return");
        problems.error("org.app::Orders", "duplicate id");

        assert_eq!(
            problems.outcome(),
            BuildOutcome::Failed(
                "Build failed. Total errors: 3, total warnings: 1\n\
                 [org.app::Billing]\n - deprecated call\n - missing return\n\
                 [org.app::Orders]\n - unknown type Customer\n - duplicate id"
                    .to_string()
            )
        );
    }

    #[test]
    fn warnings_alone_do_not_fail() {
        let mut problems = ProblemHandler::default();
        problems.warning("org.app::Orders", "unused import");
        let BuildOutcome::Warnings(report) = problems.outcome() else {
            panic!("expected warnings outcome");
        };
        assert!(report.starts_with("Build finished with warnings. Total warnings: 1"));
        assert!(report.ends_with("[org.app::Orders]\n - unused import"));
    }
}
