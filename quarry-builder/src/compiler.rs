//! The module compiler seam and the shipped command-driven implementation.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::enumerate::Enumeration;
use crate::error::{io_err, BuildError};
use crate::model::{Branch, DefRef, ModuleRef};
use crate::problems::ProblemHandler;
use crate::progress::ProgressHandle;

pub const BUILD_FILE: &str = "build.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildAction {
    Build,
    CleanAndBuild,
}

impl BuildAction {
    pub fn from_clean_flag(clean: bool) -> Self {
        if clean {
            BuildAction::CleanAndBuild
        } else {
            BuildAction::Build
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildAction::Build => "build",
            BuildAction::CleanAndBuild => "clean_build",
        }
    }
}

/// Compiles the modules of an enumerated branch.
///
/// Implementations announce each module with `Build module: <name>: ` and
/// record compiler problems; an `Err` means the build could not run at all.
pub trait ModuleCompiler {
    fn execute(
        &mut self,
        branch: &Branch,
        plan: &Enumeration,
        action: BuildAction,
        progress: &mut dyn ProgressHandle,
        problems: &mut ProblemHandler,
    ) -> Result<(), BuildError>;
}

/// `<root>/build.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildConfig {
    /// Program and arguments run once per (environment, module).
    #[serde(default)]
    pub command: Vec<String>,
}

impl BuildConfig {
    /// Missing file = no command.
    pub fn load(root: &Path) -> Result<Self, BuildError> {
        let path = root.join(BUILD_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|source| BuildError::Parse { path: path.clone(), source })?;
        if config.command.first().is_some_and(|program| program.trim().is_empty()) {
            return Err(BuildError::InvalidConfig {
                path,
                message: "command program is empty".to_string(),
            });
        }
        Ok(config)
    }
}

/// Runs `build.yaml`'s command per module, or checks definition sources
/// exist when no command is configured.
///
/// The command gets `QUARRY_MODULE`, `QUARRY_MODULE_DIR`, `QUARRY_ENV` and
/// `QUARRY_ACTION`. Stderr lines starting with `warning: ` are warnings; on a
/// non-zero exit every other stderr line is an error.
#[derive(Debug, Clone, Default)]
pub struct CommandCompiler {
    config: BuildConfig,
}

impl CommandCompiler {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn from_root(root: &Path) -> Result<Self, BuildError> {
        BuildConfig::load(root).map(Self::new)
    }

    fn run_command(
        &self,
        program: &str,
        args: &[String],
        unit: &Unit<'_>,
        problems: &mut ProblemHandler,
    ) -> Result<(), BuildError> {
        let output = Command::new(program)
            .args(args)
            .current_dir(unit.branch.root())
            .env("QUARRY_MODULE", &unit.name)
            .env("QUARRY_MODULE_DIR", &unit.dir)
            .env("QUARRY_ENV", &unit.env)
            .env("QUARRY_ACTION", unit.action.as_str())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| io_err(program, e))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut errors = 0usize;
        for line in stderr.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            if let Some(warning) = line.strip_prefix("warning: ") {
                problems.warning(&unit.source, warning);
            } else if !output.status.success() {
                problems.error(&unit.source, line);
                errors += 1;
            } else {
                tracing::debug!(module = %unit.name, "{line}");
            }
        }
        if !output.status.success() && errors == 0 {
            problems.error(&unit.source, format!("build command failed: {}", output.status));
        }
        Ok(())
    }

    fn verify_sources(&self, unit: &Unit<'_>, defs: &[DefRef], problems: &mut ProblemHandler) {
        for at in defs {
            let def = unit.branch.definition(*at);
            let Some(source) = &def.source else {
                continue;
            };
            if !unit.branch.root().join(source).is_file() {
                problems.error(
                    &unit.source,
                    format!("{}: source file not found: {}", def.name, source.display()),
                );
            }
        }
    }
}

/// One (environment, module) compilation unit.
struct Unit<'a> {
    branch: &'a Branch,
    env: String,
    action: BuildAction,
    name: String,
    source: String,
    dir: PathBuf,
}

impl<'a> Unit<'a> {
    fn new(branch: &'a Branch, env: String, action: BuildAction, module: ModuleRef) -> Self {
        Self {
            branch,
            env,
            action,
            name: branch.module(module).name.clone(),
            source: branch.qualified_name(module),
            dir: branch.module_dir(module),
        }
    }
}

impl ModuleCompiler for CommandCompiler {
    fn execute(
        &mut self,
        branch: &Branch,
        plan: &Enumeration,
        action: BuildAction,
        progress: &mut dyn ProgressHandle,
        problems: &mut ProblemHandler,
    ) -> Result<(), BuildError> {
        for (env, modules) in &plan.environments {
            for (module, defs) in modules {
                let unit = Unit::new(branch, env.to_string(), action, *module);
                progress.set_display_name(&format!("Build module: {}: ", unit.name));
                match self.config.command.split_first() {
                    Some((program, args)) => self.run_command(program, args, &unit, problems)?,
                    None => self.verify_sources(&unit, defs, problems),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::enumerate;
    use quarry_core::RuntimeEnvironment;
    use tempfile::TempDir;

    struct Names(Vec<String>);

    impl ProgressHandle for Names {
        fn set_display_name(&mut self, name: &str) {
            self.0.push(name.to_string());
        }
    }

    const BRANCH: &str = r#"
layers:
  - uri: app
    modules:
      - id: m1
        name: Orders
        definitions:
          - { id: a, name: Order, kind: class, source: app/Orders/Order.src }
      - id: m2
        name: Billing
        definitions:
          - { id: b, name: Invoice, kind: class, source: app/Billing/Invoice.src }
"#;

    fn branch_at(dir: &Path) -> Branch {
        fs::write(dir.join("branch.yaml"), BRANCH).unwrap();
        fs::create_dir_all(dir.join("app/Orders")).unwrap();
        fs::write(dir.join("app/Orders/Order.src"), "class Order").unwrap();
        Branch::load(dir).unwrap()
    }

    fn run(compiler: &mut CommandCompiler, branch: &Branch) -> (Vec<String>, ProblemHandler) {
        let plan = enumerate(branch, &[RuntimeEnvironment::Common].into_iter().collect());
        let mut names = Names(vec![]);
        let mut problems = ProblemHandler::default();
        compiler
            .execute(branch, &plan, BuildAction::Build, &mut names, &mut problems)
            .unwrap();
        (names.0, problems)
    }

    #[test]
    fn missing_sources_are_errors_without_command() {
        let dir = TempDir::new().unwrap();
        let branch = branch_at(dir.path());
        let (names, problems) = run(&mut CommandCompiler::default(), &branch);

        assert_eq!(names, ["Build module: Orders: ", "Build module: Billing: "]);
        assert_eq!(problems.errors_count(), 1);
        assert_eq!(problems.problems()[0].source, "app::Billing");
        assert!(problems.problems()[0].message.contains("Invoice.src"));
    }

    #[cfg(unix)]
    #[test]
    fn command_output_is_classified() {
        let dir = TempDir::new().unwrap();
        let branch = branch_at(dir.path());
        let script = r#"echo "warning: slow $QUARRY_MODULE" >&2; if [ "$QUARRY_MODULE" = Billing ]; then echo "type mismatch in $QUARRY_ENV" >&2; exit 3; fi"#;
        let mut compiler = CommandCompiler::new(BuildConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
        });
        let (_, problems) = run(&mut compiler, &branch);

        assert_eq!(problems.warnings_count(), 2);
        assert_eq!(problems.errors_count(), 1);
        let error = problems
            .problems()
            .iter()
            .find(|p| p.severity == crate::problems::Severity::Error)
            .unwrap();
        assert_eq!(error.source, "app::Billing");
        assert_eq!(error.message, "type mismatch in common");
    }

    #[test]
    fn build_file_is_optional() {
        let dir = TempDir::new().unwrap();
        assert_eq!(BuildConfig::load(dir.path()).unwrap(), BuildConfig::default());

        fs::write(dir.path().join(BUILD_FILE), "command: [make, -s]\n").unwrap();
        assert_eq!(BuildConfig::load(dir.path()).unwrap().command, ["make", "-s"]);
    }
}
