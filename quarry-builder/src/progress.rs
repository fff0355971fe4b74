//! Translating compiler progress into notifier calls.

use std::collections::HashSet;

use quarry_daemon::{DaemonError, NotifierClient};

/// Sink for everything the worker tells its controller.
pub trait Reporter {
    fn description(&self, text: &str);
    fn set_status(&self, text: &str);
    fn set_progress(&self, percent: u8);
    /// Block while the controller holds the job paused.
    fn wait_while_paused(&self);
    fn error(&self, cause: &str);
    fn finished(&self) -> Result<(), DaemonError>;
    fn failed(&self, cause: &str) -> Result<(), DaemonError>;
}

impl Reporter for NotifierClient {
    fn description(&self, text: &str) {
        NotifierClient::description(self, text);
    }

    fn set_status(&self, text: &str) {
        NotifierClient::set_status(self, text);
    }

    fn set_progress(&self, percent: u8) {
        NotifierClient::set_progress(self, percent);
    }

    fn wait_while_paused(&self) {
        NotifierClient::wait_while_paused(self);
    }

    fn error(&self, cause: &str) {
        NotifierClient::error(self, cause);
    }

    fn finished(&self) -> Result<(), DaemonError> {
        NotifierClient::finished(self)
    }

    fn failed(&self, cause: &str) -> Result<(), DaemonError> {
        NotifierClient::failed(self, cause)
    }
}

/// Display-name updates from the module compiler.
pub trait ProgressHandle {
    fn set_display_name(&mut self, name: &str);
}

const MODULE_PREFIX: &str = "Build module: ";
const MODULE_SUFFIX: &str = ": ";

/// Module name from a `Build module: <name>: ` display name.
pub fn module_started(name: &str) -> Option<&str> {
    name.strip_prefix(MODULE_PREFIX)?.strip_suffix(MODULE_SUFFIX)
}

/// Turns each first `Build module: <name>: ` into a status/progress pair
/// over a fixed module count; everything else becomes status text.
pub struct ModuleProgress<'a> {
    reporter: &'a dyn Reporter,
    total: usize,
    built: HashSet<String>,
}

impl<'a> ModuleProgress<'a> {
    pub fn new(reporter: &'a dyn Reporter, total: usize) -> Self {
        Self {
            reporter,
            total: total.max(1),
            built: HashSet::new(),
        }
    }

    pub fn built(&self) -> usize {
        self.built.len()
    }
}

impl ProgressHandle for ModuleProgress<'_> {
    fn set_display_name(&mut self, name: &str) {
        match module_started(name) {
            Some(module) if self.built.insert(module.to_string()) => {
                self.reporter.wait_while_paused();
                let percent = (100 * self.built.len() / self.total).min(100) as u8;
                self.reporter.set_status(module);
                self.reporter.set_progress(percent);
            }
            _ => self.reporter.set_status(name),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Description(String),
        Status(String),
        Progress(u8),
        Paused,
        Error(String),
        Finished,
        Failed(String),
    }

    /// Records calls in order.
    #[derive(Default)]
    pub struct Recorder {
        pub calls: RefCell<Vec<Call>>,
    }

    impl Recorder {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        fn push(&self, call: Call) {
            self.calls.borrow_mut().push(call);
        }
    }

    impl Reporter for Recorder {
        fn description(&self, text: &str) {
            self.push(Call::Description(text.into()));
        }

        fn set_status(&self, text: &str) {
            self.push(Call::Status(text.into()));
        }

        fn set_progress(&self, percent: u8) {
            self.push(Call::Progress(percent));
        }

        fn wait_while_paused(&self) {
            self.push(Call::Paused);
        }

        fn error(&self, cause: &str) {
            self.push(Call::Error(cause.into()));
        }

        fn finished(&self) -> Result<(), DaemonError> {
            self.push(Call::Finished);
            Ok(())
        }

        fn failed(&self, cause: &str) -> Result<(), DaemonError> {
            self.push(Call::Failed(cause.into()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Call, Recorder};
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Build module: Orders: ", Some("Orders"))]
    #[case("Build module: : ", Some(""))]
    #[case("Build module: Orders", None)]
    #[case("Load definitions...", None)]
    fn parses_module_start(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(module_started(name), expected);
    }

    #[test]
    fn repeated_modules_only_update_status() {
        let recorder = Recorder::default();
        let mut progress = ModuleProgress::new(&recorder, 4);
        progress.set_display_name("Build module: Orders: ");
        progress.set_display_name("Build module: Billing: ");
        progress.set_display_name("Build module: Orders: ");
        progress.set_display_name("Linking");

        assert_eq!(
            recorder.calls(),
            [
                Call::Paused,
                Call::Status("Orders".into()),
                Call::Progress(25),
                Call::Paused,
                Call::Status("Billing".into()),
                Call::Progress(50),
                Call::Status("Build module: Orders: ".into()),
                Call::Status("Linking".into()),
            ]
        );
        assert_eq!(progress.built(), 2);
    }

    #[test]
    fn progress_is_clamped_when_modules_exceed_total() {
        let recorder = Recorder::default();
        let mut progress = ModuleProgress::new(&recorder, 0);
        progress.set_display_name("Build module: A: ");
        progress.set_display_name("Build module: B: ");
        let percents: Vec<_> = recorder
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Progress(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(percents, [100, 100]);
    }
}
