use crate::context::TaskContext;
use crate::error::TaskError;
use crate::task::{ChildTask, Task};

/// Runs child tasks strictly in order, splitting progress evenly.
///
/// The first failure or cancellation aborts the remaining children.
pub struct GroupTask {
    title: String,
    children: Vec<Box<dyn ChildTask>>,
}

impl GroupTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            children: Vec::new(),
        }
    }

    pub fn with(mut self, child: impl ChildTask + 'static) -> Self {
        self.children.push(Box::new(child));
        self
    }

    pub fn push(&mut self, child: Box<dyn ChildTask>) {
        self.children.push(child);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Task for GroupTask {
    type Output = ();

    fn title(&self) -> String {
        self.title.clone()
    }

    fn pausable(&self) -> bool {
        self.children.iter().any(|child| child.pausable())
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let count = self.children.len();
        for (index, child) in self.children.iter_mut().enumerate() {
            if let Err(err) = ctx.check_cancelled() {
                tracing::info!(
                    group = %self.title,
                    skipped = count - index,
                    "group cancelled, skipping remaining children",
                );
                return Err(err);
            }
            tracing::debug!(group = %self.title, child = %child.title(), "starting child task");
            if let Err(err) = child.run(&ctx.scoped(index, count)) {
                let skipped = count - index - 1;
                if skipped > 0 {
                    tracing::info!(
                        group = %self.title,
                        child = %child.title(),
                        skipped,
                        "child did not finish, skipping remaining children",
                    );
                }
                return Err(err);
            }
        }
        ctx.set_progress(100, &self.title);
        Ok(())
    }
}
