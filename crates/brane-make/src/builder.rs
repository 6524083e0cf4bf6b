//! Depth-first dependency walk.

use std::collections::HashMap;

use futures::{FutureExt, future::BoxFuture};

use crate::{
    config::BuildOptions,
    error::MakeError,
    runner::CommandRunner,
    target::{BuildContext, Target},
};

/// Deepest dependency chain followed before giving up.
///
/// The walk has no cycle detection; a cycle ends here.
pub const MAX_DEPTH: usize = 64;

/// Builds targets from a static table.
pub struct Builder<R> {
    targets: Vec<Target>,
    index: HashMap<String, usize>,
    runner: R,
    options: BuildOptions,
}

impl<R: CommandRunner> Builder<R> {
    pub fn new(targets: Vec<Target>, runner: R, options: BuildOptions) -> Self {
        let index = targets
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        Self {
            targets,
            index,
            runner,
            options,
        }
    }

    /// All targets in table order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Look up a target by id.
    ///
    /// # Errors
    /// Returns error if no target has that id.
    pub fn get(&self, id: &str) -> Result<&Target, MakeError> {
        self.index
            .get(id)
            .map(|&i| &self.targets[i])
            .ok_or_else(|| MakeError::UnknownTarget(id.to_string()))
    }

    /// Build `id` after its dependencies; returns whether anything changed.
    ///
    /// # Errors
    /// Returns the first failing step, or `RecursionLimit` on a cycle.
    pub async fn build(&self, id: &str) -> Result<bool, MakeError> {
        let ctx = BuildContext::new(&self.runner, self.options);
        self.resolve(id, &ctx, 0).await
    }

    fn resolve<'a>(
        &'a self,
        id: &'a str,
        ctx: &'a BuildContext<'a>,
        depth: usize,
    ) -> BoxFuture<'a, Result<bool, MakeError>> {
        async move {
            if depth >= MAX_DEPTH {
                return Err(MakeError::RecursionLimit {
                    target: id.to_string(),
                    depth: MAX_DEPTH,
                });
            }
            let target = self.get(id)?;

            let mut changed = self.options.force;
            for dep in &target.deps {
                changed |= self.resolve(dep, ctx, depth + 1).await?;
            }

            if changed || target.is_outdated(ctx).await? {
                tracing::info!(target = %id, "Building");
                Ok(target.build(ctx).await? || changed)
            } else {
                tracing::debug!(target = %id, "Up to date");
                Ok(false)
            }
        }
        .boxed()
    }
}
