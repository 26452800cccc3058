//! Middleware pipelines around sending and receiving.
//!
//! A pipeline is an ordered list of [`PipelineStep`]s. Each step gets the context and a
//! [`Next`] continuation: it may work before or after calling `next.run(ctx)`, skip it
//! to short-circuit, or return an error. The bus appends one built-in terminal step to
//! each of the four pipelines when it is built; user steps always run first, in the order
//! they were added.

pub mod incoming;
pub mod outgoing;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusResult;

pub use incoming::{ClassifyEnvelopeStep, DispatchMessageStep, IncomingEnvelopeContext, IncomingMessageContext};
pub use outgoing::{CreateEnvelopesStep, OutgoingEnvelopeContext, OutgoingMessageContext, TransportSendStep};

#[async_trait]
pub trait PipelineStep<C: Send + 'static>: Send + Sync {
    /// Name shown in the start-up summary.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    async fn invoke(&self, context: &mut C, next: Next<'_, C>) -> BusResult<()>;
}

/// The rest of the pipeline after the current step.
pub struct Next<'a, C: Send + 'static> {
    remaining: &'a [Arc<dyn PipelineStep<C>>],
}

impl<'a, C: Send + 'static> Next<'a, C> {
    pub async fn run(self, context: &mut C) -> BusResult<()> {
        match self.remaining.split_first() {
            Some((step, rest)) => step.invoke(context, Next { remaining: rest }).await,
            None => Ok(()),
        }
    }
}

pub struct Pipeline<C: Send + 'static> {
    steps: Vec<Arc<dyn PipelineStep<C>>>,
}

impl<C: Send + 'static> Clone for Pipeline<C> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
        }
    }
}

impl<C: Send + 'static> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> Pipeline<C> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append `step`. Adding an instance that is already present does nothing.
    pub fn add(&mut self, step: Arc<dyn PipelineStep<C>>) -> &mut Self {
        if !self.steps.iter().any(|s| Arc::ptr_eq(s, &step)) {
            self.steps.push(step);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// A copy of this pipeline ending in `terminal`.
    pub fn terminated_by(&self, terminal: Arc<dyn PipelineStep<C>>) -> Self {
        let mut composed = self.clone();
        composed.steps.push(terminal);
        composed
    }

    pub async fn execute(&self, context: &mut C) -> BusResult<()> {
        Next {
            remaining: &self.steps,
        }
        .run(context)
        .await
    }
}
