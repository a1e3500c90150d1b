//! Effective chain assembly.
//!
//! Policies come from three tiers, each tagged with a [`PipelinePosition`]:
//!
//! 1. Builder: fixed by the client library ([`PipelineBuilder`](crate::PipelineBuilder))
//! 2. Client options: configured by the application ([`PipelineOptions`](crate::PipelineOptions))
//! 3. Request: attached to one operation ([`RequestContext`](crate::RequestContext))
//!
//! Within a position bucket the tiers concatenate in that order, and each tier
//! keeps its declaration order. The effective chain is:
//!
//! ```text
//! [request id] [PerCall] -> retry -> [PerRetry] [logging] [response body] -> [BeforeTransport] -> transport
//! ```

use std::sync::Arc;

use http_pipeline_core::PipelinePosition;

use crate::PipelineError;
use crate::policy::{Policy, PolicyKind};

/// A policy plus the position it asks to be inserted at.
#[derive(Clone)]
pub struct PolicyDescriptor {
    policy: Arc<dyn Policy>,
    position: PipelinePosition,
}

impl PolicyDescriptor {
    pub fn new(policy: impl Policy + 'static, position: PipelinePosition) -> Self {
        Self::from_arc(Arc::new(policy), position)
    }

    pub fn from_arc(policy: Arc<dyn Policy>, position: PipelinePosition) -> Self {
        Self { policy, position }
    }

    pub fn policy(&self) -> &Arc<dyn Policy> {
        &self.policy
    }

    pub fn position(&self) -> PipelinePosition {
        self.position
    }
}

impl std::fmt::Debug for PolicyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyDescriptor")
            .field("kind", &self.policy.kind())
            .field("position", &self.position)
            .finish()
    }
}

/// Where a set of policies came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PolicyTier {
    Builder,
    ClientOptions,
    Request,
}

impl PolicyTier {
    fn as_str(self) -> &'static str {
        match self {
            PolicyTier::Builder => "builder",
            PolicyTier::ClientOptions => "client options",
            PolicyTier::Request => "request",
        }
    }
}

/// Reject retry and transport stages supplied in a caller bucket.
pub(crate) fn check_ordinary(
    descriptors: &[PolicyDescriptor],
    tier: PolicyTier,
) -> Result<(), PipelineError> {
    for descriptor in descriptors {
        let kind = descriptor.policy.kind();
        if kind == PolicyKind::Ordinary {
            continue;
        }
        let message = format!(
            "{:?} policy supplied by the {} tier at {}; the pipeline places exactly one",
            kind,
            tier.as_str(),
            descriptor.position
        );
        return Err(match tier {
            PolicyTier::Request => PipelineError::usage(message),
            _ => PipelineError::configuration(message),
        });
    }
    Ok(())
}

/// Collects the fixed parts of a chain.
pub(crate) struct ChainBuilder {
    request_id: Option<Arc<dyn Policy>>,
    builder: Vec<PolicyDescriptor>,
    client: Vec<PolicyDescriptor>,
    retry: Option<Arc<dyn Policy>>,
    per_retry_system: Vec<Arc<dyn Policy>>,
    transport: Option<Arc<dyn Policy>>,
}

impl ChainBuilder {
    pub(crate) fn new() -> Self {
        Self {
            request_id: None,
            builder: Vec::new(),
            client: Vec::new(),
            retry: None,
            per_retry_system: Vec::new(),
            transport: None,
        }
    }

    pub(crate) fn request_id(mut self, policy: Option<Arc<dyn Policy>>) -> Self {
        self.request_id = policy;
        self
    }

    pub(crate) fn tier(mut self, tier: PolicyTier, descriptors: Vec<PolicyDescriptor>) -> Self {
        match tier {
            PolicyTier::Builder => self.builder = descriptors,
            PolicyTier::ClientOptions => self.client = descriptors,
            PolicyTier::Request => {}
        }
        self
    }

    pub(crate) fn retry(mut self, policy: Arc<dyn Policy>) -> Self {
        self.retry = Some(policy);
        self
    }

    pub(crate) fn per_retry_system(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_retry_system.push(policy);
        self
    }

    pub(crate) fn transport(mut self, policy: Arc<dyn Policy>) -> Self {
        self.transport = Some(policy);
        self
    }

    /// Validate the fixed parts and cache the chain used by messages without
    /// request-scoped policies.
    pub(crate) fn build(self) -> Result<ChainTemplate, PipelineError> {
        let retry = self
            .retry
            .ok_or_else(|| PipelineError::configuration("pipeline has no retry stage"))?;
        if retry.kind() != PolicyKind::Retry {
            return Err(PipelineError::configuration(
                "retry stage is not a retry-capable policy",
            ));
        }
        let transport = self
            .transport
            .ok_or_else(|| PipelineError::configuration("pipeline has no transport"))?;
        if transport.kind() != PolicyKind::Transport {
            return Err(PipelineError::configuration(
                "terminal stage is not a transport",
            ));
        }
        check_ordinary(&self.builder, PolicyTier::Builder)?;
        check_ordinary(&self.client, PolicyTier::ClientOptions)?;

        let mut template = ChainTemplate {
            request_id: self.request_id,
            builder: self.builder,
            client: self.client,
            retry,
            per_retry_system: self.per_retry_system,
            transport,
            cached: Arc::from(Vec::new()),
        };
        template.cached = Arc::from(template.assemble(&[]));
        Ok(template)
    }
}

/// The validated fixed chain of a pipeline.
pub(crate) struct ChainTemplate {
    request_id: Option<Arc<dyn Policy>>,
    builder: Vec<PolicyDescriptor>,
    client: Vec<PolicyDescriptor>,
    retry: Arc<dyn Policy>,
    per_retry_system: Vec<Arc<dyn Policy>>,
    transport: Arc<dyn Policy>,
    cached: Arc<[Arc<dyn Policy>]>,
}

impl ChainTemplate {
    /// Get the effective chain for a message's request-scoped policies.
    pub(crate) fn resolve(&self, scoped: &[PolicyDescriptor]) -> Arc<[Arc<dyn Policy>]> {
        if scoped.is_empty() {
            return self.cached.clone();
        }
        Arc::from(self.assemble(scoped))
    }

    pub(crate) fn len(&self) -> usize {
        self.cached.len()
    }

    fn assemble(&self, scoped: &[PolicyDescriptor]) -> Vec<Arc<dyn Policy>> {
        let mut chain = Vec::with_capacity(
            self.builder.len() + self.client.len() + scoped.len() + self.per_retry_system.len() + 3,
        );
        chain.extend(self.request_id.iter().cloned());
        for position in PipelinePosition::ALL {
            // System stages that open each bucket
            match position {
                PipelinePosition::PerCall => {}
                PipelinePosition::PerRetry => chain.push(self.retry.clone()),
                PipelinePosition::BeforeTransport => {
                    chain.extend(self.per_retry_system.iter().cloned())
                }
            }
            self.push_bucket(&mut chain, position, scoped);
        }
        chain.push(self.transport.clone());
        chain
    }

    fn push_bucket(
        &self,
        chain: &mut Vec<Arc<dyn Policy>>,
        position: PipelinePosition,
        scoped: &[PolicyDescriptor],
    ) {
        for tier in [&self.builder[..], &self.client[..], scoped] {
            chain.extend(
                tier.iter()
                    .filter(|d| d.position == position)
                    .map(|d| d.policy.clone()),
            );
        }
    }
}

impl std::fmt::Debug for ChainTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainTemplate")
            .field("builder", &self.builder)
            .field("client", &self.client)
            .field("len", &self.cached.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BoxFuture, Next};
    use crate::{Message, RetryOptions, RetryPolicy};

    /// Stand-in policy that only carries a name and a kind.
    struct Named(&'static str, PolicyKind);

    impl Policy for Named {
        fn process<'a>(
            &'a self,
            message: &'a mut Message,
            next: Next<'a>,
        ) -> BoxFuture<'a, Result<(), PipelineError>> {
            next.run(message)
        }

        fn kind(&self) -> PolicyKind {
            self.1
        }
    }

    fn named(name: &'static str) -> Arc<dyn Policy> {
        Arc::new(Named(name, PolicyKind::Ordinary))
    }

    fn at(name: &'static str, position: PipelinePosition) -> PolicyDescriptor {
        PolicyDescriptor::from_arc(named(name), position)
    }

    fn names(
        chain: &[Arc<dyn Policy>],
        all: &[(&'static str, &Arc<dyn Policy>)],
    ) -> Vec<&'static str> {
        chain
            .iter()
            .map(|p| {
                all.iter()
                    .find(|(_, candidate)| Arc::ptr_eq(candidate, p))
                    .map(|(name, _)| *name)
                    .unwrap_or("?")
            })
            .collect()
    }

    #[test]
    fn test_tiers_merge_in_fixed_order_per_bucket() {
        let builder = vec![
            at("builder-call", PipelinePosition::PerCall),
            at("builder-retry", PipelinePosition::PerRetry),
        ];
        let client = vec![
            at("client-before", PipelinePosition::BeforeTransport),
            at("client-call", PipelinePosition::PerCall),
        ];
        let scoped = vec![
            at("request-call", PipelinePosition::PerCall),
            at("request-retry", PipelinePosition::PerRetry),
            at("request-before", PipelinePosition::BeforeTransport),
        ];
        let retry: Arc<dyn Policy> = Arc::new(Named("retry", PolicyKind::Retry));
        let transport: Arc<dyn Policy> = Arc::new(Named("transport", PolicyKind::Transport));

        let template = ChainBuilder::new()
            .tier(PolicyTier::Builder, builder.clone())
            .tier(PolicyTier::ClientOptions, client.clone())
            .retry(retry.clone())
            .transport(transport.clone())
            .build()
            .unwrap();

        let mut all: Vec<(&'static str, &Arc<dyn Policy>)> =
            vec![("retry", &retry), ("transport", &transport)];
        let labels = [
            "builder-call",
            "builder-retry",
            "client-before",
            "client-call",
            "request-call",
            "request-retry",
            "request-before",
        ];
        for (label, d) in labels.iter().zip(builder.iter().chain(&client).chain(&scoped)) {
            all.push((*label, d.policy()));
        }

        let chain = template.resolve(&scoped);
        assert_eq!(
            names(&chain, &all),
            vec![
                "builder-call",
                "client-call",
                "request-call",
                "retry",
                "builder-retry",
                "request-retry",
                "client-before",
                "request-before",
                "transport",
            ]
        );

        let fixed = template.resolve(&[]);
        assert_eq!(fixed.len(), template.len());
        assert_eq!(fixed.len(), 6);
    }

    #[test]
    fn test_missing_transport_is_configuration_error() {
        let err = ChainBuilder::new()
            .retry(Arc::new(RetryPolicy::new(RetryOptions::default())))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_second_retry_stage_is_configuration_error() {
        let extra = PolicyDescriptor::new(
            RetryPolicy::new(RetryOptions::default()),
            PipelinePosition::PerRetry,
        );
        let err = ChainBuilder::new()
            .tier(PolicyTier::ClientOptions, vec![extra])
            .retry(Arc::new(RetryPolicy::new(RetryOptions::default())))
            .transport(Arc::new(Named("transport", PolicyKind::Transport)))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_request_tier_rejects_transport_stage_as_usage() {
        let scoped = vec![PolicyDescriptor::new(
            Named("transport", PolicyKind::Transport),
            PipelinePosition::BeforeTransport,
        )];
        let err = check_ordinary(&scoped, PolicyTier::Request).unwrap_err();
        assert!(matches!(err, PipelineError::Usage(_)));
    }
}
