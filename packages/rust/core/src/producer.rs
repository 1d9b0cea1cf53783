//! Fragment producers and their ordered registry.
//!
//! A producer turns one source notice into a [`Fragment`] (or nothing). The
//! pipeline treats producers as opaque: it only needs a name for diagnostics
//! and an `extract` call.

use std::marker::PhantomData;

use noticemerge_shared::{Fragment, Result};

/// A source record being converted. Its internal format is the producers'
/// concern; the pipeline only needs an identifier for diagnostics.
pub trait Notice {
    fn notice_id(&self) -> &str;
}

/// Extracts one fragment from a notice.
pub trait Producer<N>: Send + Sync {
    /// Name used in logs and summaries.
    fn name(&self) -> &str;

    /// `Ok(None)` means the notice holds nothing for this producer.
    fn extract(&self, notice: &N) -> Result<Option<Fragment>>;
}

// ---------------------------------------------------------------------------
// Closure producers
// ---------------------------------------------------------------------------

/// A producer backed by a plain function or closure.
pub struct FnProducer<N, F> {
    name: String,
    extract: F,
    _notice: PhantomData<fn(&N)>,
}

impl<N, F> FnProducer<N, F>
where
    F: Fn(&N) -> Result<Option<Fragment>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, extract: F) -> Self {
        Self {
            name: name.into(),
            extract,
            _notice: PhantomData,
        }
    }
}

impl<N, F> Producer<N> for FnProducer<N, F>
where
    F: Fn(&N) -> Result<Option<Fragment>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, notice: &N) -> Result<Option<Fragment>> {
        (self.extract)(notice)
    }
}

// ---------------------------------------------------------------------------
// Fallback chains
// ---------------------------------------------------------------------------

/// Tries several extractors in order; the first non-empty fragment wins.
///
/// An error from any extractor ends the chain, so a broken primary source is
/// reported rather than masked by a fallback.
pub struct FallbackProducer<N> {
    name: String,
    chain: Vec<Box<dyn Producer<N>>>,
}

impl<N> FallbackProducer<N> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
        }
    }

    /// Append an extractor to the end of the chain.
    pub fn or_else(mut self, producer: impl Producer<N> + 'static) -> Self {
        self.chain.push(Box::new(producer));
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Names of the chained extractors, in the order they are tried.
    pub fn links(&self) -> Vec<&str> {
        self.chain.iter().map(|p| p.name()).collect()
    }
}

impl<N> Producer<N> for FallbackProducer<N> {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, notice: &N) -> Result<Option<Fragment>> {
        for producer in &self.chain {
            match producer.extract(notice)? {
                Some(fragment) if !fragment.is_empty() => {
                    tracing::trace!(producer = %self.name, via = producer.name(), "fallback hit");
                    return Ok(Some(fragment));
                }
                _ => continue,
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Producers in the order their fragments are merged.
pub struct ProducerRegistry<N> {
    producers: Vec<Box<dyn Producer<N>>>,
}

impl<N> Default for ProducerRegistry<N> {
    fn default() -> Self {
        Self {
            producers: Vec::new(),
        }
    }
}

impl<N> ProducerRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `producer` after every producer already registered.
    pub fn register(&mut self, producer: impl Producer<N> + 'static) -> &mut Self {
        self.producers.push(Box::new(producer));
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, producer: impl Producer<N> + 'static) -> Self {
        self.producers.push(Box::new(producer));
        self
    }

    /// Register a closure as a named producer.
    pub fn with_fn<F>(self, name: impl Into<String>, extract: F) -> Self
    where
        N: 'static,
        F: Fn(&N) -> Result<Option<Fragment>> + Send + Sync + 'static,
    {
        self.with(FnProducer::new(name, extract))
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Producer<N>> {
        self.producers.iter().map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noticemerge_shared::NoticeMergeError;
    use serde_json::json;

    struct Doc {
        id: String,
        buyer: Option<&'static str>,
        legacy_buyer: Option<&'static str>,
    }

    impl Notice for Doc {
        fn notice_id(&self) -> &str {
            &self.id
        }
    }

    fn doc(buyer: Option<&'static str>, legacy_buyer: Option<&'static str>) -> Doc {
        Doc {
            id: "N-1".into(),
            buyer,
            legacy_buyer,
        }
    }

    fn party_fragment(id: &str) -> Fragment {
        Fragment::from_value(json!({"parties": [{"id": id, "roles": ["buyer"]}]}))
            .unwrap()
            .unwrap()
    }

    fn buyer(notice: &Doc) -> Result<Option<Fragment>> {
        Ok(notice.buyer.map(party_fragment))
    }

    fn legacy_buyer(notice: &Doc) -> Result<Option<Fragment>> {
        Ok(notice.legacy_buyer.map(party_fragment))
    }

    #[test]
    fn fn_producer_extracts() {
        let producer = FnProducer::new("buyer", buyer);
        assert_eq!(producer.name(), "buyer");
        assert!(producer.extract(&doc(Some("ORG-1"), None)).unwrap().is_some());
        assert!(producer.extract(&doc(None, None)).unwrap().is_none());
    }

    #[test]
    fn fallback_takes_first_present() {
        let producer = FallbackProducer::new("buyer")
            .or_else(FnProducer::new("primary", buyer))
            .or_else(FnProducer::new("legacy", legacy_buyer));
        assert_eq!(producer.len(), 2);

        let both = producer.extract(&doc(Some("ORG-1"), Some("ORG-9"))).unwrap().unwrap();
        assert_eq!(both, party_fragment("ORG-1"));

        let legacy_only = producer.extract(&doc(None, Some("ORG-9"))).unwrap().unwrap();
        assert_eq!(legacy_only, party_fragment("ORG-9"));

        assert!(producer.extract(&doc(None, None)).unwrap().is_none());
    }

    #[test]
    fn fallback_skips_empty_fragments() {
        let producer = FallbackProducer::new("buyer")
            .or_else(FnProducer::new("empty", |_: &Doc| Ok(Some(Fragment::default()))))
            .or_else(FnProducer::new("legacy", legacy_buyer));
        let fragment = producer.extract(&doc(None, Some("ORG-9"))).unwrap();
        assert_eq!(fragment, Some(party_fragment("ORG-9")));
    }

    #[test]
    fn fallback_stops_on_error() {
        let producer = FallbackProducer::new("buyer")
            .or_else(FnProducer::new("broken", |_: &Doc| {
                Err(NoticeMergeError::parse("bad date"))
            }))
            .or_else(FnProducer::new("legacy", legacy_buyer));
        assert!(producer.extract(&doc(None, Some("ORG-9"))).is_err());
    }

    #[test]
    fn registry_keeps_registration_order() {
        let mut registry = ProducerRegistry::new()
            .with_fn("organizations", |_: &Doc| Ok(None))
            .with(FnProducer::new("buyer", buyer));
        registry.register(FallbackProducer::new("legacy").or_else(FnProducer::new("l", legacy_buyer)));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names(), vec!["organizations", "buyer", "legacy"]);
        assert!(!registry.is_empty());
    }
}
