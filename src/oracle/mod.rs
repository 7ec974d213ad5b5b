mod providers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core::{PriceQuote, PriceSource};
use crate::error::ProviderError;

pub use providers::{
    BinanceTickerProvider, CoinGeckoMarketChartProvider, CoinGeckoSimpleProvider,
    parse_market_chart_latest, parse_simple_price, parse_ticker_price,
};
pub(crate) use providers::parse_price_series;

#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn source(&self) -> PriceSource;

    async fn fetch_price(&self) -> Result<f64, ProviderError>;
}

// Holder of the single current quote. Readers get a cloned snapshot;
// writers replace the whole value, last write wins.
#[derive(Debug, Clone)]
pub struct QuoteCache {
    tx: Arc<watch::Sender<Option<PriceQuote>>>,
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Option<PriceQuote> {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, quote: PriceQuote) {
        self.tx.send_replace(Some(quote));
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PriceQuote>> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub source: PriceSource,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub quote: PriceQuote,
    pub failures: Vec<ProviderFailure>,
}

pub struct PriceOracle {
    providers: Vec<Arc<dyn PriceProvider>>,
    timeout: Duration,
    fallback_price: f64,
    cache: QuoteCache,
}

impl PriceOracle {
    pub fn new(
        providers: Vec<Arc<dyn PriceProvider>>,
        timeout: Duration,
        fallback_price: f64,
        cache: QuoteCache,
    ) -> Self {
        Self {
            providers,
            timeout,
            fallback_price,
            cache,
        }
    }

    pub fn from_config(config: &AppConfig, cache: QuoteCache) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("stack-years/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let providers: Vec<Arc<dyn PriceProvider>> = vec![
            Arc::new(CoinGeckoSimpleProvider::new(client.clone(), config)),
            Arc::new(CoinGeckoMarketChartProvider::new(client.clone(), config)),
            Arc::new(BinanceTickerProvider::new(client, config)),
        ];
        Ok(Self::new(
            providers,
            config.provider_timeout(),
            config.fallback_price,
            cache,
        ))
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    pub async fn resolve_current_price(&self) -> PriceQuote {
        self.resolve_with_diagnostics().await.quote
    }

    pub async fn resolve_with_diagnostics(&self) -> Resolution {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let source = provider.source();
            // Dropping the future on timeout cancels the in-flight request.
            let outcome = match tokio::time::timeout(self.timeout, provider.fetch_price()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(value) => {
                    let quote = PriceQuote::live(value, source);
                    info!(?source, price = value, "Resolved current price");
                    self.cache.publish(quote.clone());
                    return Resolution { quote, failures };
                }
                Err(e) => {
                    warn!(?source, error = %e, "Price provider failed, trying next");
                    failures.push(ProviderFailure {
                        source,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let quote = PriceQuote::estimated(self.fallback_price);
        warn!(
            price = self.fallback_price,
            "All price providers failed, using static estimate"
        );
        self.cache.publish(quote.clone());
        Resolution { quote, failures }
    }

    // Subscribes to the cache and then starts the refresh task, so the
    // startup resolve is the first change the receiver sees.
    pub fn watch_quotes(
        self: &Arc<Self>,
        interval: Duration,
    ) -> (watch::Receiver<Option<PriceQuote>>, JoinHandle<()>) {
        let updates = self.cache.subscribe();
        let refresh = Arc::clone(self).spawn_refresh(interval);
        (updates, refresh)
    }

    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.resolve_current_price().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(5);
    const FALLBACK: f64 = 95_000.0;

    #[derive(Clone, Copy, Debug)]
    enum Behavior {
        Succeed(f64),
        Fail,
        Hang,
    }

    struct FakeProvider {
        source: PriceSource,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(source: PriceSource, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                source,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceProvider for FakeProvider {
        fn source(&self) -> PriceSource {
            self.source
        }

        async fn fetch_price(&self) -> Result<f64, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed(v) => Ok(v),
                Behavior::Fail => Err(ProviderError::Status(503)),
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    fn chain(behaviors: [Behavior; 3]) -> (PriceOracle, Vec<Arc<FakeProvider>>) {
        let sources = [
            PriceSource::CoinGeckoSimple,
            PriceSource::CoinGeckoMarketChart,
            PriceSource::BinanceTicker,
        ];
        let fakes: Vec<Arc<FakeProvider>> = sources
            .into_iter()
            .zip(behaviors)
            .map(|(source, behavior)| FakeProvider::new(source, behavior))
            .collect();
        let providers = fakes
            .iter()
            .map(|fake| fake.clone() as Arc<dyn PriceProvider>)
            .collect();
        let oracle = PriceOracle::new(providers, TIMEOUT, FALLBACK, QuoteCache::new());
        (oracle, fakes)
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_short_circuits_the_chain() {
        let (oracle, fakes) = chain([
            Behavior::Succeed(60_000.0),
            Behavior::Succeed(61_000.0),
            Behavior::Succeed(62_000.0),
        ]);

        let quote = oracle.resolve_current_price().await;
        assert_eq!(quote.source, PriceSource::CoinGeckoSimple);
        assert_eq!(quote.value, 60_000.0);
        assert!(!quote.is_estimated);
        assert_eq!(fakes[1].calls(), 0);
        assert_eq!(fakes[2].calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn third_provider_answers_after_two_failures() {
        let (oracle, fakes) = chain([
            Behavior::Fail,
            Behavior::Hang,
            Behavior::Succeed(62_000.0),
        ]);

        let resolution = oracle.resolve_with_diagnostics().await;
        assert_eq!(resolution.quote.source, PriceSource::BinanceTicker);
        assert_eq!(resolution.quote.value, 62_000.0);
        assert_eq!(resolution.failures.len(), 2);
        assert!(resolution.failures[1].reason.contains("timed out"));
        assert!(fakes.iter().all(|fake| fake.calls() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_fall_back_to_static_estimate() {
        let (oracle, _fakes) = chain([Behavior::Fail, Behavior::Hang, Behavior::Fail]);

        let quote = oracle.resolve_current_price().await;
        assert!(quote.is_estimated);
        assert_eq!(quote.source, PriceSource::StaticEstimate);
        assert_eq!(quote.value, FALLBACK);
        assert_eq!(oracle.cache().snapshot(), Some(quote));
    }

    #[tokio::test(start_paused = true)]
    async fn every_outcome_combination_yields_a_quote() {
        let outcomes = [Behavior::Succeed(1.0), Behavior::Fail, Behavior::Hang];
        for a in outcomes {
            for b in outcomes {
                for c in outcomes {
                    let (oracle, _fakes) = chain([a, b, c]);
                    let quote = oracle.resolve_current_price().await;

                    let expected = [a, b, c]
                        .into_iter()
                        .position(|behavior| matches!(behavior, Behavior::Succeed(_)));
                    match expected {
                        Some(_) => assert!(!quote.is_estimated, "{a:?} {b:?} {c:?}"),
                        None => {
                            assert!(quote.is_estimated, "{a:?} {b:?} {c:?}");
                            assert_eq!(quote.value, FALLBACK);
                        }
                    }
                    assert!(oracle.cache().snapshot().is_some());
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_provider_is_abandoned_after_timeout() {
        let (oracle, _fakes) = chain([
            Behavior::Hang,
            Behavior::Succeed(63_000.0),
            Behavior::Fail,
        ]);

        let started = tokio::time::Instant::now();
        let quote = oracle.resolve_current_price().await;
        assert_eq!(quote.source, PriceSource::CoinGeckoMarketChart);
        let elapsed = started.elapsed();
        assert!(elapsed >= TIMEOUT && elapsed < TIMEOUT * 2, "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cache_keeps_last_write_and_notifies_subscribers() {
        let cache = QuoteCache::new();
        let mut rx = cache.subscribe();
        assert!(cache.snapshot().is_none());

        cache.publish(PriceQuote::estimated(1.0));
        cache.publish(PriceQuote::live(2.0, PriceSource::BinanceTicker));

        rx.changed().await.expect("sender alive");
        let seen = rx.borrow_and_update().clone().expect("quote published");
        assert_eq!(seen.value, 2.0);
        assert_eq!(cache.snapshot().map(|q| q.value), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_task_resolves_at_startup_and_on_interval() {
        let (oracle, fakes) = chain([
            Behavior::Succeed(60_000.0),
            Behavior::Fail,
            Behavior::Fail,
        ]);
        let oracle = Arc::new(oracle);
        let handle = Arc::clone(&oracle).spawn_refresh(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fakes[0].calls(), 1);
        assert!(oracle.cache().snapshot().is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fakes[0].calls(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn watched_quotes_change_once_at_startup() {
        let (oracle, fakes) = chain([
            Behavior::Succeed(60_000.0),
            Behavior::Fail,
            Behavior::Fail,
        ]);
        let oracle = Arc::new(oracle);
        let (mut updates, handle) = oracle.watch_quotes(Duration::from_secs(60));

        updates.changed().await.expect("sender alive");
        let first = updates.borrow_and_update().clone().expect("quote published");
        assert_eq!(first.value, 60_000.0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!updates.has_changed().expect("sender alive"));
        assert_eq!(fakes[0].calls(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(updates.has_changed().expect("sender alive"));
        assert_eq!(fakes[0].calls(), 2);

        handle.abort();
    }
}
