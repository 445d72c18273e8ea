//! Sliding-window rate limiting.

use async_trait::async_trait;
use tracing::debug;

use super::{required_param, Component, ConfigError, Params, ProcessError};
use crate::crypto::generate_hex_secret;
use crate::hooks::{Hook, Request};
use crate::store::Partition;

const REQUESTS_SET: &str = "requests";
const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Allows at most `amount` deliveries per `interval` seconds.
///
/// Each accepted delivery leaves a timestamp-ordered member in the `requests`
/// set; a rejected delivery's member is rolled back with its transaction.
pub struct RateLimitFilter;

impl RateLimitFilter {
    pub const NAME: &'static str = "rate-limit-filter";
}

#[async_trait]
impl Component for RateLimitFilter {
    fn display_name(&self) -> &str {
        "Rate limiter"
    }

    fn config_template(&self) -> Option<&str> {
        Some(Self::NAME)
    }

    fn config_fields(&self) -> &'static [&'static str] {
        &["amount", "interval"]
    }

    fn writes_state(&self) -> bool {
        true
    }

    async fn init(
        &self,
        _hook: &Hook,
        params: &Params,
        partition: &Partition<'_>,
    ) -> Result<(), ConfigError> {
        let amount = positive_param(params, "amount")?;
        let interval = positive_param(params, "interval")?;
        partition.set_field("amount", &amount.to_string()).await?;
        partition.set_field("interval", &interval.to_string()).await?;
        Ok(())
    }

    async fn process(
        &self,
        hook: &Hook,
        request: &Request,
        partition: &Partition<'_>,
    ) -> Result<(), ProcessError> {
        let amount = positive_field(partition, "amount").await?;
        let interval = positive_field(partition, "interval").await?;

        let now = request
            .received_at
            .timestamp_nanos_opt()
            .ok_or_else(|| ProcessError::rejected("delivery timestamp out of range"))?;
        let window_start = now
            .saturating_sub((interval as i64).saturating_mul(NANOS_PER_SEC))
            .max(0);
        let start_key = timestamp_key(window_start);
        let member = request_member(now)?;
        // Sorts after every member sharing `now`'s timestamp.
        let upper = format!("{}~", timestamp_key(now));

        let requests = partition.set(REQUESTS_SET);
        requests.insert(&member).await?;

        let count = requests.count_between(&start_key, &upper).await?;
        if count > amount {
            return Err(ProcessError::rejected(format!(
                "rate limit exceeded (limit={amount} count={count})"
            )));
        }

        let removed = requests.remove_below(&start_key).await?;
        debug!(target: "components", hook = %hook.id, count, removed, "rate limit checked");
        Ok(())
    }
}

/// Zero-padded so lexical order matches numeric order.
fn timestamp_key(nanos: i64) -> String {
    format!("{nanos:020}")
}

/// Set member for one delivery. The random suffix keeps deliveries with the
/// same timestamp distinct.
fn request_member(nanos: i64) -> Result<String, ProcessError> {
    let suffix = generate_hex_secret(4)
        .map_err(|e| std::io::Error::other(format!("failed to generate request id: {e}")))?;
    Ok(format!("{}-{suffix}", timestamp_key(nanos)))
}

fn positive_param(params: &Params, field: &'static str) -> Result<u64, ConfigError> {
    let raw = required_param(params, field)?;
    match raw.parse::<u64>() {
        Ok(value) if value > 0 && value <= i64::MAX as u64 => Ok(value),
        _ => Err(ConfigError::invalid(
            field,
            format!("must be a positive number, got {raw:?}"),
        )),
    }
}

async fn positive_field(partition: &Partition<'_>, field: &'static str) -> Result<u64, ProcessError> {
    match partition.field(field).await?.and_then(|v| v.parse::<u64>().ok()) {
        Some(value) if value > 0 => Ok(value),
        _ => Err(ProcessError::NotConfigured(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::{open_store, params, write_tx};
    use crate::store::{Store, TxMode};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    async fn configure(store: &Store, hook: &Hook, amount: &str, interval: &str) {
        let tx = write_tx(store).await;
        RateLimitFilter
            .init(
                hook,
                &params(&[("amount", amount), ("interval", interval)]),
                &tx.partition(RateLimitFilter::NAME, &hook.id),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    /// Run one delivery in its own transaction, committing only on success.
    async fn deliver(store: &Store, hook: &Hook, at: DateTime<Utc>) -> Result<(), ProcessError> {
        let tx = store.begin(TxMode::Write).await.unwrap();
        let request = Request::new("POST", "").with_received_at(at);
        let result = RateLimitFilter
            .process(hook, &request, &tx.partition(RateLimitFilter::NAME, &hook.id))
            .await;
        if result.is_ok() {
            tx.commit().await.unwrap();
        }
        result
    }

    async fn stored_requests(store: &Store, hook: &Hook) -> Vec<String> {
        let tx = store.begin(TxMode::Read).await.unwrap();
        tx.partition(RateLimitFilter::NAME, &hook.id)
            .set(REQUESTS_SET)
            .members()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_limit_window_and_cleanup() {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("limited");
        configure(&store, &hook, "2", "60").await;

        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        deliver(&store, &hook, t0).await.unwrap();
        deliver(&store, &hook, t0 + Duration::seconds(1)).await.unwrap();

        let err = deliver(&store, &hook, t0 + Duration::seconds(2))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "rate limit exceeded (limit=2 count=3)");
        assert_eq!(stored_requests(&store, &hook).await.len(), 2);

        // Past the window: accepted, and the stale entries are cleaned up.
        deliver(&store, &hook, t0 + Duration::seconds(65)).await.unwrap();
        let remaining = stored_requests(&store, &hook).await;
        assert_eq!(remaining.len(), 1);
        let expected = (t0 + Duration::seconds(65)).timestamp_nanos_opt().unwrap();
        assert!(remaining[0].starts_with(&format!("{}-", timestamp_key(expected))));
    }

    #[tokio::test]
    async fn test_same_timestamp_counts_twice() {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("burst");
        configure(&store, &hook, "1", "60").await;

        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        deliver(&store, &hook, t0).await.unwrap();
        let err = deliver(&store, &hook, t0).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limit exceeded (limit=1 count=2)");
        assert_eq!(stored_requests(&store, &hook).await.len(), 1);
    }

    #[tokio::test]
    async fn test_window_is_per_hook() {
        let (store, _dir) = open_store().await;
        let a = Hook::new("a");
        let b = Hook::new("b");
        configure(&store, &a, "1", "60").await;
        configure(&store, &b, "1", "60").await;

        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        deliver(&store, &a, t0).await.unwrap();
        deliver(&store, &b, t0).await.unwrap();
        assert!(deliver(&store, &a, t0 + Duration::seconds(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("h");
        let tx = write_tx(&store).await;
        let partition = tx.partition(RateLimitFilter::NAME, "h");

        for (amount, interval) in [("0", "60"), ("-1", "60"), ("abc", "60"), ("5", "0")] {
            let err = RateLimitFilter
                .init(
                    &hook,
                    &params(&[("amount", amount), ("interval", interval)]),
                    &partition,
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{amount}/{interval}");
        }

        let err = RateLimitFilter
            .init(&hook, &params(&[("amount", "5")]), &partition)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "interval is required");
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("h");
        let err = deliver(&store, &hook, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotConfigured("amount")));
    }

    #[test]
    fn test_timestamp_key_orders_lexically() {
        assert_eq!(timestamp_key(42).len(), 20);
        assert!(timestamp_key(999) < timestamp_key(1000));

        let a = request_member(1000).unwrap();
        let b = request_member(1000).unwrap();
        assert_ne!(a, b);
        assert!(a > timestamp_key(1000));
        assert!(a < format!("{}~", timestamp_key(1000)));
        assert!(a < timestamp_key(1001));
    }
}
