use std::sync::atomic::{AtomicU64, Ordering};

use chrono::TimeDelta;
use futures::{future::BoxFuture, FutureExt};
use ob_common::{ExchangeClient, ExchangeError, OrderAck, OrderSpec, OrderType};

/// Paper backend: accepts everything and hands out increasing order ids.
pub struct DemoClient {
    next_oid: AtomicU64,
}

impl DemoClient {
    pub fn new() -> Self {
        Self {
            next_oid: AtomicU64::new(1),
        }
    }
}

impl Default for DemoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeClient for DemoClient {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn clock_offset(&self) -> BoxFuture<'_, Result<TimeDelta, ExchangeError>> {
        async { Ok(TimeDelta::zero()) }.boxed()
    }

    fn submit_order<'a>(
        &'a self,
        spec: &'a OrderSpec,
    ) -> BoxFuture<'a, Result<OrderAck, ExchangeError>> {
        async move {
            let oid = self.next_oid.fetch_add(1, Ordering::Relaxed);
            let status = match spec.order_type {
                OrderType::Market => "FILLED",
                _ => "NEW",
            };
            Ok(OrderAck {
                order_id: oid.to_string(),
                status: status.to_string(),
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use ob_common::{
        ladder, LadderParams, OrderSide, Precision, StrategyRunner, TimeSlicedParams,
    };
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn market_slices_fill_with_sequential_ids() {
        let client = DemoClient::new();
        let plan = ob_common::time_sliced(
            &TimeSlicedParams {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Buy,
                total_quantity: 0.1,
                parts: 3,
                interval: Duration::from_secs(5),
            },
            Precision::default(),
        )
        .unwrap();

        let report = StrategyRunner::new(&client).run(&plan).await;
        assert_eq!(report.succeeded.len(), 3);
        let ids: Vec<_> = report
            .succeeded
            .iter()
            .map(|outcome| match &outcome.result {
                ob_common::SliceResult::Success { order_id, status } => {
                    assert_eq!(status, "FILLED");
                    order_id.clone()
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn grid_orders_rest() {
        let client = DemoClient::default();
        let plan = ladder(
            &LadderParams {
                symbol: "BTCUSDT".to_string(),
                lower_price: 58_000.0,
                upper_price: 62_000.0,
                levels: 4,
                quantity_per_level: 0.01,
            },
            Precision::default(),
        )
        .unwrap();
        let report = StrategyRunner::new(&client).run(&plan).await;
        assert_eq!(report.attempted(), 4);
        assert!(report.succeeded.iter().all(|outcome| matches!(
            &outcome.result,
            ob_common::SliceResult::Success { status, .. } if status == "NEW"
        )));
        assert_eq!(client.clock_offset().await.unwrap(), TimeDelta::zero());
    }
}
