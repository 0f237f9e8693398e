use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::{
    artifacts::{RoutedOrderRecord, RunArtifacts},
    error::{ExchangeError, ExchangeErrorKind},
    order::OrderSpec,
    schedule::{SlicePlan, StrategyKind},
    time::timestamp_ms,
};

/// Exchange acknowledgement for an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}

/// Capability the runner submits through. Implementations own transport,
/// signing and any rate limiting; the runner only sees typed results.
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Server time minus local time, measured once at session start.
    fn clock_offset(&self) -> BoxFuture<'_, Result<TimeDelta, ExchangeError>>;

    fn submit_order<'a>(&'a self, spec: &'a OrderSpec)
        -> BoxFuture<'a, Result<OrderAck, ExchangeError>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SliceResult {
    #[serde(rename_all = "camelCase")]
    Success {
        order_id: String,
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        error_kind: ExchangeErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceOutcome {
    pub index: usize,
    pub spec: OrderSpec,
    pub result: SliceResult,
}

impl SliceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, SliceResult::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyReport {
    pub strategy: StrategyKind,
    pub total_slices: usize,
    pub succeeded: Vec<SliceOutcome>,
    pub failed: Vec<SliceOutcome>,
    #[serde(default)]
    pub cancelled: bool,
}

impl StrategyReport {
    fn new(strategy: StrategyKind, total_slices: usize) -> Self {
        Self {
            strategy,
            total_slices,
            succeeded: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }

    fn record(&mut self, outcome: SliceOutcome) {
        if outcome.is_success() {
            self.succeeded.push(outcome);
        } else {
            self.failed.push(outcome);
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Outcomes in submission order.
    pub fn outcomes(&self) -> Vec<&SliceOutcome> {
        let mut all: Vec<&SliceOutcome> = self.succeeded.iter().chain(&self.failed).collect();
        all.sort_by_key(|outcome| outcome.index);
        all
    }
}

/// Receiving half of a cancellation request. Checked only at slice
/// boundaries, never mid-submission.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// sender is dropped without cancelling.
    async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives a [`SlicePlan`] against an exchange client, one slice at a time.
pub struct StrategyRunner<'a> {
    client: &'a dyn ExchangeClient,
    cancel: Option<CancelSignal>,
    artifacts: Option<Arc<Mutex<RunArtifacts>>>,
}

impl<'a> StrategyRunner<'a> {
    pub fn new(client: &'a dyn ExchangeClient) -> Self {
        Self {
            client,
            cancel: None,
            artifacts: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<Mutex<RunArtifacts>>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Submits every slice in order and returns the full report.
    ///
    /// A failed slice is recorded and the run moves on; nothing is retried and
    /// earlier orders are never rolled back. Cancellation stops the run before
    /// the next submission and the report covers only the attempted slices.
    pub async fn run(&mut self, plan: &SlicePlan) -> StrategyReport {
        let mut report = StrategyReport::new(plan.strategy(), plan.len());
        let total = plan.len();

        for (idx, slice) in plan.slices().iter().enumerate() {
            let proceed = if idx == 0 {
                !self.is_cancelled()
            } else {
                self.wait(slice.delay_before_submit).await
            };
            if !proceed {
                info!(
                    strategy = %plan.strategy(),
                    attempted = report.attempted(),
                    total,
                    "run cancelled before slice {}",
                    idx + 1
                );
                report.cancelled = true;
                break;
            }

            let spec = &slice.spec;
            let submit_ts = timestamp_ms();
            let result = self.client.submit_order(spec).await;

            let slice_result = match &result {
                Ok(ack) => {
                    info!(
                        exchange = self.client.name(),
                        symbol = %spec.symbol,
                        side = %spec.side,
                        order_type = %spec.order_type,
                        quantity = spec.quantity,
                        price = ?spec.price,
                        order_id = %ack.order_id,
                        status = %ack.status,
                        "slice {}/{} placed",
                        idx + 1,
                        total
                    );
                    SliceResult::Success {
                        order_id: ack.order_id.clone(),
                        status: ack.status.clone(),
                    }
                }
                Err(err) => {
                    warn!(
                        exchange = self.client.name(),
                        symbol = %spec.symbol,
                        side = %spec.side,
                        error_kind = ?err.kind(),
                        "slice {}/{} failed: {err}",
                        idx + 1,
                        total
                    );
                    SliceResult::Failure {
                        error_kind: err.kind(),
                        message: err.to_string(),
                    }
                }
            };

            let outcome = SliceOutcome {
                index: idx,
                spec: spec.clone(),
                result: slice_result,
            };
            self.record_artifacts(plan.strategy(), submit_ts, &outcome, result.as_ref().ok())
                .await;
            report.record(outcome);
        }

        report
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(CancelSignal::is_cancelled)
            .unwrap_or(false)
    }

    /// Sleeps for `delay` unless cancelled first. Returns false on cancel.
    async fn wait(&mut self, delay: Duration) -> bool {
        match self.cancel.as_mut() {
            None => {
                if !delay.is_zero() {
                    info!("waiting {}s before next slice", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
                true
            }
            Some(cancel) => {
                if cancel.is_cancelled() {
                    return false;
                }
                if delay.is_zero() {
                    return true;
                }
                info!("waiting {}s before next slice", delay.as_secs_f64());
                let interrupted = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = cancel.cancelled() => true,
                };
                !interrupted && !cancel.is_cancelled()
            }
        }
    }

    async fn record_artifacts(
        &self,
        strategy: StrategyKind,
        submit_ts: i64,
        outcome: &SliceOutcome,
        ack: Option<&OrderAck>,
    ) {
        let Some(artifacts) = self.artifacts.as_ref() else {
            return;
        };
        let mut artifacts = artifacts.lock().await;

        let request = serde_json::to_value(&outcome.spec).unwrap_or_default();
        let (ack_value, error_value) = match &outcome.result {
            SliceResult::Success { order_id, status } => (
                Some(json!({ "orderId": order_id, "status": status })),
                None,
            ),
            SliceResult::Failure {
                error_kind,
                message,
            } => (None, Some(json!({ "kind": error_kind, "message": message }))),
        };
        let record = artifacts.make_slice_record(
            outcome.index,
            strategy,
            self.client.name(),
            submit_ts,
            request,
            ack_value,
            error_value,
        );
        if let Err(err) = artifacts.log_slice(&record) {
            warn!("failed to record slice {}: {err:?}", outcome.index);
        }

        if let Some(ack) = ack {
            let routed = RoutedOrderRecord::from_spec(submit_ts, &outcome.spec, ack);
            if let Err(err) = artifacts.log_routed_order(&routed) {
                warn!("failed to record routed order {}: {err:?}", ack.order_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex as StdMutex, time::Duration};

    use futures::FutureExt;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        order::{build_order, OrderParams, OrderSide, OrderType},
        schedule::{
            bracket, ladder, single, time_sliced, BracketParams, LadderParams, Precision,
            TimeSlicedParams,
        },
    };

    /// Accepts every slice except the 1-based positions listed in `fail_on`.
    struct ScriptedClient {
        fail_on: HashSet<usize>,
        calls: StdMutex<Vec<(OrderSpec, Instant)>>,
    }

    impl ScriptedClient {
        fn new(fail_on: &[usize]) -> Self {
            Self {
                fail_on: fail_on.iter().copied().collect(),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(OrderSpec, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ExchangeClient for ScriptedClient {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn clock_offset(&self) -> BoxFuture<'_, Result<TimeDelta, ExchangeError>> {
            async { Ok(TimeDelta::zero()) }.boxed()
        }

        fn submit_order<'a>(
            &'a self,
            spec: &'a OrderSpec,
        ) -> BoxFuture<'a, Result<OrderAck, ExchangeError>> {
            async move {
                let position = {
                    let mut calls = self.calls.lock().unwrap();
                    calls.push((spec.clone(), Instant::now()));
                    calls.len()
                };
                if self.fail_on.contains(&position) {
                    Err(ExchangeError::Rejected {
                        code: Some(-2019),
                        message: "Margin is insufficient.".to_string(),
                    })
                } else {
                    Ok(OrderAck {
                        order_id: format!("{position}"),
                        status: "NEW".to_string(),
                    })
                }
            }
            .boxed()
        }
    }

    fn twap_plan(parts: u32, interval_secs: u64) -> SlicePlan {
        time_sliced(
            &TimeSlicedParams {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Buy,
                total_quantity: 0.1,
                parts,
                interval: Duration::from_secs(interval_secs),
            },
            Precision::default(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn failed_slice_does_not_stop_the_run() {
        let client = ScriptedClient::new(&[3]);
        let plan = twap_plan(5, 30);

        let report = StrategyRunner::new(&client).run(&plan).await;

        assert_eq!(report.total_slices, 5);
        assert_eq!(report.succeeded.len(), 4);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.cancelled);
        let failed = &report.failed[0];
        assert_eq!(failed.index, 2);
        assert!(matches!(
            failed.result,
            SliceResult::Failure {
                error_kind: ExchangeErrorKind::Rejected,
                ..
            }
        ));
        let indices: Vec<usize> = report.outcomes().iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(client.calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn slices_are_paced_by_their_delay() {
        let client = ScriptedClient::new(&[]);
        let plan = twap_plan(4, 30);
        let started = Instant::now();

        StrategyRunner::new(&client).run(&plan).await;

        let calls = client.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].1 - started < Duration::from_secs(1));
        for pair in calls.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(30));
        }
    }

    #[tokio::test]
    async fn grid_submits_in_ladder_order_without_waiting() {
        let client = ScriptedClient::new(&[]);
        let plan = ladder(
            &LadderParams {
                symbol: "BTCUSDT".to_string(),
                lower_price: 58_000.0,
                upper_price: 62_000.0,
                levels: 10,
                quantity_per_level: 0.01,
            },
            Precision::default(),
        )
        .unwrap();

        let report = StrategyRunner::new(&client).run(&plan).await;

        assert_eq!(report.succeeded.len(), 10);
        let prices: Vec<f64> = client
            .calls()
            .iter()
            .map(|(spec, _)| spec.price.unwrap())
            .collect();
        let mut sorted = prices.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(prices, sorted);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_wait_skips_remaining_slices() {
        let client = ScriptedClient::new(&[]);
        let plan = twap_plan(5, 30);
        let (cancel_tx, cancel) = CancelSignal::channel();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            let _ = cancel_tx.send(true);
        });

        let report = StrategyRunner::new(&client)
            .with_cancel(cancel)
            .run(&plan)
            .await;
        canceller.await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.total_slices, 5);
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn cancel_before_start_submits_nothing() {
        let client = ScriptedClient::new(&[]);
        let plan = twap_plan(3, 0);
        let (cancel_tx, cancel) = CancelSignal::channel();
        cancel_tx.send(true).unwrap();

        let report = StrategyRunner::new(&client)
            .with_cancel(cancel)
            .run(&plan)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.attempted(), 0);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn dropped_cancel_sender_never_cancels() {
        let client = ScriptedClient::new(&[]);
        let plan = twap_plan(3, 0);
        let (cancel_tx, cancel) = CancelSignal::channel();
        drop(cancel_tx);

        let report = StrategyRunner::new(&client)
            .with_cancel(cancel)
            .run(&plan)
            .await;

        assert!(!report.cancelled);
        assert_eq!(report.succeeded.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_share_no_state() {
        let client = ScriptedClient::new(&[]);
        let plan_a = twap_plan(3, 10);
        let plan_b = bracket(&BracketParams {
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Sell,
            quantity: 1.0,
            take_profit_price: 3_800.0,
            stop_price: 3_200.0,
        })
        .unwrap();

        let mut runner_a = StrategyRunner::new(&client);
        let mut runner_b = StrategyRunner::new(&client);
        let (report_a, report_b) = tokio::join!(runner_a.run(&plan_a), runner_b.run(&plan_b));

        assert_eq!(report_a.succeeded.len(), 3);
        assert_eq!(report_a.strategy, StrategyKind::Twap);
        assert_eq!(report_b.succeeded.len(), 2);
        assert_eq!(report_b.strategy, StrategyKind::Oco);
        assert_eq!(client.calls().len(), 5);
    }

    #[tokio::test]
    async fn every_slice_failing_still_returns_full_report() {
        let client = ScriptedClient::new(&[1]);
        let spec = build_order(
            OrderParams::new("BTCUSDT", OrderSide::Buy, OrderType::Limit, 0.01).price(60_000.0),
        )
        .unwrap();
        let plan = single(spec);

        let report = StrategyRunner::new(&client).run(&plan).await;

        assert_eq!(report.total_slices, 1);
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failed"][0]["result"]["kind"], "failure");
        assert_eq!(json["failed"][0]["result"]["errorKind"], "rejected");
    }

    #[test]
    fn slice_results_serialize_camel_case_fields() {
        let success = serde_json::to_value(SliceResult::Success {
            order_id: "7".to_string(),
            status: "FILLED".to_string(),
        })
        .unwrap();
        assert_eq!(
            success,
            json!({ "kind": "success", "orderId": "7", "status": "FILLED" })
        );

        let failure = serde_json::to_value(SliceResult::Failure {
            error_kind: ExchangeErrorKind::Transport,
            message: "timed out".to_string(),
        })
        .unwrap();
        assert_eq!(
            failure,
            json!({ "kind": "failure", "errorKind": "transport", "message": "timed out" })
        );
        let back: SliceResult = serde_json::from_value(failure).unwrap();
        assert!(matches!(back, SliceResult::Failure { .. }));
    }
}
