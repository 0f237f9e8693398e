use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{order::OrderSpec, runner::OrderAck, schedule::StrategyKind};

/// One line of `per_slice.jsonl`: what was sent for a slice and how the
/// exchange answered.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceLogRecord {
    pub slice_idx: usize,
    pub strategy: StrategyKind,
    pub exchange: String,
    pub submit_ts_ms: i64,
    pub request: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedOrderRecord {
    pub ts_ms: i64,
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub qty: f64,
    pub px: Option<f64>,
    pub stop_px: Option<f64>,
    pub tif: Option<String>,
    pub status: String,
}

impl RoutedOrderRecord {
    pub fn from_spec(ts_ms: i64, spec: &OrderSpec, ack: &OrderAck) -> Self {
        Self {
            ts_ms,
            order_id: ack.order_id.clone(),
            symbol: spec.symbol.clone(),
            side: spec.side.as_str().to_string(),
            order_type: spec.order_type.as_str().to_string(),
            qty: spec.quantity,
            px: spec.price,
            stop_px: spec.stop_price,
            tif: spec.time_in_force.map(|tif| tif.as_str().to_string()),
            status: ack.status.clone(),
        }
    }
}

/// Files written under a run directory.
pub struct RunArtifacts {
    per_slice: BufWriter<File>,
    routed_csv: csv::Writer<File>,
    per_slice_path: PathBuf,
    meta_path: PathBuf,
}

impl RunArtifacts {
    pub fn create<P: AsRef<Path>>(out_dir: P, plan: &Value) -> Result<Self> {
        let out_dir = out_dir.as_ref();
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create run directory {}", out_dir.display()))?;

        let per_slice_path = out_dir.join("per_slice.jsonl");
        let routed_path = out_dir.join("orders_routed.csv");
        let meta_path = out_dir.join("run_meta.json");
        let plan_path = out_dir.join("plan.json");

        let per_slice = BufWriter::new(
            File::create(&per_slice_path)
                .with_context(|| format!("failed to create {}", per_slice_path.display()))?,
        );
        let routed_file = File::create(&routed_path)
            .with_context(|| format!("failed to create {}", routed_path.display()))?;
        let mut routed_csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(routed_file);
        routed_csv.write_record([
            "ts",
            "orderId",
            "symbol",
            "side",
            "type",
            "qty",
            "px",
            "stopPx",
            "tif",
            "status",
        ])?;
        routed_csv.flush()?;

        let plan_writer = File::create(&plan_path)
            .with_context(|| format!("failed to create {}", plan_path.display()))?;
        serde_json::to_writer_pretty(plan_writer, plan)
            .with_context(|| format!("failed to write plan json {}", plan_path.display()))?;

        Ok(Self {
            per_slice,
            routed_csv,
            per_slice_path,
            meta_path,
        })
    }

    pub fn log_slice(&mut self, record: &SliceLogRecord) -> Result<()> {
        serde_json::to_writer(&mut self.per_slice, record).with_context(|| {
            format!(
                "failed to write slice log to {}",
                self.per_slice_path.display()
            )
        })?;
        self.per_slice.write_all(b"\n")?;
        self.per_slice.flush()?;
        Ok(())
    }

    pub fn log_routed_order(&mut self, record: &RoutedOrderRecord) -> Result<()> {
        self.routed_csv.serialize(record)?;
        self.routed_csv.flush()?;
        Ok(())
    }

    pub fn write_meta(&self, meta: &Value) -> Result<()> {
        let meta_file = File::create(&self.meta_path)
            .with_context(|| format!("failed to create {}", self.meta_path.display()))?;
        let mut writer = BufWriter::new(meta_file);
        serde_json::to_writer_pretty(&mut writer, meta)
            .with_context(|| format!("failed to write meta to {}", self.meta_path.display()))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn make_slice_record(
        &self,
        slice_idx: usize,
        strategy: StrategyKind,
        exchange: impl Into<String>,
        submit_ts_ms: i64,
        request: Value,
        ack: Option<Value>,
        error: Option<Value>,
    ) -> SliceLogRecord {
        SliceLogRecord {
            slice_idx,
            strategy,
            exchange: exchange.into(),
            submit_ts_ms,
            request,
            ack,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::order::{build_order, OrderParams, OrderSide, OrderType};

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ob-artifacts-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn writes_plan_slices_and_routed_orders() {
        let dir = scratch_dir();
        let mut artifacts = RunArtifacts::create(&dir, &json!({ "strategy": "limit" })).unwrap();

        let spec = build_order(
            OrderParams::new("BTCUSDT", OrderSide::Buy, OrderType::Limit, 0.01).price(60_000.0),
        )
        .unwrap();
        let ack = OrderAck {
            order_id: "42".to_string(),
            status: "NEW".to_string(),
        };
        let record = artifacts.make_slice_record(
            0,
            StrategyKind::Limit,
            "demo",
            1_700_000_000_000,
            serde_json::to_value(&spec).unwrap(),
            Some(json!({ "orderId": "42" })),
            None,
        );
        artifacts.log_slice(&record).unwrap();
        artifacts
            .log_routed_order(&RoutedOrderRecord::from_spec(1_700_000_000_000, &spec, &ack))
            .unwrap();
        artifacts.write_meta(&json!({ "exchange": "demo" })).unwrap();

        let plan: Value =
            serde_json::from_str(&fs::read_to_string(dir.join("plan.json")).unwrap()).unwrap();
        assert_eq!(plan["strategy"], "limit");

        let lines = fs::read_to_string(dir.join("per_slice.jsonl")).unwrap();
        let logged: SliceLogRecord = serde_json::from_str(lines.trim()).unwrap();
        assert_eq!(logged.slice_idx, 0);
        assert_eq!(logged.strategy, StrategyKind::Limit);
        assert_eq!(logged.request["price"], 60_000.0);
        assert!(logged.error.is_none());

        let csv = fs::read_to_string(dir.join("orders_routed.csv")).unwrap();
        let rows: Vec<&str> = csv.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("ts,orderId,symbol"));
        assert!(rows[1].starts_with("1700000000000,42,BTCUSDT,BUY,LIMIT,0.01,60000"));
        assert!(rows[1].ends_with(",,GTC,NEW"));

        assert!(dir.join("run_meta.json").exists());
        fs::remove_dir_all(&dir).ok();
    }
}
