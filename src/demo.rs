//! Bundled demo suite
//!
//! A handful of groups exercising every engine path: plain and parameterized
//! tests, a deferred async set-up, a failing one and one that times out.

use asyncsuite::config::EngineConfig;
use asyncsuite::{AsyncSetUp, OnFailure, OnSuccess, TestEngine, TestGroup, TestTable};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct Arithmetic;

impl Arithmetic {
    fn operand(args: &[Value], index: usize) -> anyhow::Result<i64> {
        args.get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow::anyhow!("argument {index} is not an integer"))
    }
}

impl TestGroup for Arithmetic {
    fn tests(&self) -> TestTable<Self> {
        TestTable::new()
            .parameterized(
                "sum",
                vec![
                    vec![json!(1), json!(2), json!(3)],
                    vec![json!(4), json!(5), json!(9)],
                    vec![json!(2), json!(2), json!(5)],
                ],
                |_: &mut Arithmetic, args: &[Value]| {
                    let a = Arithmetic::operand(args, 0)?;
                    let b = Arithmetic::operand(args, 1)?;
                    let expected = Arithmetic::operand(args, 2)?;
                    anyhow::ensure!(a + b == expected, "{a} + {b} = {}, not {expected}", a + b);
                    Ok(())
                },
            )
            .test("division_by_zero_is_rejected", |_: &mut Arithmetic| {
                anyhow::ensure!(10i64.checked_div(0).is_none());
                Ok(())
            })
    }
}

/// Stock loaded by an async set-up before the tests run
#[derive(Default)]
pub struct Inventory {
    stock: Arc<Mutex<HashMap<String, u32>>>,
}

impl TestGroup for Inventory {
    fn tests(&self) -> TestTable<Self> {
        TestTable::new()
            .test("has_stock", |g: &mut Inventory| {
                let stock = g.stock.lock().map_err(|_| anyhow::anyhow!("stock poisoned"))?;
                anyhow::ensure!(stock.get("widget") == Some(&3), "expected 3 widgets");
                Ok(())
            })
            .test("reserve_item", |g: &mut Inventory| {
                let mut stock = g.stock.lock().map_err(|_| anyhow::anyhow!("stock poisoned"))?;
                let count = stock
                    .get_mut("gadget")
                    .ok_or_else(|| anyhow::anyhow!("no gadgets stocked"))?;
                *count -= 1;
                Ok(())
            })
    }
}

impl AsyncSetUp for Inventory {
    fn set_up_time_limit(&self) -> Duration {
        Duration::from_millis(1000)
    }

    fn async_set_up(&mut self, on_success: OnSuccess, _on_failure: OnFailure) -> anyhow::Result<()> {
        let stock = Arc::clone(&self.stock);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(mut stock) = stock.lock() {
                stock.insert("widget".to_string(), 3);
            }
            on_success.done();
        });
        Ok(())
    }
}

/// Set-up rejected by its remote source
pub struct RemoteConfig;

impl TestGroup for RemoteConfig {
    fn tests(&self) -> TestTable<Self> {
        TestTable::new().test("feature_flags_loaded", |_: &mut RemoteConfig| Ok(()))
    }
}

impl AsyncSetUp for RemoteConfig {
    fn async_set_up(&mut self, _on_success: OnSuccess, on_failure: OnFailure) -> anyhow::Result<()> {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            on_failure.fail_with_value("config service unavailable", json!({ "status": 503 }));
        });
        Ok(())
    }
}

/// Set-up slower than its own limit
pub struct SlowCache;

impl TestGroup for SlowCache {
    fn tests(&self) -> TestTable<Self> {
        TestTable::new().test("warm_hit", |_: &mut SlowCache| Ok(()))
    }
}

impl AsyncSetUp for SlowCache {
    fn set_up_time_limit(&self) -> Duration {
        Duration::from_millis(200)
    }

    fn async_set_up(&mut self, on_success: OnSuccess, _on_failure: OnFailure) -> anyhow::Result<()> {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            on_success.done();
        });
        Ok(())
    }
}

pub fn build_engine(config: &EngineConfig) -> TestEngine {
    let mut engine = TestEngine::from_config(config);
    engine
        .add_group("Arithmetic", Arithmetic)
        .add_async_group("Inventory", Inventory::default())
        .add_async_group("RemoteConfig", RemoteConfig)
        .add_async_group("SlowCache", SlowCache);
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncsuite::{AsyncSetUpState, Selector};

    #[tokio::test(start_paused = true)]
    async fn test_demo_suite_outcomes() {
        let engine = build_engine(&EngineConfig::default());
        let result = engine.run_selected().finished().await;

        let state = |group: &str| result.set_up_status(group).map(|s| s.state);
        assert_eq!(state("Inventory"), Some(AsyncSetUpState::Done));
        assert_eq!(state("RemoteConfig"), Some(AsyncSetUpState::Failed));
        assert_eq!(state("SlowCache"), Some(AsyncSetUpState::Failed));

        let failed: Vec<_> = result.errors.iter().map(|r| r.label()).collect();
        assert_eq!(
            failed,
            vec![
                "Arithmetic/sum(2)",
                "RemoteConfig",
                "Inventory/reserve_item",
                "SlowCache",
            ]
        );
        assert_eq!(result.passes.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_selection() {
        let config = EngineConfig {
            selection: Some("#Arithmetic/sum(1)".to_string()),
            ..Default::default()
        };
        let engine = build_engine(&config);
        assert_eq!(
            engine.selector(),
            &Selector::new().group("Arithmetic").test("sum").parameter_set(1)
        );

        let result = engine.run_selected().finished().await;
        assert_eq!(result.total(), 1);
        assert!(result.passes[0].is_for("Arithmetic", Some("sum"), Some(1)));
        assert!(result.async_set_up_by_group.is_empty());
    }

    #[test]
    fn test_demo_listing() {
        let engine = build_engine(&EngineConfig::default());
        let names: Vec<_> = engine.list_tests().into_iter().map(|e| e.test).collect();
        assert_eq!(
            names,
            vec![
                "sum",
                "division_by_zero_is_rejected",
                "has_stock",
                "reserve_item",
                "feature_flags_loaded",
                "warm_hit",
            ]
        );
    }
}
