//! Run-boundary monitor used by the stop transition.
//!
//! Polls the first aggregator through `daq.report` until the reported event count (or run
//! duration) reaches the requested limit. The poll interval adapts to the observed rate:
//! half the estimated remaining time, clamped to the configured bounds.

use crate::error::{PollError, RpcError};
use crate::model::{Address, BoundaryReport, ControlEvent, Metric, PollEvent, Role, RunBoundary};
use crate::registry::EndpointRegistry;
use crate::rpc::{RpcTransport, RpcValue};
use crate::settings::MonitorSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

const REPORT_METHOD: &str = "daq.report";

/// Values an aggregator returns while it cannot answer yet.
fn is_busy(raw: &str) -> bool {
    matches!(raw.trim(), "busy" | "-1")
}

/// Next sleep in seconds, always within `[min, max]`.
pub fn next_poll_interval(
    current: f64,
    previous: f64,
    sleep_secs: f64,
    target: f64,
    min: f64,
    max: f64,
) -> f64 {
    let max = max.max(min);
    let next = if current > 0.0 && previous > 0.0 && current > previous && sleep_secs > 0.0 {
        let rate = (current - previous) / sleep_secs;
        if rate > 0.0 {
            (target - current) / (2.0 * rate)
        } else {
            min
        }
    } else {
        min
    };
    if next.is_nan() {
        return min;
    }
    next.clamp(min, max)
}

fn parse_metric(metric: Metric, raw: &str) -> Result<f64, PollError> {
    let text = raw.trim();
    let parsed = match metric {
        Metric::EventCount => text.parse::<i64>().ok().map(|n| n as f64),
        Metric::RunDuration => text.parse::<f64>().ok().filter(|v| v.is_finite()),
    };
    parsed.ok_or_else(|| PollError::Parse {
        metric,
        value: raw.to_string(),
    })
}

pub struct RunBoundaryMonitor {
    transport: Arc<dyn RpcTransport>,
    settings: MonitorSettings,
    events: UnboundedSender<ControlEvent>,
}

impl RunBoundaryMonitor {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        settings: MonitorSettings,
        events: UnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            transport,
            settings,
            events,
        }
    }

    /// Block until `boundary` is reached on the first registered aggregator.
    /// Returns `None` without polling when no aggregator is registered.
    pub async fn wait_for_boundary(
        &self,
        registry: &EndpointRegistry,
        boundary: RunBoundary,
    ) -> Option<BoundaryReport> {
        let aggregators: Vec<_> = registry.groups(Role::Aggregator).collect();
        let what = match boundary.metric() {
            Metric::EventCount => "the number of events in the current run",
            Metric::RunDuration => "the duration of the current run",
        };
        let Some(first) = aggregators.first() else {
            warn!("no aggregator registered, stopping immediately");
            self.info(format!("No Aggregator in use - unable to determine {what}."));
            return None;
        };
        if aggregators.len() > 1 {
            warn!(count = aggregators.len(), "only the first aggregator is polled");
            self.info(format!(
                "NOTE: more than one Aggregator is running (count={}). The first Aggregator will be used to determine {what}.",
                aggregators.len()
            ));
        }
        Some(self.poll_until(&first.address, boundary).await)
    }

    pub async fn poll_until(&self, address: &Address, boundary: RunBoundary) -> BoundaryReport {
        let metric = boundary.metric();
        let target = boundary.target();
        let min = self.settings.min_interval.as_secs_f64();
        let max = self.settings.max_interval.as_secs_f64();

        let mut current = 0.0_f64;
        let mut previous = 0.0_f64;
        let mut sleep_secs = 0.0_f64;
        let mut polls = 0u32;

        while current >= 0.0 && current < target {
            if sleep_secs > 0.0 {
                let pause = Duration::try_from_secs_f64(sleep_secs)
                    .unwrap_or(self.settings.max_interval);
                tokio::time::sleep(pause).await;
            }
            let _ = self.events.send(ControlEvent::Poll(PollEvent::Fetching { metric }));
            polls += 1;

            match self.poll_once(address, metric).await {
                Ok((value, raw)) => {
                    current = value;
                    let _ = self
                        .events
                        .send(ControlEvent::Poll(PollEvent::Reported { metric, value: raw }));
                }
                Err(e) => {
                    current = previous;
                    warn!(%address, metric = metric.as_str(), error = %e, "report poll failed");
                    let _ = self.events.send(ControlEvent::Poll(PollEvent::Failed {
                        metric,
                        error: e.to_string(),
                    }));
                }
            }

            sleep_secs = next_poll_interval(current, previous, sleep_secs, target, min, max);
            previous = current;
        }

        info!(metric = metric.as_str(), value = current, limit = target, polls, "run boundary reached");
        BoundaryReport {
            metric,
            target,
            last_value: current,
            polls,
        }
    }

    /// One poll, including the single retry after a busy answer.
    async fn poll_once(&self, address: &Address, metric: Metric) -> Result<(f64, String), PollError> {
        let args = [RpcValue::Str(metric.as_str().to_string())];
        let mut raw = self.report(address, &args).await?;
        if is_busy(&raw) {
            tokio::time::sleep(self.settings.busy_retry_delay).await;
            raw = self.report(address, &args).await?;
            if is_busy(&raw) {
                return Err(PollError::StillBusy(raw));
            }
        }
        let value = parse_metric(metric, &raw)?;
        Ok((value, raw))
    }

    async fn report(&self, address: &Address, args: &[RpcValue]) -> Result<String, RpcError> {
        let timeout = self.settings.poll_timeout;
        let call = self.transport.call(address, REPORT_METHOD, args, timeout);
        match tokio::time::timeout(timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(RpcError::Timeout(timeout)),
        }
    }

    fn info(&self, message: String) {
        let _ = self.events.send(ControlEvent::Info(message));
    }
}
