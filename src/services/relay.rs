use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ids::MeasurandKey;
use crate::services::telemetry::{self, QueryError, ReadingPayload};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    LiveValue,
    History,
}

impl SubscriptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveValue => "liveValue",
            Self::History => "history",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    pub mode: SubscriptionMode,
    pub terminal_id: i64,
    pub measurand_id: MeasurandKey,
}

/// Validate a client text frame into a subscription. Purely syntactic:
/// unknown terminals or measurands surface later as per-tick errors, not
/// as subscription rejections.
pub fn parse_subscription(text: &str) -> Result<SubscriptionSpec, String> {
    let value: JsonValue =
        serde_json::from_str(text).map_err(|_| "message is not valid JSON".to_string())?;
    let Some(message) = value.as_object() else {
        return Err("message must be a JSON object".to_string());
    };

    let mode = match message.get("type").and_then(JsonValue::as_str) {
        Some("liveValue") => SubscriptionMode::LiveValue,
        Some("history") => SubscriptionMode::History,
        Some(other) => return Err(format!("unknown subscription type '{other}'")),
        None => return Err("missing subscription type".to_string()),
    };

    let terminal_id = message
        .get("terminalId")
        .and_then(|raw| match raw {
            JsonValue::Number(num) => num.as_i64(),
            JsonValue::String(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        })
        .ok_or_else(|| "terminalId must be a numeric terminal identifier".to_string())?;

    let Some(measurand_id) = message.get("measurandId").and_then(MeasurandKey::from_json) else {
        return Err(format!(
            "measurandId is required for {} subscriptions",
            mode.as_str()
        ));
    };

    Ok(SubscriptionSpec {
        mode,
        terminal_id,
        measurand_id,
    })
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StreamFrame {
    Success {
        #[serde(rename = "type")]
        kind: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        data: JsonValue,
    },
    Error {
        message: String,
    },
}

impl StreamFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    fn success(kind: &'static str, count: Option<usize>, data: JsonValue) -> Self {
        Self::Success { kind, count, data }
    }
}

fn query_error_frame(err: QueryError) -> StreamFrame {
    if let QueryError::Store(inner) = &err {
        tracing::warn!(error = %inner, "telemetry query failed during relay tick");
    }
    StreamFrame::error(err.to_string())
}

fn encode_payload<T: Serialize>(payload: &T) -> Result<JsonValue, StreamFrame> {
    serde_json::to_value(payload).map_err(|err| {
        tracing::warn!(error = %err, "failed to encode relay payload");
        StreamFrame::error("failed to encode telemetry payload")
    })
}

/// One fetch-and-reduce pass for a subscription. Every outcome is a frame;
/// the polling loop never stops on a failed tick.
pub async fn poll_once(state: &AppState, spec: &SubscriptionSpec) -> StreamFrame {
    match spec.mode {
        SubscriptionMode::LiveValue => {
            match telemetry::latest_value(
                &state.db,
                &state.catalog,
                spec.terminal_id,
                &spec.measurand_id,
            )
            .await
            {
                Ok(reading) => {
                    let payload = ReadingPayload::from(reading);
                    match encode_payload(&payload) {
                        Ok(data) => StreamFrame::success("liveValue", None, data),
                        Err(frame) => frame,
                    }
                }
                Err(err) => query_error_frame(err),
            }
        }
        SubscriptionMode::History => {
            match telemetry::recent_window(
                &state.db,
                &state.catalog,
                spec.terminal_id,
                &spec.measurand_id,
                state.config.recent_window_limit,
            )
            .await
            {
                Ok(readings) => {
                    let payload: Vec<ReadingPayload> =
                        readings.into_iter().map(Into::into).collect();
                    let count = payload.len();
                    match encode_payload(&payload) {
                        Ok(data) => StreamFrame::success("history", Some(count), data),
                        Err(frame) => frame,
                    }
                }
                Err(err) => query_error_frame(err),
            }
        }
    }
}

/// Start the polling loop for one subscription. The returned token is the
/// subscription's timer handle: cancelling it stops the loop before its next
/// tick. Delay-style rescheduling keeps ticks strictly sequential within a
/// subscription; loops for different connections never coordinate.
pub fn spawn_subscription(
    state: AppState,
    spec: SubscriptionSpec,
    frames: mpsc::Sender<StreamFrame>,
) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let frame = poll_once(&state, &spec).await;
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    cancel
}
