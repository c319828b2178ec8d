use crate::error::{Error, Result};
use crate::models::Candle;
use serde::Deserialize;
use serde_json::{json, Value};

/// Text keepalive frames, sent outside the JSON envelope.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// A decoded inbound frame from the public channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Pong,
    Subscribed,
    /// Server-side error event, e.g. an unknown instrument.
    ErrorEvent { code: String, msg: String },
    /// Candle rows of one push, oldest first.
    Candles(Vec<Candle>),
    /// Well-formed JSON that carries nothing for us.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Subscribe request for one channel/instrument pair.
pub fn subscribe_request(channel: &str, inst_id: &str, inst_type: &str) -> String {
    json!({
        "op": "subscribe",
        "args": [{
            "channel": channel,
            "instId": inst_id,
            "instType": inst_type,
        }]
    })
    .to_string()
}

pub fn parse_message(text: &str) -> Result<StreamMessage> {
    if text == PONG {
        return Ok(StreamMessage::Pong);
    }

    let frame: Frame = serde_json::from_str(text)
        .map_err(|e| Error::MalformedData(format!("invalid json: {}", e)))?;

    match frame.event.as_deref() {
        Some("subscribe") => return Ok(StreamMessage::Subscribed),
        Some("error") => {
            return Ok(StreamMessage::ErrorEvent {
                code: frame.code.map(|c| value_to_string(&c)).unwrap_or_default(),
                msg: frame.msg.unwrap_or_default(),
            })
        }
        _ => {}
    }

    match frame.data {
        Some(Value::Array(rows)) => {
            let mut candles = rows
                .iter()
                .filter(|row| row.is_array())
                .map(parse_candle_row)
                .collect::<Result<Vec<_>>>()?;
            if candles.is_empty() {
                return Ok(StreamMessage::Ignored);
            }
            candles.sort_by_key(|c| c.timestamp);
            Ok(StreamMessage::Candles(candles))
        }
        Some(_) => Err(Error::MalformedData("data is not an array".to_string())),
        None => Ok(StreamMessage::Ignored),
    }
}

/// `[ts, open, high, low, close, volume, quoteVolume?, ...]`, numbers as strings.
fn parse_candle_row(row: &Value) -> Result<Candle> {
    let fields = row
        .as_array()
        .ok_or_else(|| Error::MalformedData("candle row is not an array".to_string()))?;
    if fields.len() < 6 {
        return Err(Error::MalformedData(format!(
            "candle row has {} fields, expected at least 6",
            fields.len()
        )));
    }

    let number = |idx: usize| -> Result<f64> {
        let parsed = match &fields[idx] {
            Value::String(s) => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        };
        parsed
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::MalformedData(format!("candle field {} is not a number", idx)))
    };

    Ok(Candle {
        timestamp: number(0)? as i64,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(5)?,
        quote_volume: if fields.len() > 6 {
            Some(number(6)?)
        } else {
            None
        },
    })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
