use serde::{Deserialize, Deserializer};

/// Standard exchange response wrapper.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// Number as sent by the exchange: usually a string, sometimes bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Str(String),
    Num(f64),
}

/// The exchange encodes most numbers as strings.
pub fn de_f64_from_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawNumber::deserialize(deserializer)? {
        RawNumber::Num(n) => Ok(n),
        RawNumber::Str(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}

/// Like [`de_f64_from_str`], but null or blank reads as `None`.
fn de_opt_f64_from_str<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawNumber::Num(n)) => Ok(Some(n)),
        Some(RawNumber::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(RawNumber::Str(s)) => s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom),
    }
}

/// `/api/v2/mix/market/open-interest`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestData {
    pub open_interest_list: Vec<OpenInterestEntry>,
}

#[derive(Debug, Deserialize)]
pub struct OpenInterestEntry {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64_from_str")]
    pub size: f64,
}

/// One row of `/api/v2/mix/market/account-long-short`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongShortEntry {
    #[serde(deserialize_with = "de_f64_from_str")]
    pub long_account_ratio: f64,
    #[serde(deserialize_with = "de_f64_from_str")]
    pub short_account_ratio: f64,
    #[serde(deserialize_with = "de_f64_from_str")]
    pub long_short_account_ratio: f64,
}

/// One margin account from `/api/v2/mix/account/accounts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    pub margin_coin: String,
    #[serde(deserialize_with = "de_f64_from_str")]
    pub available: f64,
}

/// One row of `/api/v2/mix/position/single-position`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    pub symbol: String,
    pub hold_side: String,
    #[serde(deserialize_with = "de_f64_from_str")]
    pub total: f64,
    #[serde(deserialize_with = "de_f64_from_str")]
    pub open_price_avg: f64,
    #[serde(deserialize_with = "de_f64_from_str")]
    pub leverage: f64,
    #[serde(default, deserialize_with = "de_opt_f64_from_str")]
    pub mark_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub client_oid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_interest_parsing() {
        let body = r#"{
            "code": "00000",
            "msg": "success",
            "requestTime": 1695796780343,
            "data": {
                "openInterestList": [{"symbol": "BTCUSDT", "size": "34278.06"}],
                "ts": "1695796780343"
            }
        }"#;

        let env: Envelope<OpenInterestData> = serde_json::from_str(body).unwrap();
        assert_eq!(env.code, "00000");
        let data = env.data.unwrap();
        assert_eq!(data.open_interest_list[0].size, 34278.06);
    }

    #[test]
    fn test_long_short_parsing() {
        let body = r#"[
            {"longAccountRatio": "0.61", "shortAccountRatio": "0.39", "longShortAccountRatio": "1.56", "ts": "1"},
            {"longAccountRatio": "0.62", "shortAccountRatio": "0.38", "longShortAccountRatio": "1.63", "ts": "2"}
        ]"#;

        let rows: Vec<LongShortEntry> = serde_json::from_str(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].long_short_account_ratio, 1.63);
    }

    #[test]
    fn test_position_parsing_with_blank_mark() {
        let body = r#"{"symbol":"BTCUSDT","holdSide":"short","total":"0.012",
            "openPriceAvg":"64000.5","leverage":"12","markPrice":""}"#;

        let entry: PositionEntry = serde_json::from_str(body).unwrap();
        assert_eq!(entry.hold_side, "short");
        assert_eq!(entry.leverage, 12.0);
        assert_eq!(entry.mark_price, None);
    }

    #[test]
    fn test_position_parsing_with_numeric_mark() {
        let body = r#"{"symbol":"BTCUSDT","holdSide":"long","total":"0.5",
            "openPriceAvg":"64000.5","leverage":"10","markPrice":64120.7}"#;

        let entry: PositionEntry = serde_json::from_str(body).unwrap();
        assert_eq!(entry.mark_price, Some(64120.7));

        let body = r#"{"symbol":"BTCUSDT","holdSide":"long","total":"0.5",
            "openPriceAvg":"64000.5","leverage":"10","markPrice":null}"#;
        let entry: PositionEntry = serde_json::from_str(body).unwrap();
        assert_eq!(entry.mark_price, None);
    }

    #[test]
    fn test_bad_number_rejected() {
        let body = r#"{"symbol": "BTCUSDT", "size": "n/a"}"#;
        assert!(serde_json::from_str::<OpenInterestEntry>(body).is_err());
    }
}
